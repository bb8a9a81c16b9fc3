use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use hawkeye_pipeline::ingest::{
    self, FrameHandlers, FrameSource, SessionGate, SyntheticCamera,
};
use hawkeye_pipeline::{
    CaptureDevice, CaptureSettings, DeviceDescriptor, DeviceOrientation, Frame, LensPosition,
    SessionController, SessionError, SessionPhase, StaticAuthorization,
};

fn settings() -> CaptureSettings {
    CaptureSettings {
        width: 64,
        height: 36,
        target_fps: 60,
    }
}

fn source() -> Result<FrameSource> {
    FrameSource::new(
        FrameHandlers {
            preview: Box::new(|_frame: &Frame| {}),
            inference: Box::new(|_frame: &Frame| {}),
        },
        Arc::new(SessionGate::new()),
    )
}

fn controller(auth: Arc<StaticAuthorization>, selector: &str) -> Result<SessionController> {
    Ok(SessionController::new(source()?, auth, settings(), selector))
}

fn synthetic(selector: &str) -> SyntheticCamera {
    SyntheticCamera::new(DeviceDescriptor::new(selector, ingest::lens_position(selector)))
}

#[test]
fn granted_start_runs_and_stop_releases() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?;
    assert_eq!(session.phase(), SessionPhase::Unconfigured);

    session.start()?;
    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Running);
    let device = state.device.expect("device recorded");
    assert_eq!(device.selector, "stub://back");
    assert_eq!(device.position, LensPosition::Back);

    // Starting again while running is a no-op.
    session.start()?;
    assert_eq!(session.phase(), SessionPhase::Running);

    session.stop();
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert!(!session.with_source(FrameSource::is_running));
    Ok(())
}

#[test]
fn stop_is_valid_before_start() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?;
    session.stop();
    assert_eq!(session.phase(), SessionPhase::Stopped);
    session.stop();
    assert_eq!(session.phase(), SessionPhase::Stopped);
    Ok(())
}

#[test]
fn denial_is_terminal_until_reset() -> Result<()> {
    let auth = Arc::new(StaticAuthorization::prompt(false));
    let session = controller(Arc::clone(&auth), "stub://back")?;

    assert_eq!(session.start(), Err(SessionError::AuthorizationDenied));
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert_eq!(auth.requests(), 1);

    // The denial is latched; the provider is not asked again.
    assert_eq!(session.start(), Err(SessionError::AuthorizationDenied));
    assert_eq!(auth.requests(), 1);
    assert!(session.state().device.is_none());

    // After a reset the provider is consulted again; it still reports denied.
    session.reset_authorization();
    assert_eq!(session.start(), Err(SessionError::AuthorizationDenied));
    assert_eq!(auth.requests(), 1);
    Ok(())
}

#[test]
fn denied_provider_is_never_prompted() -> Result<()> {
    let auth = Arc::new(StaticAuthorization::denied());
    let session = controller(Arc::clone(&auth), "stub://back")?;
    assert_eq!(session.start(), Err(SessionError::AuthorizationDenied));
    assert_eq!(auth.requests(), 0);
    Ok(())
}

#[test]
fn prompt_grant_starts_session() -> Result<()> {
    let auth = Arc::new(StaticAuthorization::prompt(true));
    let session = controller(Arc::clone(&auth), "stub://front")?;
    session.start()?;
    assert_eq!(auth.requests(), 1);
    assert_eq!(session.phase(), SessionPhase::Running);

    session.stop();
    session.start()?;
    assert_eq!(auth.requests(), 1, "granted status is remembered by the provider");
    session.stop();
    Ok(())
}

#[test]
fn unavailable_device_leaves_session_stopped() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?
        .with_device_opener(Box::new(|selector: &str| -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(synthetic(selector).failing_open()) as Box<dyn CaptureDevice>)
        }));

    match session.start() {
        Err(SessionError::DeviceUnavailable(msg)) => assert!(msg.contains("stub://back")),
        other => panic!("expected DeviceUnavailable, got {:?}", other),
    }
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert!(session.state().device.is_none());
    Ok(())
}

#[test]
fn configuration_failure_reverts_to_stopped() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?
        .with_device_opener(Box::new(|selector: &str| -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(synthetic(selector).failing_configure()) as Box<dyn CaptureDevice>)
        }));

    assert!(matches!(session.start(), Err(SessionError::Configuration(_))));
    assert_eq!(session.phase(), SessionPhase::Stopped);
    assert!(!session.with_source(FrameSource::is_running));
    Ok(())
}

#[test]
fn switch_while_running_keeps_session_running() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?;
    session.start()?;

    session.switch_device("stub://front")?;
    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Running);
    let device = state.device.expect("device");
    assert_eq!(device.selector, "stub://front");
    assert!(device.is_mirrored());

    session.stop();
    Ok(())
}

#[test]
fn failed_switch_keeps_previous_device() -> Result<()> {
    let opened = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&opened);
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?
        .with_device_opener(Box::new(move |selector: &str| -> Result<Box<dyn CaptureDevice>> {
            counter.fetch_add(1, Ordering::SeqCst);
            let camera = synthetic(selector);
            let camera = if selector == "stub://front" {
                camera.failing_open()
            } else {
                camera
            };
            Ok(Box::new(camera) as Box<dyn CaptureDevice>)
        }));
    session.start()?;

    assert!(matches!(
        session.switch_device("stub://front"),
        Err(SessionError::DeviceUnavailable(_))
    ));
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Running);
    assert_eq!(state.device.expect("device").selector, "stub://back");

    session.stop();
    Ok(())
}

#[test]
fn switch_while_stopped_applies_on_next_start() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?;
    session.switch_device("stub://front")?;
    assert_eq!(session.phase(), SessionPhase::Unconfigured);

    session.start()?;
    assert_eq!(
        session.state().device.expect("device").selector,
        "stub://front"
    );
    session.stop();
    Ok(())
}

#[test]
fn orientation_is_reflected_in_state() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?;
    assert_eq!(session.state().orientation, DeviceOrientation::Portrait);
    session.set_orientation(DeviceOrientation::LandscapeLeft);
    assert_eq!(session.state().orientation, DeviceOrientation::LandscapeLeft);
    assert_eq!(
        session.with_source(FrameSource::orientation),
        DeviceOrientation::LandscapeLeft
    );
    Ok(())
}

#[test]
fn device_panic_is_counted_and_capture_continues() -> Result<()> {
    let session = controller(Arc::new(StaticAuthorization::granted()), "stub://back")?
        .with_device_opener(Box::new(|selector: &str| -> Result<Box<dyn CaptureDevice>> {
            Ok(Box::new(synthetic(selector).panicking_at(3)) as Box<dyn CaptureDevice>)
        }));
    session.start()?;

    let deadline = Instant::now() + Duration::from_secs(2);
    while session.with_source(FrameSource::stats).frames_captured < 6 && Instant::now() < deadline
    {
        thread::sleep(Duration::from_millis(5));
    }
    let stats = session.with_source(FrameSource::stats);
    assert!(stats.frames_captured >= 6, "frames={}", stats.frames_captured);
    assert_eq!(stats.capture_errors, 1);
    assert_eq!(session.phase(), SessionPhase::Running);
    assert!(session.with_source(FrameSource::is_running));

    session.stop();
    assert_eq!(session.phase(), SessionPhase::Stopped);
    session.start()?;
    assert!(session.with_source(FrameSource::is_running));
    session.stop();
    Ok(())
}
