use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;

use hawkeye_pipeline::config::AuthorizationMode;
use hawkeye_pipeline::detect::{ScriptedDetector, SyntheticDetector};
use hawkeye_pipeline::ingest::{self, SyntheticCamera};
use hawkeye_pipeline::{
    BoundingBox, CaptureDevice, DeviceDescriptor, DeviceOrientation, Label, Pipeline, PipelineConfig, RawDetection,
    SessionPhase, StaticAuthorization, TeamSide,
};

fn config(fps: u32, tracking: bool) -> PipelineConfig {
    let mut config = PipelineConfig::defaults();
    config.capture.device = "stub://back".to_string();
    config.capture.width = 64;
    config.capture.height = 36;
    config.capture.target_fps = fps;
    config.tracking.enabled = tracking;
    config.preview.max_width = 32;
    config.authorization = AuthorizationMode::Granted;
    config
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn slow_detector_skips_frames_instead_of_queueing() -> Result<()> {
    let latency = Duration::from_millis(50);
    let detector = ScriptedDetector::repeating(Vec::new()).with_latency(latency);
    let calls = detector.call_counter();
    let pipeline = Pipeline::new(
        &config(200, false),
        Box::new(detector),
        Arc::new(StaticAuthorization::granted()),
    )?;

    let started = Instant::now();
    pipeline.start()?;
    thread::sleep(Duration::from_millis(500));
    pipeline.stop();
    let elapsed = started.elapsed();
    pipeline.wait_idle(Duration::from_secs(1));

    let stats = pipeline.stats();
    let calls = calls.load(Ordering::SeqCst);
    let bound = (elapsed.as_millis() / latency.as_millis()) as u64 + 2;
    assert!(calls >= 1);
    assert!(
        calls < stats.source.frames_captured,
        "calls={} frames={}",
        calls,
        stats.source.frames_captured
    );
    assert!(calls <= bound, "calls={} bound={}", calls, bound);
    assert!(stats.source.inference.skipped > 0);
    assert_eq!(
        stats.source.inference.offered,
        stats.source.inference.accepted + stats.source.inference.skipped
    );
    Ok(())
}

#[test]
fn published_feeds_never_go_backwards() -> Result<()> {
    let ball = RawDetection::new(Label::Ball, 0.9, BoundingBox::new(0.4, 0.4, 0.05, 0.05));
    let pipeline = Pipeline::new(
        &config(120, true),
        Box::new(ScriptedDetector::repeating(vec![ball])),
        Arc::new(StaticAuthorization::granted()),
    )?;
    let mut feeds = pipeline.hub().subscribe_detections();
    pipeline.start()?;

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(3);
    while seen.len() < 10 && Instant::now() < deadline {
        if let Some(feed) = feeds.next_timeout(Duration::from_millis(200)) {
            seen.push((feed.timestamp(), feed.batch.sequence));
        }
    }
    pipeline.stop();

    assert!(seen.len() >= 2, "only {} feeds observed", seen.len());
    for pair in seen.windows(2) {
        assert!(pair[0].0 <= pair[1].0, "timestamps went backwards: {:?}", pair);
        assert!(pair[0].1 < pair[1].1, "sequence went backwards: {:?}", pair);
    }
    Ok(())
}

#[test]
fn stop_discards_in_flight_result() -> Result<()> {
    let ball = RawDetection::new(Label::Ball, 0.9, BoundingBox::new(0.4, 0.4, 0.05, 0.05));
    let detector = ScriptedDetector::repeating(vec![ball]).with_latency(Duration::from_millis(300));
    let calls = detector.call_counter();
    let pipeline = Pipeline::new(
        &config(30, true),
        Box::new(detector),
        Arc::new(StaticAuthorization::granted()),
    )?;

    pipeline.start()?;
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 1));
    pipeline.stop();
    assert!(pipeline.wait_idle(Duration::from_secs(2)));

    assert!(pipeline.hub().latest_detections().is_none());
    let stats = pipeline.stats();
    assert!(stats.inference.discarded >= 1);
    assert_eq!(stats.inference.published, 0);
    assert_eq!(stats.session.phase, SessionPhase::Stopped);
    Ok(())
}

#[test]
fn paused_preview_keeps_inference_running() -> Result<()> {
    let pipeline = Pipeline::new(
        &config(60, false),
        Box::new(SyntheticDetector::new().without_jitter()),
        Arc::new(StaticAuthorization::granted()),
    )?;
    pipeline.set_preview_paused(true);
    pipeline.start()?;

    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.stats().inference.published >= 3
    }));
    assert!(pipeline.hub().latest_preview().is_none());
    assert!(pipeline.stats().preview.paused > 0);

    pipeline.set_preview_paused(false);
    assert!(wait_until(Duration::from_secs(2), || {
        pipeline.hub().latest_preview().is_some()
    }));
    pipeline.stop();

    let preview = pipeline.hub().latest_preview().expect("preview published");
    assert!(preview.image.width() <= 32);
    Ok(())
}

#[test]
fn synthetic_match_produces_stable_tracks() -> Result<()> {
    let pipeline = Pipeline::new(
        &config(60, true),
        Box::new(SyntheticDetector::new().without_jitter()),
        Arc::new(StaticAuthorization::granted()),
    )?;
    pipeline.set_orientation(DeviceOrientation::LandscapeLeft);
    pipeline.start()?;

    assert!(wait_until(Duration::from_secs(3), || {
        pipeline.stats().inference.published >= 10
    }));
    pipeline.stop();
    pipeline.wait_idle(Duration::from_secs(1));

    let feed = pipeline.hub().latest_detections().expect("feed published");
    assert!(!feed.batch.is_empty());
    assert!(feed.tracks.len() >= 5, "tracks: {}", feed.tracks.len());
    assert!(feed.batch.detections.iter().all(|d| d.track_id.is_some()));
    assert!(feed
        .batch
        .detections
        .iter()
        .all(|d| d.timestamp == feed.batch.timestamp));

    let ids: HashSet<u64> = feed.tracks.iter().map(|t| t.id).collect();
    assert_eq!(ids.len(), feed.tracks.len(), "track ids must be unique");

    let referee = feed
        .tracks
        .iter()
        .find(|t| t.label == Label::Referee)
        .expect("referee tracked");
    assert_eq!(referee.team, Some(TeamSide::Neutral));
    assert!(feed
        .tracks
        .iter()
        .filter(|t| t.label == Label::Player)
        .all(|t| matches!(t.team, Some(TeamSide::Home) | Some(TeamSide::Away))));

    // A player seen since the start keeps one id, so its trajectory spans many batches.
    assert!(feed
        .tracks
        .iter()
        .any(|t| t.label == Label::Player && t.trajectory_len >= 5));
    assert!(feed.tracks.iter().any(|t| t.velocity.magnitude() > 0.0));
    Ok(())
}

#[test]
fn denied_authorization_keeps_pipeline_idle() -> Result<()> {
    let pipeline = Pipeline::new(
        &config(30, true),
        Box::new(SyntheticDetector::new()),
        Arc::new(StaticAuthorization::denied()),
    )?;
    assert!(pipeline.start().is_err());
    thread::sleep(Duration::from_millis(100));
    let stats = pipeline.stats();
    assert_eq!(stats.source.frames_captured, 0);
    assert_eq!(stats.session.phase, SessionPhase::Stopped);
    assert!(pipeline.hub().latest_detections().is_none());
    Ok(())
}

#[test]
fn flaky_device_keeps_frames_flowing() -> Result<()> {
    let pipeline = Pipeline::new(
        &config(120, false),
        Box::new(SyntheticDetector::new()),
        Arc::new(StaticAuthorization::granted()),
    )?
    .with_device_opener(Box::new(|selector: &str| -> Result<Box<dyn CaptureDevice>> {
        let descriptor = DeviceDescriptor::new(selector, ingest::lens_position(selector));
        Ok(Box::new(SyntheticCamera::new(descriptor).failing_every(2)) as Box<dyn CaptureDevice>)
    }));
    pipeline.start()?;

    assert!(wait_until(Duration::from_secs(3), || {
        let stats = pipeline.stats();
        stats.source.frames_captured >= 10 && stats.inference.published >= 3
    }));
    pipeline.stop();

    let stats = pipeline.stats();
    assert!(stats.source.capture_errors > 0);
    assert!(stats.source.frames_captured >= 10);
    Ok(())
}

#[test]
fn stop_is_not_blocked_by_an_idle_wait() -> Result<()> {
    let detector = ScriptedDetector::repeating(Vec::new()).with_latency(Duration::from_millis(800));
    let calls = detector.call_counter();
    let pipeline = Pipeline::new(
        &config(30, false),
        Box::new(detector),
        Arc::new(StaticAuthorization::granted()),
    )?;
    pipeline.start()?;
    assert!(wait_until(Duration::from_secs(2), || calls.load(Ordering::SeqCst) >= 1));

    let stop_took = thread::scope(|scope| {
        let waiter = scope.spawn(|| pipeline.wait_idle(Duration::from_secs(3)));
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        pipeline.stop();
        let took = started.elapsed();
        assert!(waiter.join().unwrap_or(false));
        took
    });

    assert!(stop_took < Duration::from_millis(400), "stop took {:?}", stop_took);
    assert_eq!(pipeline.session_state().phase, SessionPhase::Stopped);
    Ok(())
}
