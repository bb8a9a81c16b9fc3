//! Camera session lifecycle.
//!
//! The session controller is responsible for:
//! - Checking authorization before any device is touched
//! - Opening, configuring and starting the capture device
//! - Swapping the device or orientation while running
//! - Publishing a `CameraSessionState` snapshot for readers
//!
//! The session controller MUST NOT:
//! - Ask for authorization again after a denial (until reset)
//! - Hold its locks where the capture thread could wait on them

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;

use crate::authorization::{AuthorizationProvider, AuthorizationStatus};
use crate::frame::DeviceOrientation;
use crate::ingest::{self, CaptureDevice, CaptureSettings, DeviceDescriptor, FrameSource};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("camera access denied")]
    AuthorizationDenied,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture configuration failed: {0}")]
    Configuration(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unconfigured,
    Configuring,
    Running,
    Stopped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CameraSessionState {
    pub phase: SessionPhase,
    pub device: Option<DeviceDescriptor>,
    pub orientation: DeviceOrientation,
}

/// Creates the device for a selector. Tests substitute failing devices here.
pub type DeviceOpener =
    Box<dyn Fn(&str) -> anyhow::Result<Box<dyn CaptureDevice>> + Send + Sync>;

struct Inner {
    source: FrameSource,
    selector: String,
    denied: bool,
}

pub struct SessionController {
    inner: Mutex<Inner>,
    state: RwLock<CameraSessionState>,
    auth: Arc<dyn AuthorizationProvider>,
    opener: DeviceOpener,
    settings: CaptureSettings,
}

impl SessionController {
    pub fn new(
        source: FrameSource,
        auth: Arc<dyn AuthorizationProvider>,
        settings: CaptureSettings,
        selector: impl Into<String>,
    ) -> Self {
        let orientation = source.orientation();
        Self {
            inner: Mutex::new(Inner {
                source,
                selector: selector.into(),
                denied: false,
            }),
            state: RwLock::new(CameraSessionState {
                phase: SessionPhase::Unconfigured,
                device: None,
                orientation,
            }),
            auth,
            opener: Box::new(ingest::resolve_device),
            settings,
        }
    }

    pub fn with_device_opener(mut self, opener: DeviceOpener) -> Self {
        self.opener = opener;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_state<F: FnOnce(&mut CameraSessionState)>(&self, f: F) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.update_state(|s| s.phase = phase);
    }

    pub fn state(&self) -> CameraSessionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    /// Authorize, open, configure and start capture.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.source.is_running() {
            return Ok(());
        }
        if inner.denied {
            self.set_phase(SessionPhase::Stopped);
            return Err(SessionError::AuthorizationDenied);
        }

        let authorized = match self.auth.check_authorization() {
            AuthorizationStatus::Authorized => true,
            AuthorizationStatus::Denied => false,
            AuthorizationStatus::NotDetermined => self.auth.request_authorization(),
        };
        if !authorized {
            inner.denied = true;
            self.set_phase(SessionPhase::Stopped);
            log::warn!("SessionController: camera access denied; not retrying");
            return Err(SessionError::AuthorizationDenied);
        }

        self.set_phase(SessionPhase::Configuring);
        let device = match self.prepare_device(&inner.selector) {
            Ok(device) => device,
            Err(err) => {
                self.set_phase(SessionPhase::Stopped);
                log::warn!("SessionController: start aborted: {}", err);
                return Err(err);
            }
        };
        let descriptor = device.descriptor().clone();
        if let Err(err) = inner.source.start(device, self.settings.target_fps) {
            self.set_phase(SessionPhase::Stopped);
            return Err(SessionError::Configuration(format!("{:#}", err)));
        }

        log::info!("SessionController: running on {}", descriptor.selector);
        self.update_state(|s| {
            s.phase = SessionPhase::Running;
            s.device = Some(descriptor);
        });
        Ok(())
    }

    fn prepare_device(&self, selector: &str) -> Result<Box<dyn CaptureDevice>, SessionError> {
        let mut device = (self.opener)(selector)
            .map_err(|err| SessionError::DeviceUnavailable(format!("{:#}", err)))?;
        device
            .open()
            .map_err(|err| SessionError::DeviceUnavailable(format!("{:#}", err)))?;
        device
            .configure(&self.settings)
            .map_err(|err| SessionError::Configuration(format!("{:#}", err)))?;
        Ok(device)
    }

    /// Stop capture and release the device. Valid in every phase.
    pub fn stop(&self) {
        let mut inner = self.lock();
        inner.source.stop();
        self.set_phase(SessionPhase::Stopped);
        log::info!("SessionController: stopped");
    }

    /// Use a different device. While running the input is swapped in place;
    /// otherwise the selector is used on the next start.
    pub fn switch_device(&self, selector: &str) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if !inner.source.is_running() {
            inner.selector = selector.to_string();
            return Ok(());
        }
        let device = self.prepare_device(selector)?;
        let descriptor = device.descriptor().clone();
        inner
            .source
            .switch_device(device)
            .map_err(|err| SessionError::DeviceUnavailable(format!("{:#}", err)))?;
        inner.selector = selector.to_string();
        self.update_state(|s| s.device = Some(descriptor));
        Ok(())
    }

    pub fn set_orientation(&self, orientation: DeviceOrientation) {
        let mut inner = self.lock();
        inner.source.set_orientation(orientation);
        self.update_state(|s| s.orientation = orientation);
    }

    /// Forget a latched denial so the next start asks again.
    pub fn reset_authorization(&self) {
        self.lock().denied = false;
    }

    /// Run `f` against the frame source under the session lock. Keep `f`
    /// short; polling belongs on a `SourceMonitor`.
    pub fn with_source<R>(&self, f: impl FnOnce(&FrameSource) -> R) -> R {
        f(&self.lock().source)
    }
}
