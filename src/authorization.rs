//! Camera access authorization.
//!
//! The session asks an `AuthorizationProvider` before it touches a device.
//! Prompting a user is outside this crate; providers only report a status
//! and answer a request.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::AuthorizationMode;
use crate::ingest::STUB_PREFIX;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    NotDetermined,
    /// Denied or restricted. Requests are not retried.
    Denied,
}

impl AuthorizationStatus {
    pub fn is_authorized(self) -> bool {
        self == AuthorizationStatus::Authorized
    }
}

pub trait AuthorizationProvider: Send + Sync {
    fn check_authorization(&self) -> AuthorizationStatus;

    /// Ask for access. Only called when the status is `NotDetermined`.
    fn request_authorization(&self) -> bool;
}

/// Fixed answer, configured up front.
pub struct StaticAuthorization {
    status: Mutex<AuthorizationStatus>,
    grant_on_request: bool,
    requests: AtomicU64,
}

impl StaticAuthorization {
    fn with(status: AuthorizationStatus, grant_on_request: bool) -> Self {
        Self {
            status: Mutex::new(status),
            grant_on_request,
            requests: AtomicU64::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::with(AuthorizationStatus::Authorized, true)
    }

    pub fn denied() -> Self {
        Self::with(AuthorizationStatus::Denied, false)
    }

    /// Not determined yet; a request is answered with `grant`.
    pub fn prompt(grant: bool) -> Self {
        Self::with(AuthorizationStatus::NotDetermined, grant)
    }

    /// Number of requests received.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn status(&self) -> AuthorizationStatus {
        match self.status.lock() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl AuthorizationProvider for StaticAuthorization {
    fn check_authorization(&self) -> AuthorizationStatus {
        self.status()
    }

    fn request_authorization(&self) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let answer = if self.grant_on_request {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        match self.status.lock() {
            Ok(mut status) => *status = answer,
            Err(poisoned) => *poisoned.into_inner() = answer,
        }
        self.grant_on_request
    }
}

/// Derives the status from the permissions of a device node.
///
/// Synthetic devices are always authorized. A node that cannot be checked
/// (missing, busy) is `NotDetermined`; opening it later reports the real
/// problem.
pub struct DeviceNodeAuthorization {
    selector: String,
}

impl DeviceNodeAuthorization {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

impl AuthorizationProvider for DeviceNodeAuthorization {
    fn check_authorization(&self) -> AuthorizationStatus {
        if self.selector.starts_with(STUB_PREFIX) {
            return AuthorizationStatus::Authorized;
        }
        match OpenOptions::new().read(true).open(&self.selector) {
            Ok(_) => AuthorizationStatus::Authorized,
            Err(err) if err.kind() == ErrorKind::PermissionDenied => AuthorizationStatus::Denied,
            Err(err) => {
                log::debug!(
                    "DeviceNodeAuthorization: cannot check {}: {}",
                    self.selector,
                    err
                );
                AuthorizationStatus::NotDetermined
            }
        }
    }

    fn request_authorization(&self) -> bool {
        self.check_authorization() != AuthorizationStatus::Denied
    }
}

/// Provider for a configured mode.
pub fn provider_for(mode: AuthorizationMode, selector: &str) -> Arc<dyn AuthorizationProvider> {
    match mode {
        AuthorizationMode::Device => Arc::new(DeviceNodeAuthorization::new(selector)),
        AuthorizationMode::Granted => Arc::new(StaticAuthorization::granted()),
        AuthorizationMode::Denied => Arc::new(StaticAuthorization::denied()),
        AuthorizationMode::Prompt => Arc::new(StaticAuthorization::prompt(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_resolves_on_request() {
        let auth = StaticAuthorization::prompt(false);
        assert_eq!(auth.check_authorization(), AuthorizationStatus::NotDetermined);
        assert!(!auth.request_authorization());
        assert_eq!(auth.check_authorization(), AuthorizationStatus::Denied);
        assert_eq!(auth.requests(), 1);
    }

    #[test]
    fn stub_devices_are_authorized() {
        let auth = DeviceNodeAuthorization::new("stub://back");
        assert!(auth.check_authorization().is_authorized());
    }

    #[test]
    fn missing_nodes_are_not_determined() {
        let auth = DeviceNodeAuthorization::new("/nonexistent/video9");
        assert_eq!(auth.check_authorization(), AuthorizationStatus::NotDetermined);
        assert!(auth.request_authorization());
    }
}
