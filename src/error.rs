/// Error taxonomy for sensor acquisition and playback orchestration
use std::fmt;
use thiserror::Error;

/// Part of the application an error or log event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    App,
    Ble,
    Playback,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::App => "APP",
            Component::Ble => "BLE",
            Component::Playback => "PLAYBACK",
        };
        write!(f, "[{}]", name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration for {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("Bluetooth adapter error: {0}")]
    Bluetooth(#[source] bluer::Error),

    #[error("no peripheral with address {address} found within {timeout_secs}s")]
    ScanTimeout { address: String, timeout_secs: u64 },

    #[error("device discovery ended before {address} was seen")]
    ScanInterrupted { address: String },

    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: bluer::Error,
    },

    #[error("CSC service not found: {0}")]
    ServiceNotFound(String),

    #[error("CSC measurement characteristic not found: {0}")]
    CharacteristicNotFound(String),

    #[error("failed to subscribe to CSC notifications: {0}")]
    SubscriptionFailed(#[source] bluer::Error),

    #[error("notification stream closed; sensor connection lost")]
    ConnectionLost,

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("{component} task failed: {reason}")]
    TaskFailed {
        component: Component,
        reason: String,
    },

    #[error("{0} did not stop within the shutdown grace period")]
    ShutdownTimeout(Component),

    #[error("operation cancelled")]
    ContextCancelled,
}

impl SyncError {
    /// Component whose failure this error describes
    pub fn component(&self) -> Component {
        match self {
            SyncError::Config { .. } | SyncError::Signal(_) | SyncError::ContextCancelled => {
                Component::App
            }
            SyncError::ShutdownTimeout(component) | SyncError::TaskFailed { component, .. } => {
                *component
            }
            SyncError::Playback(_) => Component::Playback,
            _ => Component::Ble,
        }
    }

    /// Failures that happen while locating the sensor, before any activity runs
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            SyncError::Bluetooth(_)
                | SyncError::ScanTimeout { .. }
                | SyncError::ScanInterrupted { .. }
                | SyncError::ConnectionFailed { .. }
                | SyncError::ServiceNotFound(_)
                | SyncError::CharacteristicNotFound(_)
        )
    }

    /// Cancellation is an orderly unwind, not a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::ContextCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_their_component() {
        assert_eq!(SyncError::ConnectionLost.component(), Component::Ble);
        assert_eq!(
            SyncError::Playback("sink closed".into()).component(),
            Component::Playback
        );
        assert_eq!(SyncError::ContextCancelled.component(), Component::App);
        assert_eq!(
            SyncError::ShutdownTimeout(Component::Playback).component(),
            Component::Playback
        );
    }

    #[test]
    fn scan_timeout_message_names_address() {
        let err = SyncError::ScanTimeout {
            address: "AA:BB:CC:DD:EE:FF".into(),
            timeout_secs: 10,
        };
        assert_eq!(
            err.to_string(),
            "no peripheral with address AA:BB:CC:DD:EE:FF found within 10s"
        );
        assert!(!err.is_cancellation());
        assert!(err.is_startup_failure());
        assert!(!SyncError::ConnectionLost.is_startup_failure());
        assert!(SyncError::ContextCancelled.is_cancellation());
    }
}
