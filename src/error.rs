//! Session error types

use thiserror::Error;

/// The device discovery subsystem itself is unavailable.
///
/// Non-fatal: the session treats it as "no devices found" and retries on the
/// next hot-plug notification or poll. A device genuinely being absent is
/// *not* an error (the matcher returns `None` for that).
#[derive(Error, Debug, Clone)]
#[error("device enumeration unavailable: {0}")]
pub struct EnumerationError(pub String);

/// Errors from report exchange with a bound device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The device did not respond within the deadline. Recoverable: the
    /// channel stays open and the caller may retry.
    #[error("transfer timed out")]
    Timeout,

    /// The handle is invalid or the transport reports the device absent.
    /// Triggers re-discovery, not retry.
    #[error("device removed")]
    DeviceGone,

    /// Unexpected OS-level failure. Logged, surfaced to the caller, and the
    /// session is considered stale.
    #[error("transfer faulted: {0}")]
    Faulted(String),

    /// Caller supplied a report that violates the bound capabilities
    /// (wrong payload length, or a report kind the device declares with
    /// length zero). Programming error, not retried.
    #[error("invalid report argument: {0}")]
    InvalidArgument(String),
}

impl TransferError {
    pub(crate) fn wrong_payload_len(kind: crate::ReportKind, expected: usize, actual: usize) -> Self {
        Self::InvalidArgument(format!(
            "{kind:?} report payload is {actual} bytes, device declares {expected}"
        ))
    }

    pub(crate) fn unsupported_kind(kind: crate::ReportKind) -> Self {
        Self::InvalidArgument(format!("device declares zero-length {kind:?} reports"))
    }
}

/// Classify a hidapi error message: disconnect-like failures become
/// `DeviceGone`, everything else `Faulted`.
pub(crate) fn classify_hid_failure(message: &str) -> TransferError {
    let gone = [
        "No such device",
        "device disconnected",
        "Device is not connected",
        "not connected",
        "ENODEV",
        "EIO",
    ];
    if gone.iter().any(|needle| message.contains(needle)) {
        TransferError::DeviceGone
    } else {
        TransferError::Faulted(message.to_string())
    }
}

impl From<hidapi::HidError> for TransferError {
    fn from(e: hidapi::HidError) -> Self {
        classify_hid_failure(&e.to_string())
    }
}

impl From<hidapi::HidError> for EnumerationError {
    fn from(e: hidapi::HidError) -> Self {
        EnumerationError(e.to_string())
    }
}
