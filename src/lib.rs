//! Device session layer for the usbXR sensor receiver
//!
//! Maintains a long-lived session with one HID device identified by USB
//! vendor/product ID, across the full device lifecycle:
//!
//! - Discovery and identity matching over enumerated candidates
//! - Handle lifecycle (at most one bound channel per session)
//! - Report exchange: Feature/control transfers and deadline-bounded
//!   interrupt reads/writes
//! - Hot-plug re-acquisition (udev events plus a fallback poll)
//!
//! The consumer talks to a [`SessionController`] and never sees a raw handle;
//! device churn appears only as `Searching`/`Bound` status transitions and
//! `DeviceGone` transfer errors.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod matcher;
pub mod session;
pub mod stream;
pub mod types;

#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub mod hotplug;

pub use catalog::{DeviceCatalog, HidApiCatalog};
pub use channel::ReportChannel;
pub use config::SessionConfig;
pub use error::{EnumerationError, TransferError};
pub use matcher::{find_target, BoundDevice};
pub use session::SessionController;
pub use stream::{decode_input, InputEvent, LossCounter, RateCounter};
pub use types::{
    DeviceCapabilities, DeviceIdentity, DevicePath, HotplugEvent, Report, ReportKind,
    SessionStatus, UsageKind,
};

/// Access level requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Identity-only open: no exclusive access, so system-reserved devices
    /// (keyboards, mice) can still be identified during a scan.
    Inspect,
    /// Full report-exchange access.
    ReadWrite,
}

/// One open device handle, as the rest of the crate sees it.
///
/// The production implementation wraps a hidapi handle (see [`catalog`]);
/// tests substitute scripted devices. All methods are callable from any
/// thread; blocking is bounded by the per-call timeout where one exists.
pub trait RawDevice: Send + Sync + 'static {
    /// Vendor/product identity of the opened device.
    fn identity(&self) -> Result<DeviceIdentity, TransferError>;

    /// Report-size capabilities. Only available on read/write handles.
    fn capabilities(&self) -> Result<DeviceCapabilities, TransferError>;

    /// Discard any input reports queued before the caller bound the device.
    fn flush_input_queue(&self) -> Result<(), TransferError>;

    /// Control-pipe GET_REPORT(Feature). `buf[0]` carries the report ID in
    /// and the full wire report out. Returns bytes read.
    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Control-pipe SET_REPORT(Feature). `buf` is the full wire report.
    fn send_feature_report(&self, buf: &[u8]) -> Result<(), TransferError>;

    /// Control-pipe GET_REPORT(Input), bypassing the interrupt pipe.
    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransferError>;

    /// Output report via the control pipe (or the OS-chosen equivalent).
    fn send_output_report_control(&self, buf: &[u8]) -> Result<(), TransferError>;

    /// Read from the interrupt IN pipe. Blocks at most `timeout_ms`;
    /// `Ok(0)` means no report arrived. `buf[0]` receives the report ID
    /// (0 for devices that do not number their reports).
    fn read_interrupt(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransferError>;

    /// Write to the interrupt OUT pipe. Returns bytes written.
    fn write_interrupt(&self, buf: &[u8]) -> Result<usize, TransferError>;

    /// Check whether the device behind this handle still answers.
    fn is_alive(&self) -> bool;
}
