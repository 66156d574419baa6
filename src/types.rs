//! Common types for the device session layer

use serde::Deserialize;

/// USB vendor/product identity used for target matching.
///
/// Read once from an opened device and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct DeviceIdentity {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}

/// Report kinds exchanged with a HID device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// Well-known top-level usages (system-reserved devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Mouse,
    Keyboard,
}

/// Per-device report-size capabilities, read once per opened device.
///
/// Report lengths are wire lengths *including* the report-ID byte. A length
/// of 0 means the device does not support that report kind and it must never
/// be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Input report wire length in bytes
    pub input_report_len: u32,
    /// Output report wire length in bytes
    pub output_report_len: u32,
    /// Feature report wire length in bytes
    pub feature_report_len: u32,
    /// Top-level usage page
    pub usage_page: u16,
    /// Top-level usage
    pub usage: u16,
}

impl DeviceCapabilities {
    /// Wire length for a report kind, `None` when unsupported.
    pub fn wire_len(&self, kind: ReportKind) -> Option<usize> {
        let len = match kind {
            ReportKind::Input => self.input_report_len,
            ReportKind::Output => self.output_report_len,
            ReportKind::Feature => self.feature_report_len,
        };
        (len > 0).then_some(len as usize)
    }

    /// Payload length (wire length minus the report-ID byte).
    pub fn payload_len(&self, kind: ReportKind) -> Option<usize> {
        self.wire_len(kind).map(|len| len.saturating_sub(1))
    }

    /// Recognize system mouse/keyboard usages (generic desktop page).
    pub fn usage_kind(&self) -> Option<UsageKind> {
        match (self.usage_page, self.usage) {
            (0x01, 0x02) => Some(UsageKind::Mouse),
            (0x01, 0x06) => Some(UsageKind::Keyboard),
            _ => None,
        }
    }
}

/// Opaque path identifier for an attached device interface.
///
/// Produced by enumeration; holds no handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevicePath(pub String);

impl DevicePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DevicePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A report-ID-tagged buffer exchanged with the device.
///
/// The wire form is `[report_id, payload...]`; the report ID byte is always
/// present, even for devices that only define report ID 0. Payload length is
/// fixed per kind per device (see [`DeviceCapabilities`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub report_id: u8,
    pub payload: Vec<u8>,
}

impl Report {
    pub fn new(report_id: u8, payload: Vec<u8>) -> Self {
        Self { report_id, payload }
    }

    /// Build from a full wire buffer (report ID first).
    pub fn from_wire(buf: &[u8]) -> Option<Self> {
        let (&report_id, payload) = buf.split_first()?;
        Some(Self {
            report_id,
            payload: payload.to_vec(),
        })
    }

    /// Serialize to the wire form.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + self.payload.len());
        buf.push(self.report_id);
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Hot-plug notification from the external event source.
///
/// Carries "device possibly changed" semantics only; the session always
/// re-runs the matcher rather than trusting event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached,
    Detached,
}

/// Consumer-visible session condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No device bound; discovery re-attempted on hot-plug events or polls.
    Searching,
    /// A device is bound and reports can be exchanged.
    Bound,
    /// An unexpected OS-level failure occurred. Behaves like `Searching`
    /// for recovery purposes but is reported distinctly.
    Faulted,
}
