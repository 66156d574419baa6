//! Device catalog: enumeration and opening of attached HID interfaces
//!
//! The catalog only reports *existence* of candidate interfaces; it never
//! retains handles across calls. Enumeration failure (driver/service
//! unavailable) is an [`EnumerationError`], which the session treats as
//! "no devices found", not as fatal.

use std::ffi::CString;

use async_trait::async_trait;
use hidapi::HidApi;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::descriptor;
use crate::error::{EnumerationError, TransferError};
use crate::types::{DeviceCapabilities, DeviceIdentity, DevicePath};
use crate::{Access, RawDevice};

/// Source of candidate devices and opener of handles.
///
/// The production implementation is [`HidApiCatalog`]; tests substitute mock
/// catalogs behind this trait.
#[async_trait]
pub trait DeviceCatalog: Send + Sync {
    /// List path identifiers for every currently attached device exposing
    /// the target interface class. Safe to call repeatedly; holds no handles.
    async fn enumerate(&self) -> Result<Vec<DevicePath>, EnumerationError>;

    /// Open a handle to one path. `Access::Inspect` requests no exclusive
    /// access so that system-reserved devices (keyboards, mice) can still be
    /// identified; `Access::ReadWrite` requests report exchange access.
    async fn open(
        &self,
        path: &DevicePath,
        access: Access,
    ) -> Result<Box<dyn RawDevice>, TransferError>;
}

/// hidapi-backed catalog for the HID interface class.
pub struct HidApiCatalog {
    /// Optional (usage page, usage) interface filter. Composite devices
    /// expose several HID interfaces under the same VID/PID; the filter
    /// selects the vendor one.
    usage_filter: Option<(u16, u16)>,
}

impl Default for HidApiCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl HidApiCatalog {
    pub fn new() -> Self {
        Self { usage_filter: None }
    }

    /// Restrict enumeration to interfaces with the given usage page/usage.
    pub fn with_usage_filter(usage_page: u16, usage: u16) -> Self {
        Self {
            usage_filter: Some((usage_page, usage)),
        }
    }

    /// Build from session configuration, honoring its usage filter.
    pub fn from_config(config: &crate::config::SessionConfig) -> Self {
        match config.usage_filter {
            Some((page, usage)) => Self::with_usage_filter(page, usage),
            None => Self::new(),
        }
    }

    fn matches_filter(&self, info: &hidapi::DeviceInfo) -> bool {
        match self.usage_filter {
            Some((page, usage)) => info.usage_page() == page && info.usage() == usage,
            None => true,
        }
    }
}

#[async_trait]
impl DeviceCatalog for HidApiCatalog {
    async fn enumerate(&self) -> Result<Vec<DevicePath>, EnumerationError> {
        let api = HidApi::new()?;
        let mut paths = Vec::new();
        for info in api.device_list() {
            if !self.matches_filter(info) {
                continue;
            }
            let path = info.path().to_string_lossy().to_string();
            debug!(
                "candidate: VID={:04X} PID={:04X} path={}",
                info.vendor_id(),
                info.product_id(),
                path
            );
            paths.push(DevicePath(path));
        }
        info!("enumerated {} candidate interfaces", paths.len());
        Ok(paths)
    }

    async fn open(
        &self,
        path: &DevicePath,
        access: Access,
    ) -> Result<Box<dyn RawDevice>, TransferError> {
        let api = HidApi::new().map_err(TransferError::from)?;
        let cpath = CString::new(path.as_str())
            .map_err(|_| TransferError::Faulted(format!("device path contains NUL: {path}")))?;
        let device = api.open_path(&cpath)?;

        let info = device.get_device_info()?;
        let identity = DeviceIdentity {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
        };

        // The descriptor read is an ioctl needing no exclusive access, so
        // capabilities are available on Inspect handles too.
        // hidapi caps descriptors at 4096 bytes (HID_API_MAX_REPORT_DESCRIPTOR_SIZE).
        let mut buf = [0u8; 4096];
        let len = device.get_report_descriptor(&mut buf)?;
        let layout = descriptor::scan(&buf[..len]);

        debug!("opened {} ({:?}) as {}", path, access, identity);
        Ok(Box::new(HidApiDevice {
            device: Mutex::new(device),
            identity,
            layout,
        }))
    }
}

/// One open hidapi handle, exclusively owned by its holder.
///
/// hidapi serializes per-device access internally but the binding is kept
/// behind a mutex; interrupt reads poll with a short timeout and release the
/// lock between polls, so writes interleave with at most one poll interval
/// of added latency.
struct HidApiDevice {
    device: Mutex<hidapi::HidDevice>,
    identity: DeviceIdentity,
    layout: descriptor::ReportLayout,
}

impl RawDevice for HidApiDevice {
    fn identity(&self) -> Result<DeviceIdentity, TransferError> {
        Ok(self.identity)
    }

    fn capabilities(&self) -> Result<DeviceCapabilities, TransferError> {
        Ok(self.layout.capabilities)
    }

    fn flush_input_queue(&self) -> Result<(), TransferError> {
        // Drain whatever the driver queued before we bound. Bounded so a
        // chattering device cannot trap us here.
        let device = self.device.lock();
        let mut buf = [0u8; 256];
        for _ in 0..64 {
            match device.read_timeout(&mut buf, 0) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        Ok(self.device.lock().get_feature_report(buf)?)
    }

    fn send_feature_report(&self, buf: &[u8]) -> Result<(), TransferError> {
        Ok(self.device.lock().send_feature_report(buf)?)
    }

    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        Ok(self.device.lock().get_input_report(buf)?)
    }

    fn send_output_report_control(&self, buf: &[u8]) -> Result<(), TransferError> {
        // hidraw routes writes over the interrupt OUT pipe when the device
        // has one and falls back to a control SET_REPORT otherwise; the
        // distinction lives in the kernel, not in this call.
        self.device.lock().write(buf)?;
        Ok(())
    }

    fn read_interrupt(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransferError> {
        let numbered = self.layout.numbered;
        let device = self.device.lock();
        if numbered {
            Ok(device.read_timeout(buf, timeout_ms)?)
        } else {
            // Devices without report IDs deliver bare payloads; model the
            // report-ID byte of 0 the wire contract promises.
            let n = device.read_timeout(&mut buf[1..], timeout_ms)?;
            if n == 0 {
                return Ok(0);
            }
            buf[0] = 0;
            Ok(n + 1)
        }
    }

    fn write_interrupt(&self, buf: &[u8]) -> Result<usize, TransferError> {
        Ok(self.device.lock().write(buf)?)
    }

    fn is_alive(&self) -> bool {
        self.device.lock().get_product_string().is_ok()
    }
}
