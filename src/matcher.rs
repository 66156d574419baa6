//! Identity matching across enumerated candidates
//!
//! Scan discipline: each candidate is opened without exclusive access just
//! long enough to read its identity, then dropped before the next one is
//! touched; at most one handle is open at any point during the scan, and
//! none survive a non-match. The eventual match is re-opened with the
//! requested access, its capabilities are read, and stale queued input
//! reports are flushed before the handle is handed to the caller.

use tracing::{debug, info};

use crate::catalog::DeviceCatalog;
use crate::error::EnumerationError;
use crate::types::{DeviceCapabilities, DeviceIdentity, DevicePath};
use crate::{Access, RawDevice};

/// A matched device, opened and ready to be owned by a report channel.
pub struct BoundDevice {
    pub path: DevicePath,
    pub identity: DeviceIdentity,
    pub capabilities: DeviceCapabilities,
    pub device: Box<dyn RawDevice>,
}

impl std::fmt::Debug for BoundDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundDevice")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Find and bind the device matching `target`.
///
/// `Ok(None)` is the expected outcome when the device is genuinely absent or
/// not yet enumerated, not an error. Candidates that fail to open or
/// identify are skipped; only enumeration itself failing surfaces as
/// [`EnumerationError`].
pub async fn find_target(
    catalog: &dyn DeviceCatalog,
    target: DeviceIdentity,
    read_write: bool,
) -> Result<Option<BoundDevice>, EnumerationError> {
    let paths = catalog.enumerate().await?;
    debug!("matching {} against {} candidates", target, paths.len());

    for path in paths {
        // Inspection handle lives only for this block.
        let identity = {
            let device = match catalog.open(&path, Access::Inspect).await {
                Ok(device) => device,
                Err(e) => {
                    debug!("skipping {path}: open failed: {e}");
                    continue;
                }
            };
            match device.identity() {
                Ok(identity) => identity,
                Err(e) => {
                    debug!("skipping {path}: identity read failed: {e}");
                    continue;
                }
            }
        };

        if identity != target {
            continue;
        }

        // Re-open with the requested access for report exchange.
        let access = if read_write {
            Access::ReadWrite
        } else {
            Access::Inspect
        };
        let device = match catalog.open(&path, access).await {
            Ok(device) => device,
            Err(e) => {
                debug!("match at {path} but re-open failed: {e}");
                continue;
            }
        };
        let capabilities = match device.capabilities() {
            Ok(caps) => caps,
            Err(e) => {
                debug!("match at {path} but capability read failed: {e}");
                continue;
            }
        };

        if capabilities.input_report_len > 0 {
            // Stale reports queued before we bound belong to nobody.
            if let Err(e) = device.flush_input_queue() {
                debug!("input queue flush failed on {path}: {e}");
            }
        }

        info!(
            "bound {} at {} (input={}, output={}, feature={})",
            identity,
            path,
            capabilities.input_report_len,
            capabilities.output_report_len,
            capabilities.feature_report_len
        );
        return Ok(Some(BoundDevice {
            path,
            identity,
            capabilities,
            device,
        }));
    }

    debug!("no candidate matched {target}");
    Ok(None)
}
