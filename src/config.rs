//! Session configuration

use std::time::Duration;

use serde::Deserialize;

use crate::types::DeviceIdentity;

/// Tunables for a device session. Deserializable so hosts can load it from
/// their own config files; every field has a default matching the sensor
/// receiver deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target USB Vendor ID.
    pub vendor_id: u16,
    /// Target USB Product ID.
    pub product_id: u16,
    /// Deadline for interrupt IN reads, in milliseconds.
    pub read_deadline_ms: u64,
    /// Deadline for interrupt OUT writes, in milliseconds.
    pub write_deadline_ms: u64,
    /// Fallback discovery poll interval, in milliseconds. Covers hot-plug
    /// events the OS source misses.
    pub poll_interval_ms: u64,
    /// Optional (usage page, usage) filter for composite devices exposing
    /// several interfaces under one VID/PID.
    pub usage_filter: Option<(u16, u16)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x16C0,
            product_id: 0x05DF,
            read_deadline_ms: 1000,
            write_deadline_ms: 1000,
            poll_interval_ms: 3000,
            usage_filter: None,
        }
    }
}

impl SessionConfig {
    pub fn for_target(identity: DeviceIdentity) -> Self {
        Self {
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
            ..Self::default()
        }
    }

    pub fn target(&self) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
        }
    }

    pub fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.read_deadline_ms)
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
