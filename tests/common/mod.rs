//! Scripted catalog and device for session-layer tests.
//!
//! `MockCatalog` stands in for the OS enumeration service; each attached
//! `MockEntry` describes one device. Opens hand out `MockDevice` handles that
//! share the entry's state, so tests can push input reports, kill the device,
//! and count live handles from the outside.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use usbxr_transport::{
    Access, DeviceCapabilities, DeviceCatalog, DeviceIdentity, DevicePath, EnumerationError,
    RawDevice, TransferError,
};

/// Shared state of one attached (or formerly attached) device.
pub struct MockEntry {
    pub path: DevicePath,
    pub identity: DeviceIdentity,
    pub capabilities: DeviceCapabilities,
    /// Queued input reports in wire form (report ID first).
    pub input_queue: Mutex<VecDeque<Vec<u8>>>,
    /// Wire buffers written to the interrupt OUT pipe.
    pub written: Mutex<Vec<Vec<u8>>>,
    /// Feature reports by report ID, wire form.
    pub features: Mutex<HashMap<u8, Vec<u8>>>,
    /// When false, every transfer fails as if the device were unplugged.
    pub alive: AtomicBool,
    /// Currently open handles against this entry.
    pub open_handles: AtomicI64,
    /// Total opens ever; distinguishes a re-bound fresh handle from a
    /// silently reused one.
    pub generation: AtomicU64,
    /// Access level of every open, in order.
    pub accesses: Mutex<Vec<Access>>,
    /// Number of flush_input_queue calls observed.
    pub flushes: AtomicU64,
}

impl MockEntry {
    pub fn new(path: &str, vendor_id: u16, product_id: u16) -> Arc<Self> {
        Arc::new(Self {
            path: DevicePath(path.to_string()),
            identity: DeviceIdentity {
                vendor_id,
                product_id,
            },
            capabilities: sensor_caps(),
            input_queue: Mutex::new(VecDeque::new()),
            written: Mutex::new(Vec::new()),
            features: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
            open_handles: AtomicI64::new(0),
            generation: AtomicU64::new(0),
            accesses: Mutex::new(Vec::new()),
            flushes: AtomicU64::new(0),
        })
    }

    /// Queue an input report: ID 2, 16-bit LE sequence, 3 data bytes.
    pub fn push_input(&self, sequence: u16, data: [u8; 3]) {
        let mut wire = vec![0x02];
        wire.extend_from_slice(&sequence.to_le_bytes());
        wire.extend_from_slice(&data);
        self.input_queue.lock().push_back(wire);
    }

    /// Simulate surprise removal: pending and future transfers fail.
    pub fn unplug(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn handles(&self) -> i64 {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Capabilities matching the sensor receiver: 6-byte input reports
/// (report ID + sequence counter + 3 data bytes), 8-byte output and
/// feature reports.
pub fn sensor_caps() -> DeviceCapabilities {
    DeviceCapabilities {
        input_report_len: 6,
        output_report_len: 8,
        feature_report_len: 8,
        usage_page: 0xFF00,
        usage: 0x01,
    }
}

pub struct MockCatalog {
    pub entries: Mutex<Vec<Arc<MockEntry>>>,
    /// When true, enumerate() fails as if the discovery service were down.
    pub fail_enumeration: AtomicBool,
}

impl MockCatalog {
    pub fn new(entries: Vec<Arc<MockEntry>>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(entries),
            fail_enumeration: AtomicBool::new(false),
        })
    }

    pub fn attach(&self, entry: Arc<MockEntry>) {
        self.entries.lock().push(entry);
    }

    pub fn detach(&self, path: &str) {
        let mut entries = self.entries.lock();
        if let Some(pos) = entries.iter().position(|e| e.path.as_str() == path) {
            let entry = entries.remove(pos);
            entry.unplug();
        }
    }
}

#[async_trait]
impl DeviceCatalog for MockCatalog {
    async fn enumerate(&self) -> Result<Vec<DevicePath>, EnumerationError> {
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(EnumerationError("discovery service down".into()));
        }
        Ok(self.entries.lock().iter().map(|e| e.path.clone()).collect())
    }

    async fn open(
        &self,
        path: &DevicePath,
        access: Access,
    ) -> Result<Box<dyn RawDevice>, TransferError> {
        let entry = self
            .entries
            .lock()
            .iter()
            .find(|e| e.path == *path)
            .cloned()
            .ok_or(TransferError::DeviceGone)?;
        if !entry.alive.load(Ordering::SeqCst) {
            return Err(TransferError::DeviceGone);
        }
        entry.open_handles.fetch_add(1, Ordering::SeqCst);
        entry.generation.fetch_add(1, Ordering::SeqCst);
        entry.accesses.lock().push(access);
        Ok(Box::new(MockDevice { entry }))
    }
}

pub struct MockDevice {
    entry: Arc<MockEntry>,
}

impl MockDevice {
    fn check_alive(&self) -> Result<(), TransferError> {
        if self.entry.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransferError::DeviceGone)
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.entry.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RawDevice for MockDevice {
    fn identity(&self) -> Result<DeviceIdentity, TransferError> {
        self.check_alive()?;
        Ok(self.entry.identity)
    }

    fn capabilities(&self) -> Result<DeviceCapabilities, TransferError> {
        self.check_alive()?;
        Ok(self.entry.capabilities)
    }

    fn flush_input_queue(&self) -> Result<(), TransferError> {
        self.check_alive()?;
        self.entry.flushes.fetch_add(1, Ordering::SeqCst);
        self.entry.input_queue.lock().clear();
        Ok(())
    }

    fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.check_alive()?;
        let features = self.entry.features.lock();
        let stored = features
            .get(&buf[0])
            .ok_or_else(|| TransferError::Faulted("no stored feature report".into()))?;
        buf[..stored.len()].copy_from_slice(stored);
        Ok(stored.len())
    }

    fn send_feature_report(&self, buf: &[u8]) -> Result<(), TransferError> {
        self.check_alive()?;
        self.entry.features.lock().insert(buf[0], buf.to_vec());
        Ok(())
    }

    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransferError> {
        self.check_alive()?;
        let front = self
            .entry
            .input_queue
            .lock()
            .front()
            .cloned()
            .ok_or_else(|| TransferError::Faulted("no input report available".into()))?;
        buf[..front.len()].copy_from_slice(&front);
        Ok(front.len())
    }

    fn send_output_report_control(&self, buf: &[u8]) -> Result<(), TransferError> {
        self.check_alive()?;
        self.entry.written.lock().push(buf.to_vec());
        Ok(())
    }

    fn read_interrupt(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransferError> {
        self.check_alive()?;
        match self.entry.input_queue.lock().pop_front() {
            Some(wire) => {
                buf[..wire.len()].copy_from_slice(&wire);
                Ok(wire.len())
            }
            None => {
                // Emulate a blocking read timing out without data.
                std::thread::sleep(Duration::from_millis(timeout_ms.max(0) as u64));
                Ok(0)
            }
        }
    }

    fn write_interrupt(&self, buf: &[u8]) -> Result<usize, TransferError> {
        self.check_alive()?;
        self.entry.written.lock().push(buf.to_vec());
        Ok(buf.len())
    }

    fn is_alive(&self) -> bool {
        self.entry.alive.load(Ordering::SeqCst)
    }
}
