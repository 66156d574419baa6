//! Report channel: owns one bound device handle and its capabilities
//!
//! Control-transfer style ops (`get_feature_report`, `set_feature_report`,
//! `get_input_report_via_control`, `set_output_report_via_control`) are
//! synchronous and bounded only by the OS call. Interrupt-style ops
//! (`read_input_report`, `write_output_report`) are asynchronous with a
//! mandatory deadline: they suspend the calling task only, and on expiry the
//! caller gets `Timeout` with no partial buffer exposed.
//!
//! Input reports are pumped by a dedicated reader thread into a bounded
//! channel; the thread polls the device with a short timeout so the shutdown
//! flag is honored within a few milliseconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TransferError;
use crate::types::{DeviceCapabilities, Report, ReportKind};
use crate::RawDevice;

/// Poll interval for the reader thread; bounds shutdown latency.
const READ_POLL_MS: i32 = 5;

/// Bounded queue between the reader thread and async readers.
const INPUT_QUEUE_CAPACITY: usize = 256;

/// One open device handle plus its fixed report-size capabilities.
///
/// At most one of these exists per session (enforced by the controller).
/// The raw handle never escapes.
pub struct ReportChannel {
    device: Arc<dyn RawDevice>,
    caps: DeviceCapabilities,
    /// Receiver half of the input pump; the mutex enforces a single
    /// in-flight interrupt read.
    input_rx: Option<tokio::sync::Mutex<mpsc::Receiver<Result<Report, TransferError>>>>,
    /// Single in-flight interrupt write.
    write_lock: tokio::sync::Mutex<()>,
    /// Serializes control-transfer ops.
    control_lock: parking_lot::Mutex<()>,
    closed: Arc<AtomicBool>,
}

impl ReportChannel {
    /// Take ownership of a bound device and start the input pump (when the
    /// device declares input reports).
    pub fn new(device: Box<dyn RawDevice>, caps: DeviceCapabilities) -> Self {
        let device: Arc<dyn RawDevice> = Arc::from(device);
        let closed = Arc::new(AtomicBool::new(false));

        let input_rx = caps.wire_len(ReportKind::Input).map(|wire_len| {
            let (tx, rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
            let device = device.clone();
            let closed = closed.clone();
            std::thread::spawn(move || run_input_reader(device, wire_len, tx, closed));
            tokio::sync::Mutex::new(rx)
        });

        Self {
            device,
            caps,
            input_rx,
            write_lock: tokio::sync::Mutex::new(()),
            control_lock: parking_lot::Mutex::new(()),
            closed,
        }
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    /// Check whether the underlying device still answers.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.device.is_alive()
    }

    /// Release the handle. Idempotent; safe to call on an already-invalid
    /// handle. Subsequent operations fail with `DeviceGone`.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("report channel closed");
        }
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransferError::DeviceGone)
        } else {
            Ok(())
        }
    }

    fn validate(&self, kind: ReportKind, report: &Report) -> Result<(), TransferError> {
        let expected = self
            .caps
            .payload_len(kind)
            .ok_or_else(|| TransferError::unsupported_kind(kind))?;
        if report.payload.len() != expected {
            return Err(TransferError::wrong_payload_len(
                kind,
                expected,
                report.payload.len(),
            ));
        }
        Ok(())
    }

    /// Read a Feature report over the control pipe. Synchronous.
    pub fn get_feature_report(&self, report_id: u8) -> Result<Report, TransferError> {
        let wire_len = self
            .caps
            .wire_len(ReportKind::Feature)
            .ok_or_else(|| TransferError::unsupported_kind(ReportKind::Feature))?;
        self.ensure_open()?;
        let _guard = self.control_lock.lock();
        let mut buf = vec![0u8; wire_len];
        buf[0] = report_id;
        let n = self.device.get_feature_report(&mut buf)?;
        if n != wire_len {
            // Never expose the zero-initialized tail as payload.
            return Err(TransferError::Faulted(format!(
                "short feature report: {n} of {wire_len} bytes"
            )));
        }
        Report::from_wire(&buf[..n])
            .ok_or_else(|| TransferError::Faulted("empty feature report buffer".into()))
    }

    /// Write a Feature report over the control pipe. Synchronous.
    pub fn set_feature_report(&self, report: &Report) -> Result<(), TransferError> {
        self.validate(ReportKind::Feature, report)?;
        self.ensure_open()?;
        let _guard = self.control_lock.lock();
        self.device.send_feature_report(&report.to_wire())
    }

    /// Poll-style Input report read over the control pipe, bypassing the
    /// interrupt pipe. For devices without usable interrupt IN semantics.
    pub fn get_input_report_via_control(&self, report_id: u8) -> Result<Report, TransferError> {
        let wire_len = self
            .caps
            .wire_len(ReportKind::Input)
            .ok_or_else(|| TransferError::unsupported_kind(ReportKind::Input))?;
        self.ensure_open()?;
        let _guard = self.control_lock.lock();
        let mut buf = vec![0u8; wire_len];
        buf[0] = report_id;
        let n = self.device.get_input_report(&mut buf)?;
        if n != wire_len {
            return Err(TransferError::Faulted(format!(
                "short input report: {n} of {wire_len} bytes"
            )));
        }
        Report::from_wire(&buf[..n])
            .ok_or_else(|| TransferError::Faulted("empty input report buffer".into()))
    }

    /// Write an Output report over the control pipe. Synchronous.
    pub fn set_output_report_via_control(&self, report: &Report) -> Result<(), TransferError> {
        self.validate(ReportKind::Output, report)?;
        self.ensure_open()?;
        let _guard = self.control_lock.lock();
        self.device.send_output_report_control(&report.to_wire())
    }

    /// Await the next Input report from the interrupt pipe.
    ///
    /// Suspends the calling task until a report arrives or `deadline`
    /// elapses. On timeout the channel remains usable; no partial state is
    /// ever exposed (the reader thread only forwards complete reports).
    pub async fn read_input_report(&self, deadline: Duration) -> Result<Report, TransferError> {
        let rx = self
            .input_rx
            .as_ref()
            .ok_or_else(|| TransferError::unsupported_kind(ReportKind::Input))?;
        self.ensure_open()?;
        let mut rx = rx.lock().await;
        match tokio::time::timeout(deadline, rx.recv()).await {
            Err(_) => Err(TransferError::Timeout),
            // Pump exited: device removed or reader faulted with its error
            // lost to a full queue. Either way the handle is dead.
            Ok(None) => Err(TransferError::DeviceGone),
            Ok(Some(result)) => result,
        }
    }

    /// Write an Output report to the interrupt OUT pipe.
    ///
    /// Same suspension and deadline contract as [`Self::read_input_report`].
    /// Independent of the IN direction: a read and a write may be in flight
    /// simultaneously, but not two writes.
    pub async fn write_output_report(
        &self,
        report: &Report,
        deadline: Duration,
    ) -> Result<(), TransferError> {
        self.validate(ReportKind::Output, report)?;
        self.ensure_open()?;
        let _guard = self.write_lock.lock().await;
        let device = self.device.clone();
        let wire = report.to_wire();
        let write = tokio::task::spawn_blocking(move || device.write_interrupt(&wire));
        match tokio::time::timeout(deadline, write).await {
            Err(_) => Err(TransferError::Timeout),
            Ok(Err(join)) => Err(TransferError::Faulted(format!("write task failed: {join}"))),
            Ok(Ok(result)) => result.map(|_| ()),
        }
    }
}

impl Drop for ReportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_input_reader(
    device: Arc<dyn RawDevice>,
    wire_len: usize,
    tx: mpsc::Sender<Result<Report, TransferError>>,
    closed: Arc<AtomicBool>,
) {
    debug!("input reader thread started (report wire length {wire_len})");
    let mut buf = vec![0u8; wire_len];

    while !closed.load(Ordering::Relaxed) {
        match device.read_interrupt(&mut buf, READ_POLL_MS) {
            Ok(0) => continue,
            Ok(n) if n != wire_len => {
                // Malformed delivery; the fixed-size invariant forbids
                // surfacing it.
                warn!("dropping malformed input report ({n} of {wire_len} bytes)");
            }
            Ok(n) => {
                let Some(report) = Report::from_wire(&buf[..n]) else {
                    continue;
                };
                match tx.try_send(Ok(report)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("input queue full, dropping report");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Err(e) => {
                debug!("input reader stopping: {e}");
                let _ = tx.try_send(Err(e));
                break;
            }
        }
    }
    debug!("input reader thread exited");
}
