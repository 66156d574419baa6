//! Session controller: at most one report channel, rebuilt across hot-plug
//!
//! Holds the single [`SessionState`] for a target identity and exposes a
//! stable read/write API to the consumer regardless of churn in the
//! underlying device. Hot-plug notifications and transfer outcomes drive the
//! transitions:
//!
//! ```text
//! Searching --discovery ok--------------------> Bound
//! Bound     --read/write issued---------------> TransferInFlight
//! TransferInFlight --Ok / Timeout-------------> Bound
//! TransferInFlight --DeviceGone---------------> Searching (channel closed)
//! Bound/TransferInFlight --detach (dead)------> Searching (channel closed)
//! Searching/Faulted --attach / poll-----------> re-run matcher
//! any --unexpected OS failure-----------------> Faulted
//! ```
//!
//! `Timeout` and enumeration failures are absorbed here (the consumer sees
//! "still waiting"); `DeviceGone` triggers re-discovery with a visible drop
//! to `Searching`; `Faulted` and `InvalidArgument` surface to the caller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::catalog::DeviceCatalog;
use crate::channel::ReportChannel;
use crate::config::SessionConfig;
use crate::error::TransferError;
use crate::matcher;
use crate::stream::{decode_input, InputEvent};
use crate::types::{DeviceCapabilities, HotplugEvent, Report, SessionStatus};

/// Broadcast capacity for decoded input events.
const INPUT_EVENT_CAPACITY: usize = 256;

/// The one piece of state that outlives a device attachment.
///
/// `TransferInFlight` counts concurrent transfers (the IN and OUT pipes are
/// independent), so a write completing cannot prematurely mark an in-flight
/// read's channel as idle. The count lives in an `Arc` shared with each
/// transfer's [`TransferPermit`]; a count of zero means every transfer has
/// finished or been cancelled and the variant is equivalent to `Bound`
/// until the next completed transfer normalizes it.
enum SessionState {
    Searching,
    Bound(Arc<ReportChannel>),
    TransferInFlight {
        channel: Arc<ReportChannel>,
        in_flight: Arc<AtomicU32>,
    },
    Faulted,
}

/// Accounting token for one in-flight transfer.
///
/// Dropping the permit releases the slot even when the owning future is
/// cancelled mid-await, so abandoned transfers can never wedge the session
/// in `TransferInFlight`.
struct TransferPermit {
    channel: Arc<ReportChannel>,
    in_flight: Arc<AtomicU32>,
    released: bool,
}

impl TransferPermit {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for TransferPermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns discovery, binding, and the consumer-facing report API.
pub struct SessionController {
    catalog: Arc<dyn DeviceCatalog>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    input_tx: broadcast::Sender<InputEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(catalog: Arc<dyn DeviceCatalog>, config: SessionConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Searching);
        let (input_tx, _) = broadcast::channel(INPUT_EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            catalog,
            config,
            state: Mutex::new(SessionState::Searching),
            status_tx,
            input_tx,
            shutdown_tx,
        }
    }

    /// Current consumer-visible condition.
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Watch status transitions (Searching / Bound / Faulted).
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to decoded `(sequence, payload)` input events produced by
    /// [`Self::run_input_pump`].
    pub fn subscribe_inputs(&self) -> broadcast::Receiver<InputEvent> {
        self.input_tx.subscribe()
    }

    /// Capabilities of the currently bound device, if any.
    pub async fn capabilities(&self) -> Option<DeviceCapabilities> {
        match &*self.state.lock().await {
            SessionState::Bound(channel)
            | SessionState::TransferInFlight { channel, .. } => Some(*channel.capabilities()),
            _ => None,
        }
    }

    /// Number of transfers currently in flight against the bound channel.
    pub async fn transfers_in_flight(&self) -> u32 {
        match &*self.state.lock().await {
            SessionState::TransferInFlight { in_flight, .. } => {
                in_flight.load(Ordering::SeqCst)
            }
            _ => 0,
        }
    }

    /// Ask the controller loops to stop. Takes effect immediately in
    /// [`Self::run`]; the bound channel (if any) is closed when it exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send_replace(true);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Await the next Input report from the interrupt pipe.
    ///
    /// Returns `DeviceGone` immediately when no device is bound; callers
    /// never block on an absent device.
    pub async fn read_input_report(&self, deadline: Duration) -> Result<Report, TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.read_input_report(deadline).await;
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Write an Output report to the interrupt OUT pipe.
    pub async fn write_output_report(
        &self,
        report: &Report,
        deadline: Duration,
    ) -> Result<(), TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.write_output_report(report, deadline).await;
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Send a Feature report (control transfer).
    pub async fn send_feature_report(&self, report: &Report) -> Result<(), TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.set_feature_report(report);
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Read a Feature report (control transfer).
    pub async fn get_feature_report(&self, report_id: u8) -> Result<Report, TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.get_feature_report(report_id);
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Poll an Input report over the control pipe, bypassing the interrupt
    /// pipe. Report ID 0, per the device convention.
    pub async fn request_input_report(&self) -> Result<Report, TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.get_input_report_via_control(0);
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Send an Output report over the control pipe.
    pub async fn send_output_report(&self, report: &Report) -> Result<(), TransferError> {
        let permit = self.begin_transfer().await?;
        let result = permit.channel.set_output_report_via_control(report);
        self.finish_transfer(permit, &result_outcome(&result)).await;
        result
    }

    /// Drive discovery and hot-plug handling until shutdown or the hot-plug
    /// source closes. This is the single serialization point for state
    /// transitions triggered by external events.
    pub async fn run(self: Arc<Self>, mut hotplug: mpsc::Receiver<HotplugEvent>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.try_bind().await;

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                event = hotplug.recv() => match event {
                    Some(HotplugEvent::Attached) => {
                        debug!("attach notification, re-running discovery");
                        self.handle_attached().await;
                    }
                    Some(HotplugEvent::Detached) => {
                        debug!("detach notification");
                        self.handle_detached().await;
                    }
                    None => {
                        debug!("hot-plug source closed, stopping session loop");
                        break;
                    }
                },
                _ = poll.tick() => {
                    self.try_bind().await;
                }
            }
        }

        let mut state = self.state.lock().await;
        if let SessionState::Bound(channel)
        | SessionState::TransferInFlight { channel, .. } = &*state
        {
            channel.close();
        }
        *state = SessionState::Searching;
        self.status_tx.send_replace(SessionStatus::Searching);
        info!("session loop stopped");
    }

    /// Long-lived input acquisition loop: reads continuously while bound and
    /// broadcasts decoded events to subscribers. Timeouts and device loss
    /// are absorbed; the loop rides out re-discovery.
    pub async fn run_input_pump(self: Arc<Self>) {
        let mut status_rx = self.subscribe_status();
        let deadline = self.config.read_deadline();

        while !self.is_shutdown() {
            if *status_rx.borrow_and_update() != SessionStatus::Bound {
                // Wake on a status transition; the timeout bounds how long a
                // shutdown request can go unnoticed.
                let _ = tokio::time::timeout(deadline, status_rx.changed()).await;
                continue;
            }
            match self.read_input_report(deadline).await {
                Ok(report) => match decode_input(&report) {
                    Some(event) => {
                        let _ = self.input_tx.send(event);
                    }
                    None => debug!("input report too short for a sequence counter"),
                },
                Err(TransferError::Timeout) => continue,
                Err(TransferError::DeviceGone) => continue,
                Err(e) => warn!("input pump: {e}"),
            }
        }
    }

    /// Re-run the matcher if nothing is bound. Enumeration failure and
    /// "no match" are absorbed (retried on the next event or poll).
    async fn try_bind(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, SessionState::Searching | SessionState::Faulted) {
            return;
        }
        match matcher::find_target(self.catalog.as_ref(), self.config.target(), true).await {
            Ok(Some(bound)) => {
                let channel = Arc::new(ReportChannel::new(bound.device, bound.capabilities));
                *state = SessionState::Bound(channel);
                self.status_tx.send_replace(SessionStatus::Bound);
            }
            Ok(None) => debug!("target {} not present", self.config.target()),
            Err(e) => debug!("{e}, treating as no devices"),
        }
    }

    /// An attach was reported. While bound, only a dead channel (a missed
    /// detach) triggers teardown and a fresh match; a healthy binding is
    /// kept so the single-channel guarantee holds.
    async fn handle_attached(&self) {
        {
            let mut state = self.state.lock().await;
            if let SessionState::Bound(channel)
            | SessionState::TransferInFlight { channel, .. } = &*state
            {
                if channel.is_alive() {
                    return;
                }
                info!("bound device no longer answers, rebinding");
                channel.close();
                *state = SessionState::Searching;
                self.status_tx.send_replace(SessionStatus::Searching);
            }
        }
        self.try_bind().await;
    }

    /// A detach was reported somewhere in the USB tree. The event carries no
    /// identity, so ask the bound handle and only tear down if it is dead.
    async fn handle_detached(&self) {
        let mut state = self.state.lock().await;
        let channel = match &*state {
            SessionState::Bound(channel)
            | SessionState::TransferInFlight { channel, .. } => channel.clone(),
            _ => return,
        };
        if channel.is_alive() {
            debug!("detach was for an unrelated device, staying bound");
            return;
        }
        info!("bound device detached, dropping to discovery");
        channel.close();
        *state = SessionState::Searching;
        self.status_tx.send_replace(SessionStatus::Searching);
    }

    async fn begin_transfer(&self) -> Result<TransferPermit, TransferError> {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, SessionState::Searching) {
            SessionState::Searching => Err(TransferError::DeviceGone),
            SessionState::Faulted => {
                *state = SessionState::Faulted;
                Err(TransferError::DeviceGone)
            }
            SessionState::Bound(channel) => {
                let in_flight = Arc::new(AtomicU32::new(1));
                *state = SessionState::TransferInFlight {
                    channel: channel.clone(),
                    in_flight: in_flight.clone(),
                };
                Ok(TransferPermit {
                    channel,
                    in_flight,
                    released: false,
                })
            }
            SessionState::TransferInFlight { channel, in_flight } => {
                in_flight.fetch_add(1, Ordering::SeqCst);
                let permit = TransferPermit {
                    channel: channel.clone(),
                    in_flight: in_flight.clone(),
                    released: false,
                };
                *state = SessionState::TransferInFlight { channel, in_flight };
                Ok(permit)
            }
        }
    }

    async fn finish_transfer(
        &self,
        mut permit: TransferPermit,
        outcome: &Result<(), TransferError>,
    ) {
        let mut state = self.state.lock().await;
        permit.release();
        let channel = permit.channel.clone();
        drop(permit);

        // A detach notification may have swapped the state out while the
        // transfer was in flight; transitions only apply to our channel.
        match outcome {
            Ok(())
            | Err(TransferError::Timeout)
            | Err(TransferError::InvalidArgument(_)) => {
                let idle = matches!(
                    &*state,
                    SessionState::TransferInFlight { channel: c, in_flight }
                        if Arc::ptr_eq(c, &channel) && in_flight.load(Ordering::SeqCst) == 0
                );
                if idle {
                    *state = SessionState::Bound(channel);
                }
            }
            Err(TransferError::DeviceGone) => {
                let ours = matches!(
                    &*state,
                    SessionState::Bound(c)
                    | SessionState::TransferInFlight { channel: c, .. }
                        if Arc::ptr_eq(c, &channel)
                );
                if ours {
                    info!("device gone mid-transfer, dropping to discovery");
                    channel.close();
                    *state = SessionState::Searching;
                    self.status_tx.send_replace(SessionStatus::Searching);
                }
            }
            Err(TransferError::Faulted(msg)) => {
                let ours = matches!(
                    &*state,
                    SessionState::Bound(c)
                    | SessionState::TransferInFlight { channel: c, .. }
                        if Arc::ptr_eq(c, &channel)
                );
                if ours {
                    warn!("transfer faulted: {msg}");
                    channel.close();
                    *state = SessionState::Faulted;
                    self.status_tx.send_replace(SessionStatus::Faulted);
                }
            }
        }
    }
}

fn result_outcome<T>(result: &Result<T, TransferError>) -> Result<(), TransferError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(e.clone()),
    }
}
