//! Hot-plug notification source (Linux udev)
//!
//! Forwards USB subsystem add/remove events as [`HotplugEvent`]s. Events
//! carry "something changed" semantics only; the session re-runs its own
//! matcher instead of trusting event payloads, so missed or duplicate events
//! are harmless (the fallback poll covers gaps).

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};
use tracing::{debug, warn};

use crate::error::EnumerationError;
use crate::types::HotplugEvent;

/// Watch the USB subsystem and forward attach/detach notifications into
/// `tx` until the receiving side is dropped.
///
/// Errors only on monitor setup; stream-level errors are logged and skipped.
pub async fn run_udev_watcher(tx: mpsc::Sender<HotplugEvent>) -> Result<(), EnumerationError> {
    let socket = MonitorBuilder::new()
        .and_then(|b| b.match_subsystem("usb"))
        .and_then(|b| b.listen())
        .map_err(|e| EnumerationError(format!("udev monitor setup failed: {e}")))?;
    let mut events = AsyncMonitorSocket::new(socket)
        .map_err(|e| EnumerationError(format!("udev monitor socket failed: {e}")))?;

    debug!("udev watcher started");
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!("udev event error: {e}");
                continue;
            }
        };
        let notification = match event.event_type() {
            EventType::Add | EventType::Bind => HotplugEvent::Attached,
            EventType::Remove | EventType::Unbind => HotplugEvent::Detached,
            _ => continue,
        };
        debug!("udev {:?} -> {notification:?}", event.event_type());
        if tx.send(notification).await.is_err() {
            break;
        }
    }
    debug!("udev watcher stopped");
    Ok(())
}
