//! Turns inbound device notifications into one-shot waits.
//!
//! Protocol code registers interest in a [`SignalKind`] *before* issuing the
//! write that provokes it, then awaits the returned [`Waiter`]. Notifications
//! nobody is waiting for are dropped, never buffered, so a stale signal can
//! not satisfy a later wait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use fluff_protocol::{Endpoint, FileTransferMode, Notification, SlotOp, notification};

/// Device events protocol code can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Reply to an upload announce (ready, ready-to-append, already-exists).
    TransferReady,
    /// End of an upload (received ok/error, device-side timeout).
    TransferComplete,
    /// Per-packet acknowledgment on the Nordic channel.
    ChunkAck,
    /// Reply to a slot lifecycle command.
    SlotAck(SlotOp),
    /// Slot allocation report.
    SlotStatus,
}

impl SignalKind {
    /// Classifies a decoded notification. Returns `None` for notifications
    /// the transfer core has no interest in.
    pub fn of(notification: &Notification) -> Option<Self> {
        match notification {
            Notification::TransferStatus(mode) => Some(match mode {
                FileTransferMode::ReadyToReceive
                | FileTransferMode::ReadyToAppend
                | FileTransferMode::FileAlreadyExists => Self::TransferReady,
                FileTransferMode::ReceivedOk
                | FileTransferMode::ReceivedError
                | FileTransferMode::TransferTimeout => Self::TransferComplete,
            }),
            Notification::SlotAck { op, .. } => Some(Self::SlotAck(*op)),
            Notification::SlotStatus(_) => Some(Self::SlotStatus),
            Notification::PacketAck(_) => Some(Self::ChunkAck),
            Notification::Other { .. } => None,
        }
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("a waiter for {0:?} is already registered")]
    DuplicateWaiter(SignalKind),
}

/// Why a wait ended without a notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for {0:?}")]
    Timeout(SignalKind),

    #[error("link lost while waiting for {0:?}")]
    LinkLost(SignalKind),
}

type PendingMap = HashMap<SignalKind, (u64, oneshot::Sender<Notification>)>;

/// Demultiplexes device notifications into keyed one-shot waiters.
pub struct NotificationRouter {
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicU64,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a waiter for the next notification of `kind`.
    ///
    /// Fails with [`RouterError::DuplicateWaiter`] if one is already
    /// outstanding. Dropping the waiter deregisters it.
    pub fn register(&self, kind: SignalKind) -> Result<Waiter, RouterError> {
        let mut map = self.lock();
        if map.contains_key(&kind) {
            return Err(RouterError::DuplicateWaiter(kind));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        map.insert(kind, (id, tx));
        trace!(?kind, id, "waiter registered");

        Ok(Waiter {
            kind,
            id,
            rx,
            pending: Arc::downgrade(&self.pending),
        })
    }

    /// Suspends until `waiter` resolves or `timeout` elapses.
    pub async fn await_signal(
        &self,
        waiter: Waiter,
        timeout: Duration,
    ) -> Result<Notification, WaitError> {
        waiter.wait(timeout).await
    }

    /// Routes a raw notification received on `endpoint`.
    ///
    /// Returns `true` if it resolved a waiter. Malformed and unmatched
    /// notifications are logged and dropped.
    pub fn on_notification(&self, endpoint: Endpoint, raw: &[u8]) -> bool {
        let parsed = match notification::parse(endpoint, raw) {
            Ok(n) => n,
            Err(e) => {
                warn!(?endpoint, data = %hex::encode(raw), "dropping malformed notification: {e}");
                return false;
            }
        };

        let Some(kind) = SignalKind::of(&parsed) else {
            trace!(?endpoint, data = %hex::encode(raw), "notification not routed");
            return false;
        };

        let entry = self.lock().remove(&kind);
        match entry {
            Some((id, tx)) => {
                trace!(?kind, id, "resolving waiter");
                // The receiver may have been dropped between lookup and send.
                tx.send(parsed).is_ok()
            }
            None => {
                debug!(?kind, data = %hex::encode(raw), "no waiter, dropping notification");
                false
            }
        }
    }

    /// Routes a notification identified by its characteristic UUID, as BLE
    /// stacks usually report them.
    pub fn on_characteristic_value(&self, uuid: &str, raw: &[u8]) -> bool {
        match Endpoint::from_uuid(uuid) {
            Some(endpoint) => self.on_notification(endpoint, raw),
            None => {
                debug!(uuid, data = %hex::encode(raw), "notification from unknown characteristic");
                false
            }
        }
    }

    /// Fails every outstanding waiter with [`WaitError::LinkLost`].
    pub fn on_link_lost(&self) {
        let mut map = self.lock();
        if !map.is_empty() {
            warn!(outstanding = map.len(), "link lost, releasing waiters");
        }
        map.clear();
    }

    /// Returns `true` if a waiter for `kind` is outstanding.
    pub fn is_waiting(&self, kind: SignalKind) -> bool {
        self.lock().contains_key(&kind)
    }

    /// Number of outstanding waiters.
    pub fn outstanding(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A one-shot registration for a single [`SignalKind`].
pub struct Waiter {
    kind: SignalKind,
    id: u64,
    rx: oneshot::Receiver<Notification>,
    pending: Weak<Mutex<PendingMap>>,
}

impl Waiter {
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// Suspends until the notification arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<Notification, WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(_)) => Err(WaitError::LinkLost(self.kind)),
            Err(_) => Err(WaitError::Timeout(self.kind)),
        }
    }

    /// Takes the notification if it already arrived, without waiting.
    ///
    /// Returns `None` while the waiter is still pending.
    pub fn try_take(&mut self) -> Option<Result<Notification, WaitError>> {
        match self.rx.try_recv() {
            Ok(n) => Some(Ok(n)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(WaitError::LinkLost(self.kind))),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(pending) = self.pending.upgrade() else {
            return;
        };
        let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Only remove our own registration; the slot may already belong to a
        // newer waiter of the same kind.
        if map.get(&self.kind).is_some_and(|(id, _)| *id == self.id) {
            map.remove(&self.kind);
            trace!(kind = ?self.kind, id = self.id, "waiter released");
        }
    }
}
