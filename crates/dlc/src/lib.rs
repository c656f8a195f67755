//! DLC transfer core for Furby Connect.
//!
//! Uploads opaque content packages into on-device slots over a
//! notification-driven BLE link and drives the slot load/activate lifecycle.
//! The radio link itself is abstracted behind [`Transport`]; whoever owns the
//! link feeds inbound notifications into [`NotificationRouter`].

mod config;
mod lifecycle;
mod manager;
mod progress;
mod registry;
mod router;
mod scheduler;
mod session;
mod transport;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, TransferConfig};
pub use lifecycle::SlotLifecycleController;
pub use manager::DlcManager;
pub use progress::{ProgressCallback, SpeedCalculator, TransferProgress};
pub use registry::{RegistrySnapshot, SlotRegistry, SlotState};
pub use router::{NotificationRouter, RouterError, SignalKind, WaitError, Waiter};
pub use scheduler::{ChunkScheduler, SendReport};
pub use session::{SessionState, TransferSession, UploadReport, UploadRequest};
pub use transport::{Transport, TransportError};

use fluff_protocol::{FileTransferMode, ProtocolError, SlotOp};

/// Errors produced by the transfer core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("slot {slot} out of range (device has {count} slots)")]
    InvalidSlot { slot: u8, count: u8 },

    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("slot {slot} is busy with an in-flight upload")]
    SlotBusy { slot: u8 },

    #[error("slot {slot} is active; deactivate it first")]
    SlotInUse { slot: u8 },

    #[error("slot {slot} holds no uploaded content ({state:?})")]
    SlotNotUploaded { slot: u8, state: SlotState },

    #[error("no slot is active")]
    NoActiveSlot,

    #[error("device did not signal ready for slot {slot}")]
    NotReady { slot: u8 },

    #[error("device did not confirm upload to slot {slot}")]
    CompletionTimeout { slot: u8 },

    #[error("device did not acknowledge {operation} on slot {slot}")]
    Unacknowledged { operation: SlotOp, slot: u8 },

    #[error("device refused {operation} on slot {slot}")]
    DeviceRefused { operation: SlotOp, slot: u8 },

    #[error("device rejected transfer: {mode:?}")]
    DeviceRejected { mode: FileTransferMode },

    #[error("chunk at offset {offset} failed: {reason}")]
    ChunkFailed { offset: usize, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("link lost")]
    LinkLost,

    #[error("cancelled")]
    Cancelled,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}

impl From<ProtocolError> for TransferError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl TransferError {
    /// Returns `true` for errors raised before any device I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidSlot { .. }
                | Self::PayloadTooLarge { .. }
                | Self::SlotBusy { .. }
                | Self::SlotInUse { .. }
                | Self::SlotNotUploaded { .. }
                | Self::NoActiveSlot
        )
    }

    /// Returns `true` when the device failed to answer within its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. } | Self::CompletionTimeout { .. } | Self::Unacknowledged { .. }
        )
    }
}
