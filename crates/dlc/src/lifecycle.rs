//! Load / activate / deactivate / delete for uploaded slots.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use fluff_protocol::{Endpoint, Notification, SlotOp, commands};

use crate::TransferError;
use crate::config::TransferConfig;
use crate::registry::SlotRegistry;
use crate::router::{NotificationRouter, SignalKind, WaitError};
use crate::transport::Transport;

/// Drives slot lifecycle commands and keeps the registry in step with the
/// device's acknowledgments.
///
/// Every operation is validated against the registry before any I/O and
/// leaves the registry untouched unless the device acknowledged it.
pub struct SlotLifecycleController<T: Transport> {
    transport: Arc<T>,
    router: Arc<NotificationRouter>,
    registry: Arc<SlotRegistry>,
    ack_timeout: Duration,
}

impl<T: Transport> SlotLifecycleController<T> {
    pub fn new(
        transport: Arc<T>,
        router: Arc<NotificationRouter>,
        registry: Arc<SlotRegistry>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            transport,
            router,
            registry,
            ack_timeout: config.slot_ack_timeout(),
        }
    }

    /// Loads uploaded content from `slot`. Does not change slot state.
    pub async fn load(&self, slot: u8) -> Result<(), TransferError> {
        self.registry.check_lifecycle(slot, SlotOp::Load)?;
        self.exchange(SlotOp::Load, slot).await?;
        info!(slot, "slot loaded");
        Ok(())
    }

    /// Activates `slot`, returning the slot that was demoted, if any.
    pub async fn activate(&self, slot: u8) -> Result<Option<u8>, TransferError> {
        self.registry.check_lifecycle(slot, SlotOp::Activate)?;
        self.exchange(SlotOp::Activate, slot).await?;
        self.registry.mark_active(slot)
    }

    /// Deactivates the active slot, returning it. No-op when nothing is active.
    pub async fn deactivate(&self) -> Result<Option<u8>, TransferError> {
        let Some(slot) = self.registry.active() else {
            debug!("no active slot, nothing to deactivate");
            return Ok(None);
        };
        self.exchange(SlotOp::Deactivate, slot).await?;
        self.registry.mark_deactivated(slot)?;
        Ok(Some(slot))
    }

    /// Deletes the content in `slot`.
    pub async fn delete(&self, slot: u8) -> Result<(), TransferError> {
        self.registry.check_lifecycle(slot, SlotOp::Delete)?;
        self.exchange(SlotOp::Delete, slot).await?;
        self.registry.mark_empty(slot)
    }

    /// Sends `op` for `slot` and waits for the matching acknowledgment.
    async fn exchange(&self, op: SlotOp, slot: u8) -> Result<(), TransferError> {
        let waiter = self.router.register(SignalKind::SlotAck(op))?;
        self.transport
            .write(Endpoint::GeneralPlusWrite, &commands::slot_command(op, slot))
            .await?;
        debug!(%op, slot, "slot command sent");

        match waiter.wait(self.ack_timeout).await {
            Ok(Notification::SlotAck {
                slot: acked,
                success,
                ..
            }) => {
                if acked != slot {
                    return Err(TransferError::Protocol(format!(
                        "{op} acknowledged for slot {acked}, expected {slot}"
                    )));
                }
                if !success {
                    return Err(TransferError::DeviceRefused {
                        operation: op,
                        slot,
                    });
                }
                Ok(())
            }
            Ok(other) => Err(TransferError::Protocol(format!(
                "unexpected reply to {op}: {other:?}"
            ))),
            Err(WaitError::Timeout(_)) => Err(TransferError::Unacknowledged {
                operation: op,
                slot,
            }),
            Err(WaitError::LinkLost(_)) => Err(TransferError::LinkLost),
        }
    }
}
