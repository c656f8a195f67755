//! Per-connection entry point for DLC operations.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fluff_protocol::constants::DLC_ACTION_INPUT;
use fluff_protocol::{Endpoint, Notification, commands};

use crate::TransferError;
use crate::config::TransferConfig;
use crate::lifecycle::SlotLifecycleController;
use crate::progress::ProgressCallback;
use crate::registry::{RegistrySnapshot, SlotRegistry, SlotState};
use crate::router::{NotificationRouter, SignalKind, WaitError};
use crate::session::{TransferSession, UploadReport, UploadRequest};
use crate::transport::Transport;

/// Wires the router, registry, uploads and slot lifecycle to one device.
///
/// The link owner keeps a clone of [`DlcManager::router`] and feeds it
/// every inbound notification.
pub struct DlcManager<T: Transport> {
    transport: Arc<T>,
    router: Arc<NotificationRouter>,
    registry: Arc<SlotRegistry>,
    lifecycle: SlotLifecycleController<T>,
    config: TransferConfig,
}

impl<T: Transport> DlcManager<T> {
    /// Creates a manager with every slot assumed empty.
    ///
    /// Call [`bootstrap`](Self::bootstrap) once the link is up to learn the
    /// device's real slot allocation.
    pub fn new(transport: Arc<T>, router: Arc<NotificationRouter>, config: TransferConfig) -> Self {
        let registry = Arc::new(SlotRegistry::new(config.slot_count));
        let lifecycle = SlotLifecycleController::new(
            Arc::clone(&transport),
            Arc::clone(&router),
            Arc::clone(&registry),
            &config,
        );
        Self {
            transport,
            router,
            registry,
            lifecycle,
            config,
        }
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<SlotRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Serialisable view of all slots.
    pub fn slot_status(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Queries the device's slot allocation and seeds the registry.
    ///
    /// A device that does not answer leaves every slot `Empty`.
    pub async fn bootstrap(&self) -> Result<RegistrySnapshot, TransferError> {
        let waiter = self.router.register(SignalKind::SlotStatus)?;
        self.transport
            .write(Endpoint::GeneralPlusWrite, &commands::slot_status_query())
            .await?;

        match waiter.wait(self.config.status_timeout()).await {
            Ok(Notification::SlotStatus(codes)) => {
                self.registry.apply_status(&codes)?;
                info!(slots = ?codes, "slot allocation loaded from device");
            }
            Ok(other) => {
                return Err(TransferError::Protocol(format!(
                    "unexpected reply to slot query: {other:?}"
                )));
            }
            Err(WaitError::Timeout(_)) => {
                warn!("device did not report slot allocation, assuming all slots empty");
            }
            Err(WaitError::LinkLost(_)) => return Err(TransferError::LinkLost),
        }
        Ok(self.registry.snapshot())
    }

    /// Validates `request` and reserves its slot without starting I/O.
    pub fn begin_upload(&self, request: UploadRequest) -> Result<TransferSession<T>, TransferError> {
        TransferSession::request(
            Arc::clone(&self.transport),
            Arc::clone(&self.router),
            &self.registry,
            &self.config,
            request,
        )
    }

    /// Uploads `request` and waits for the device to confirm it.
    pub async fn upload(
        &self,
        request: UploadRequest,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError> {
        self.begin_upload(request)?
            .run(cancel.clone(), progress)
            .await
    }

    pub async fn load(&self, slot: u8) -> Result<(), TransferError> {
        self.lifecycle.load(slot).await
    }

    pub async fn activate(&self, slot: u8) -> Result<Option<u8>, TransferError> {
        self.lifecycle.activate(slot).await
    }

    pub async fn deactivate(&self) -> Result<Option<u8>, TransferError> {
        self.lifecycle.deactivate().await
    }

    pub async fn delete(&self, slot: u8) -> Result<(), TransferError> {
        self.lifecycle.delete(slot).await
    }

    /// Uploads, loads and activates content in one call.
    ///
    /// A target slot that is currently active is deactivated first. With
    /// `delete_first`, existing content in the slot is deleted before the
    /// upload. The device needs time between steps; the pauses come from
    /// `settle_delay_ms` and `step_delay_ms`.
    pub async fn flash_and_activate(
        &self,
        request: UploadRequest,
        delete_first: bool,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<UploadReport, TransferError> {
        let slot = request.slot;
        let state = self.registry.state(slot)?;
        info!(slot, ?state, delete_first, "flashing slot");

        if state == SlotState::Active {
            self.lifecycle.deactivate().await?;
        }
        if delete_first && state.has_content() {
            self.lifecycle.delete(slot).await?;
            self.pause(self.config.settle_delay(), cancel).await?;
        }

        let report = self.upload(request, progress, cancel).await?;
        self.pause(self.config.settle_delay(), cancel).await?;

        self.lifecycle.load(slot).await?;
        self.pause(self.config.step_delay(), cancel).await?;

        self.lifecycle.activate(slot).await?;
        info!(slot, "slot flashed and active");
        Ok(report)
    }

    /// Triggers an action from the active content package.
    pub async fn trigger_dlc_action(
        &self,
        index: u8,
        subindex: u8,
        specific: u8,
    ) -> Result<(), TransferError> {
        if self.registry.active().is_none() {
            return Err(TransferError::NoActiveSlot);
        }
        let frame = commands::trigger_action(DLC_ACTION_INPUT, index, subindex, specific);
        self.transport
            .write(Endpoint::GeneralPlusWrite, &frame)
            .await?;
        debug!(index, subindex, specific, "dlc action triggered");
        Ok(())
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), TransferError> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use fluff_protocol::SlotOp;

    use super::*;
    use crate::testing::{FakeDevice, empty_status};

    fn manager(config: TransferConfig) -> (DlcManager<FakeDevice>, Arc<FakeDevice>) {
        let router = Arc::new(NotificationRouter::new());
        let device = FakeDevice::new(Arc::clone(&router));
        (DlcManager::new(Arc::clone(&device), router, config), device)
    }

    async fn bootstrapped(codes: &[u8]) -> (DlcManager<FakeDevice>, Arc<FakeDevice>) {
        let (mgr, device) = manager(TransferConfig::default());
        device.script().slot_status = Some(codes.to_vec());
        mgr.bootstrap().await.unwrap();
        (mgr, device)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn bootstrap_seeds_registry() {
        let (mgr, _) = bootstrapped(&[1, 0, 2, 0]).await;
        let snap = mgr.slot_status();
        assert_eq!(snap.active, Some(2));
        assert_eq!(snap.slots[&0], SlotState::Uploaded);
        assert_eq!(snap.slots[&1], SlotState::Empty);
    }

    #[tokio::test]
    async fn bootstrap_tolerates_silent_device() {
        tokio::time::pause();
        let (mgr, device) = manager(TransferConfig::default());
        let snap = mgr.bootstrap().await.unwrap();
        assert!(snap.slots.values().all(|s| *s == SlotState::Empty));
        assert_eq!(device.writes_to(Endpoint::GeneralPlusWrite), vec![vec![0x72]]);
        assert_eq!(mgr.router().outstanding(), 0);
    }

    #[tokio::test]
    async fn upload_with_large_link() {
        tokio::time::pause();
        let config = TransferConfig {
            chunk_size: 200,
            link_max_packet: 512,
            ..TransferConfig::default()
        };
        let (mgr, device) = manager(config);
        device.script().max_write = 512;

        let report = mgr
            .upload(
                UploadRequest::new(2, "TEST.DLC", payload(1600)),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.chunks, 8);
        assert_eq!(device.file_writes().len(), 8);
        assert_eq!(mgr.registry().state(2).unwrap(), SlotState::Uploaded);
    }

    #[tokio::test]
    async fn upload_then_activate_demotes_previous() {
        tokio::time::pause();
        let (mgr, _) = bootstrapped(&[0, 2, 0, 0]).await;
        mgr.upload(
            UploadRequest::new(2, "NEW.DLC", payload(64)),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(mgr.activate(2).await.unwrap(), Some(1));
        let snap = mgr.slot_status();
        assert_eq!(snap.active, Some(2));
        assert_eq!(snap.slots[&1], SlotState::Uploaded);
    }

    #[tokio::test]
    async fn second_upload_is_busy() {
        tokio::time::pause();
        let (mgr, device) = manager(TransferConfig::default());
        let first = mgr
            .begin_upload(UploadRequest::new(0, "A.DLC", payload(10)))
            .unwrap();
        let err = mgr
            .upload(
                UploadRequest::new(1, "B.DLC", payload(10)),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SlotBusy { slot: 0 });
        assert!(device.file_writes().is_empty());

        first.run(CancellationToken::new(), None).await.unwrap();
        assert_eq!(mgr.registry().state(0).unwrap(), SlotState::Uploaded);
        assert_eq!(mgr.registry().state(1).unwrap(), SlotState::Empty);
        assert_eq!(mgr.registry().in_flight(), None);
    }

    #[tokio::test]
    async fn upload_over_active_slot_is_refused() {
        tokio::time::pause();
        let (mgr, device) = bootstrapped(&[0, 0, 2, 0]).await;
        let err = mgr
            .upload(
                UploadRequest::new(2, "X.DLC", payload(10)),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SlotInUse { slot: 2 });
        assert!(device.file_writes().is_empty());
    }

    #[tokio::test]
    async fn flash_replaces_active_content() {
        tokio::time::pause();
        let (mgr, device) = bootstrapped(&[0, 0, 2, 0]).await;
        let report = mgr
            .flash_and_activate(
                UploadRequest::new(2, "NEW.DLC", payload(100)),
                true,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.bytes, 100);
        assert_eq!(
            device.slot_commands(),
            vec![
                (SlotOp::Deactivate, 2),
                (SlotOp::Delete, 2),
                (SlotOp::Load, 2),
                (SlotOp::Activate, 2),
            ]
        );
        assert_eq!(mgr.registry().active(), Some(2));
    }

    #[tokio::test]
    async fn flash_into_empty_slot_skips_delete() {
        tokio::time::pause();
        let (mgr, device) = bootstrapped(&empty_status(4)).await;
        let start = tokio::time::Instant::now();
        mgr.flash_and_activate(
            UploadRequest::new(1, "NEW.DLC", payload(20)),
            true,
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            device.slot_commands(),
            vec![(SlotOp::Load, 1), (SlotOp::Activate, 1)]
        );
        // One settle after upload plus one step delay.
        assert!(start.elapsed() >= Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn flash_cancelled_between_steps() {
        tokio::time::pause();
        let (mgr, device) = bootstrapped(&empty_status(4)).await;
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            mgr.flash_and_activate(
                UploadRequest::new(1, "NEW.DLC", payload(20)),
                false,
                None,
                &cancel,
            ),
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                cancel.cancel();
            }
        );
        assert_eq!(result.unwrap_err(), TransferError::Cancelled);
        // The upload itself committed before the settle pause.
        assert_eq!(mgr.registry().state(1).unwrap(), SlotState::Uploaded);
        assert!(device.slot_commands().is_empty());
    }

    #[tokio::test]
    async fn trigger_requires_active_slot() {
        let (mgr, device) = bootstrapped(&[1, 0, 0, 0]).await;
        assert_eq!(
            mgr.trigger_dlc_action(1, 2, 3).await.unwrap_err(),
            TransferError::NoActiveSlot
        );

        mgr.activate(0).await.unwrap();
        mgr.trigger_dlc_action(1, 2, 3).await.unwrap();
        let last = device.writes_to(Endpoint::GeneralPlusWrite).pop().unwrap();
        assert_eq!(last, vec![0x13, 0x00, 75, 1, 2, 3]);
    }
}
