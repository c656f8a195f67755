//! Upload state machine.
//!
//! ```text
//! Reserved -> Negotiating -> Sending -> AwaitingCompletion -> Committed
//!     \____________\______________\______________\-----------> Aborted
//! ```
//!
//! The slot is reserved when the session is created and released when the
//! session ends. Only a committed session leaves the slot `Uploaded`; every
//! other exit, including dropping the `run` future, restores the slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fluff_protocol::{Endpoint, FileTransferMode, Notification, commands};

use crate::TransferError;
use crate::config::TransferConfig;
use crate::progress::{ProgressCallback, SpeedCalculator, TransferProgress};
use crate::registry::{SlotRegistry, SlotReservation};
use crate::router::{NotificationRouter, SignalKind, WaitError};
use crate::scheduler::ChunkScheduler;
use crate::transport::Transport;

/// Observable phase of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Reserved,
    Negotiating,
    Sending,
    AwaitingCompletion,
    Committed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

/// What to upload and where.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub slot: u8,
    /// Name announced to the device; ASCII, truncated to 12 bytes.
    pub filename: String,
    pub payload: Vec<u8>,
    /// Overrides [`TransferConfig::ack_mode`] for this upload.
    pub ack_mode: Option<bool>,
}

impl UploadRequest {
    pub fn new(slot: u8, filename: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            slot,
            filename: filename.into(),
            payload,
            ack_mode: None,
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: bool) -> Self {
        self.ack_mode = Some(ack_mode);
        self
    }
}

/// Result of a committed upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReport {
    pub session_id: Uuid,
    pub slot: u8,
    pub bytes: usize,
    pub chunks: usize,
    pub acks: usize,
    pub elapsed: Duration,
}

/// One in-flight upload.
pub struct TransferSession<T: Transport> {
    id: Uuid,
    transport: Arc<T>,
    router: Arc<NotificationRouter>,
    scheduler: ChunkScheduler,
    config: TransferConfig,
    request: UploadRequest,
    announce: Vec<u8>,
    ack_mode: bool,
    reservation: SlotReservation,
    state: watch::Sender<SessionState>,
    bytes_sent: AtomicUsize,
}

impl<T: Transport> TransferSession<T> {
    /// Validates `request` and reserves its slot.
    ///
    /// No I/O happens here. On success the slot is `Uploading` until the
    /// returned session is run to completion or dropped.
    pub fn request(
        transport: Arc<T>,
        router: Arc<NotificationRouter>,
        registry: &Arc<SlotRegistry>,
        config: &TransferConfig,
        request: UploadRequest,
    ) -> Result<Self, TransferError> {
        let reservation = registry.reserve(request.slot)?;

        let size = request.payload.len();
        if size > config.max_payload_size {
            return Err(TransferError::PayloadTooLarge {
                size,
                max: config.max_payload_size,
            });
        }
        let length = u32::try_from(size).unwrap_or(u32::MAX);
        let announce = commands::announce_dlc(length, request.slot, &request.filename)?;

        let id = Uuid::new_v4();
        debug!(session = %id, slot = request.slot, bytes = size, "upload session created");
        let (state, _) = watch::channel(SessionState::Reserved);

        Ok(Self {
            id,
            scheduler: ChunkScheduler::new(Arc::clone(&router), config),
            transport,
            router,
            config: config.clone(),
            ack_mode: request.ack_mode.unwrap_or(config.ack_mode),
            request,
            announce,
            reservation,
            state,
            bytes_sent: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot(&self) -> u8 {
        self.reservation.slot()
    }

    pub fn total_bytes(&self) -> usize {
        self.request.payload.len()
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn ack_mode(&self) -> bool {
        self.ack_mode
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watches state transitions. The final value is always terminal.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs the upload to a terminal state.
    ///
    /// Cancelling `cancel` aborts at the next suspension point. Either way
    /// the slot is committed or restored before this returns.
    pub async fn run(
        self,
        cancel: CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadReport, TransferError> {
        let id = self.id;
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            r = self.drive(progress.as_ref()) => r,
        };

        let Self {
            transport,
            reservation,
            state,
            ack_mode,
            ..
        } = self;
        let slot = reservation.slot();

        let outcome = match result {
            Ok(mut report) => {
                reservation.commit();
                state.send_replace(SessionState::Committed);
                report.elapsed = started.elapsed();
                info!(
                    session = %id,
                    slot,
                    bytes = report.bytes,
                    chunks = report.chunks,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "upload committed"
                );
                Ok(report)
            }
            Err(e) => {
                let restored = reservation.previous();
                drop(reservation);
                state.send_replace(SessionState::Aborted);
                warn!(session = %id, slot, ?restored, "upload aborted: {e}");
                Err(e)
            }
        };

        if ack_mode {
            let disable = commands::nordic_packet_ack(false);
            if let Err(e) = transport.write(Endpoint::NordicWrite, &disable).await {
                debug!(session = %id, "failed to disable packet ack: {e}");
            }
        }
        outcome
    }

    async fn drive(&self, progress: Option<&ProgressCallback>) -> Result<UploadReport, TransferError> {
        let slot = self.slot();
        let total = self.total_bytes();

        self.set_state(SessionState::Negotiating);
        if self.ack_mode {
            self.transport
                .write(Endpoint::NordicWrite, &commands::nordic_packet_ack(true))
                .await?;
        }

        let ready = self.router.register(SignalKind::TransferReady)?;
        self.transport
            .write(Endpoint::GeneralPlusWrite, &self.announce)
            .await?;
        match ready.wait(self.config.ready_timeout()).await {
            Ok(Notification::TransferStatus(mode)) if mode.is_ready() => {
                debug!(session = %self.id, ?mode, "device ready");
            }
            Ok(Notification::TransferStatus(mode)) => {
                return Err(TransferError::DeviceRejected { mode });
            }
            Ok(other) => {
                return Err(TransferError::Protocol(format!(
                    "unexpected reply to announce: {other:?}"
                )));
            }
            Err(WaitError::Timeout(_)) => return Err(TransferError::NotReady { slot }),
            Err(WaitError::LinkLost(_)) => return Err(TransferError::LinkLost),
        }

        // Registered before the first chunk: the device may confirm as soon
        // as the last byte lands, before `send` returns. Anything resolving
        // it before the last chunk goes out is not a reply to this payload.
        let mut complete = self.router.register(SignalKind::TransferComplete)?;

        self.set_state(SessionState::Sending);
        let speed = SpeedCalculator::default();
        speed.add_sample(0);
        let interval = self.config.progress_interval_chunks.max(1);
        let mut chunks = 0usize;
        let mut last = 0usize;
        self.emit(progress, SessionState::Sending, &speed);

        let sent = self
            .scheduler
            .send_guarded(
                self.transport.as_ref(),
                &self.request.payload,
                self.config.chunk_size,
                self.ack_mode,
                |offset| match complete.try_take() {
                    None => Ok(()),
                    Some(early) => Err(self.early_completion(early, offset)),
                },
                |bytes| {
                    self.bytes_sent.store(bytes, Ordering::Relaxed);
                    speed.add_sample((bytes - last) as u64);
                    last = bytes;
                    chunks += 1;
                    if chunks % interval == 0 && bytes < total {
                        self.emit(progress, SessionState::Sending, &speed);
                    }
                },
            )
            .await?;

        self.set_state(SessionState::AwaitingCompletion);
        self.emit(progress, SessionState::AwaitingCompletion, &speed);
        debug!(session = %self.id, chunks = sent.chunks, "payload sent, awaiting confirmation");

        match complete.wait(self.config.completion_timeout()).await {
            Ok(Notification::TransferStatus(FileTransferMode::ReceivedOk)) => {}
            Ok(Notification::TransferStatus(mode)) => {
                return Err(TransferError::DeviceRejected { mode });
            }
            Ok(other) => {
                return Err(TransferError::Protocol(format!(
                    "unexpected completion: {other:?}"
                )));
            }
            Err(WaitError::Timeout(_)) => return Err(TransferError::CompletionTimeout { slot }),
            Err(WaitError::LinkLost(_)) => return Err(TransferError::LinkLost),
        }

        Ok(UploadReport {
            session_id: self.id,
            slot,
            bytes: sent.bytes,
            chunks: sent.chunks,
            acks: sent.acks,
            elapsed: Duration::ZERO,
        })
    }

    /// Maps a completion signal that arrived before `offset` was written.
    fn early_completion(
        &self,
        early: Result<Notification, WaitError>,
        offset: usize,
    ) -> TransferError {
        let total = self.total_bytes();
        match early {
            Ok(Notification::TransferStatus(FileTransferMode::ReceivedOk)) => {
                TransferError::Protocol(format!(
                    "device confirmed completion after {offset} of {total} bytes"
                ))
            }
            Ok(Notification::TransferStatus(mode)) => {
                warn!(session = %self.id, ?mode, offset, "device ended transfer early");
                TransferError::DeviceRejected { mode }
            }
            Ok(other) => TransferError::Protocol(format!(
                "unexpected completion at offset {offset}: {other:?}"
            )),
            Err(WaitError::LinkLost(_)) => TransferError::LinkLost,
            Err(WaitError::Timeout(_)) => TransferError::CompletionTimeout { slot: self.slot() },
        }
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        debug!(session = %self.id, from = ?prev, to = ?next, "session state");
    }

    fn emit(&self, progress: Option<&ProgressCallback>, state: SessionState, speed: &SpeedCalculator) {
        let Some(cb) = progress else {
            return;
        };
        let sent = self.bytes_sent();
        let remaining = self.total_bytes().saturating_sub(sent);
        cb(TransferProgress {
            session_id: self.id,
            slot: self.slot(),
            state,
            bytes_sent: sent,
            total_bytes: self.total_bytes(),
            bytes_per_second: speed.bytes_per_second(),
            eta: speed.eta(remaining as u64),
        });
    }
}
