//! Payload chunking and write pacing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use fluff_protocol::Endpoint;

use crate::TransferError;
use crate::config::TransferConfig;
use crate::router::{NotificationRouter, SignalKind, WaitError};
use crate::transport::Transport;

/// Summary of one completed [`ChunkScheduler::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub chunks: usize,
    pub bytes: usize,
    pub acks: usize,
}

/// Number of writes needed for `len` bytes. An empty payload still takes one.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    len.div_ceil(chunk_size.max(1)).max(1)
}

/// Splits payloads into link-sized writes on the file endpoint.
///
/// In streaming mode chunks go out back to back, separated only by the
/// pacing delay. In ack mode each chunk waits for a packet acknowledgment
/// before the next is written.
pub struct ChunkScheduler {
    router: Arc<NotificationRouter>,
    link_max: usize,
    pacing: Duration,
    ack_timeout: Duration,
}

impl ChunkScheduler {
    pub fn new(router: Arc<NotificationRouter>, config: &TransferConfig) -> Self {
        Self {
            router,
            link_max: config.link_max_packet,
            pacing: config.pacing(),
            ack_timeout: config.chunk_ack_timeout(),
        }
    }

    /// Chunk size used for `requested` over `transport`.
    pub fn effective_chunk_size<T: Transport>(&self, transport: &T, requested: usize) -> usize {
        requested
            .min(self.link_max)
            .min(transport.max_write_len())
            .max(1)
    }

    /// Writes `payload` in chunks.
    ///
    /// `progress` receives the cumulative byte count after every chunk.
    /// The first failure aborts the send with [`TransferError::ChunkFailed`]
    /// carrying the offset of the failing chunk.
    pub async fn send<T: Transport>(
        &self,
        transport: &T,
        payload: &[u8],
        chunk_size: usize,
        ack_mode: bool,
        progress: impl FnMut(usize) + Send,
    ) -> Result<SendReport, TransferError> {
        self.send_guarded(transport, payload, chunk_size, ack_mode, |_| Ok(()), progress)
            .await
    }

    /// Like [`send`](Self::send), but calls `guard` with the chunk offset
    /// before every write. An error from `guard` stops the send and is
    /// returned unchanged.
    pub async fn send_guarded<T: Transport>(
        &self,
        transport: &T,
        payload: &[u8],
        chunk_size: usize,
        ack_mode: bool,
        mut guard: impl FnMut(usize) -> Result<(), TransferError> + Send,
        mut progress: impl FnMut(usize) + Send,
    ) -> Result<SendReport, TransferError> {
        let size = self.effective_chunk_size(transport, chunk_size);
        let total = chunk_count(payload.len(), size);
        debug!(
            bytes = payload.len(),
            chunk_size = size,
            chunks = total,
            ack_mode,
            "sending payload"
        );

        let mut report = SendReport {
            chunks: 0,
            bytes: 0,
            acks: 0,
        };

        // `chunks` yields nothing for an empty slice; the device still
        // expects one write.
        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(size).collect()
        };

        for (index, chunk) in chunks.into_iter().enumerate() {
            let offset = report.bytes;
            guard(offset)?;
            let waiter = if ack_mode {
                Some(self.router.register(SignalKind::ChunkAck)?)
            } else {
                None
            };

            transport
                .write(Endpoint::FileWrite, chunk)
                .await
                .map_err(|e| TransferError::ChunkFailed {
                    offset,
                    reason: e.to_string(),
                })?;

            if let Some(waiter) = waiter {
                waiter
                    .wait(self.ack_timeout)
                    .await
                    .map_err(|e| TransferError::ChunkFailed {
                        offset,
                        reason: match e {
                            WaitError::Timeout(_) => {
                                format!("no acknowledgment within {:?}", self.ack_timeout)
                            }
                            WaitError::LinkLost(_) => "link lost".into(),
                        },
                    })?;
                report.acks += 1;
            }

            report.chunks += 1;
            report.bytes += chunk.len();
            trace!(index, offset, len = chunk.len(), "chunk written");
            progress(report.bytes);

            if !ack_mode && !self.pacing.is_zero() && index + 1 < total {
                tokio::time::sleep(self.pacing).await;
            }
        }

        Ok(report)
    }
}
