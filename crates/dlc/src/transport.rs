//! Link capability consumed by the transfer core.

use std::future::Future;

use fluff_protocol::Endpoint;
use fluff_protocol::constants::MAX_PACKET_SIZE;

/// Errors reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("link lost")]
    LinkLost,

    #[error("write to {endpoint:?} failed: {reason}")]
    Write { endpoint: Endpoint, reason: String },

    #[error("{len} byte write exceeds link limit of {max}")]
    Oversized { len: usize, max: usize },
}

/// Outbound half of a device connection.
///
/// Implementations perform exactly one write per call and never split the
/// buffer. The inbound half is not part of this trait: the link owner
/// subscribes to the listen characteristics and forwards every notification
/// to [`NotificationRouter::on_notification`](crate::NotificationRouter::on_notification),
/// and reports disconnects via
/// [`NotificationRouter::on_link_lost`](crate::NotificationRouter::on_link_lost).
pub trait Transport: Send + Sync + 'static {
    /// Writes `data` to `endpoint`.
    fn write(
        &self,
        endpoint: Endpoint,
        data: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Largest single write the link accepts.
    fn max_write_len(&self) -> usize {
        MAX_PACKET_SIZE
    }
}
