//! Scripted in-memory device for exercising the transfer core.

use std::sync::{Arc, Mutex, MutexGuard};

use fluff_protocol::constants::SLOT_STATUS_EMPTY;
use fluff_protocol::{Endpoint, FileTransferMode, SlotOp};

use crate::router::NotificationRouter;
use crate::transport::{Transport, TransportError};

/// Answers writes by pushing notifications straight into the router,
/// before the write returns.
pub(crate) struct FakeDevice {
    router: Arc<NotificationRouter>,
    state: Mutex<FakeState>,
}

pub(crate) struct FakeState {
    pub writes: Vec<(Endpoint, Vec<u8>)>,
    pub max_write: usize,
    /// Reply to an announce; `None` stays silent.
    pub announce_reply: Option<FileTransferMode>,
    /// Sent once every announced byte arrived; `None` stays silent.
    pub completion: Option<FileTransferMode>,
    /// Acknowledge file writes while packet ack is enabled.
    pub ack_chunks: bool,
    /// Success flag for slot command replies; `None` stays silent.
    pub slot_ack: Option<bool>,
    /// Reply for a different slot than the one commanded.
    pub slot_ack_for: Option<u8>,
    /// Reply to a slot status query; `None` stays silent.
    pub slot_status: Option<Vec<u8>>,
    /// Fail the file write with this index.
    pub fail_file_write: Option<usize>,
    /// Push this transfer status right after the file write with this index.
    pub stray_status: Option<(usize, FileTransferMode)>,
    packet_ack: bool,
    expected: usize,
    received: usize,
    completed: bool,
    file_writes: usize,
}

impl FakeDevice {
    pub fn new(router: Arc<NotificationRouter>) -> Arc<Self> {
        Arc::new(Self {
            router,
            state: Mutex::new(FakeState {
                writes: Vec::new(),
                max_write: 20,
                announce_reply: Some(FileTransferMode::ReadyToReceive),
                completion: Some(FileTransferMode::ReceivedOk),
                ack_chunks: true,
                slot_ack: Some(true),
                slot_ack_for: None,
                slot_status: None,
                fail_file_write: None,
                stray_status: None,
                packet_ack: false,
                expected: 0,
                received: 0,
                completed: false,
                file_writes: 0,
            }),
        })
    }

    /// Adjusts the script.
    pub fn script(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn writes_to(&self, endpoint: Endpoint) -> Vec<Vec<u8>> {
        self.script()
            .writes
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn file_writes(&self) -> Vec<Vec<u8>> {
        self.writes_to(Endpoint::FileWrite)
    }

    /// Slot commands written so far, as `(op, slot)`.
    pub fn slot_commands(&self) -> Vec<(SlotOp, u8)> {
        self.writes_to(Endpoint::GeneralPlusWrite)
            .iter()
            .filter_map(|d| Some((SlotOp::from_opcode(*d.first()?)?, *d.get(1)?)))
            .collect()
    }

    /// Handles one write and returns the notifications it provokes.
    fn handle(
        &self,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<Vec<(Endpoint, Vec<u8>)>, TransportError> {
        let mut s = self.script();
        if data.len() > s.max_write {
            return Err(TransportError::Oversized {
                len: data.len(),
                max: s.max_write,
            });
        }
        s.writes.push((endpoint, data.to_vec()));

        let mut out = Vec::new();
        match endpoint {
            Endpoint::NordicWrite => {
                if let [0x09, enabled, ..] = data {
                    s.packet_ack = *enabled != 0;
                }
            }
            Endpoint::GeneralPlusWrite => match data {
                [0x50, a, b, c, ..] => {
                    s.expected = u32::from_be_bytes([0, *a, *b, *c]) as usize;
                    s.received = 0;
                    s.completed = false;
                    if let Some(mode) = s.announce_reply {
                        out.push((Endpoint::GeneralPlusListen, vec![0x24, u8::from(mode)]));
                    }
                }
                [0x72] => {
                    if let Some(codes) = &s.slot_status {
                        let mut frame = vec![0x72, codes.len() as u8];
                        frame.extend_from_slice(codes);
                        out.push((Endpoint::GeneralPlusListen, frame));
                    }
                }
                [op, slot, ..] if SlotOp::from_opcode(*op).is_some() => {
                    if let Some(success) = s.slot_ack {
                        let slot = s.slot_ack_for.unwrap_or(*slot);
                        out.push((
                            Endpoint::GeneralPlusListen,
                            vec![*op, slot, u8::from(success)],
                        ));
                    }
                }
                _ => {}
            },
            Endpoint::FileWrite => {
                let index = s.file_writes;
                s.file_writes += 1;
                if s.fail_file_write == Some(index) {
                    return Err(TransportError::Write {
                        endpoint,
                        reason: "scripted failure".into(),
                    });
                }
                s.received += data.len();
                if s.packet_ack && s.ack_chunks {
                    out.push((Endpoint::NordicListen, vec![0x09, 0x01]));
                }
                if let Some((_, mode)) = s.stray_status.filter(|(at, _)| *at == index) {
                    out.push((Endpoint::GeneralPlusListen, vec![0x24, u8::from(mode)]));
                }
                if s.received >= s.expected && !s.completed {
                    s.completed = true;
                    if let Some(mode) = s.completion {
                        out.push((Endpoint::GeneralPlusListen, vec![0x24, u8::from(mode)]));
                    }
                }
            }
            _ => {}
        }
        Ok(out)
    }
}

impl Transport for FakeDevice {
    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        let replies = self.handle(endpoint, data)?;
        for (endpoint, frame) in replies {
            self.router.on_notification(endpoint, &frame);
        }
        Ok(())
    }

    fn max_write_len(&self) -> usize {
        self.script().max_write
    }
}

/// Status codes for a device with `count` empty slots.
pub(crate) fn empty_status(count: usize) -> Vec<u8> {
    vec![SLOT_STATUS_EMPTY; count]
}
