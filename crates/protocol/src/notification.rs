//! Inbound notification decoding.

use crate::ProtocolError;
use crate::constants::{Endpoint, FileTransferMode, GpResponse, SlotOp};

/// A decoded notification from one of the toy's listen characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `[0x24, mode]`: DLC transfer status.
    TransferStatus(FileTransferMode),
    /// `[opcode, slot, success]`: reply to a slot lifecycle command.
    SlotAck { op: SlotOp, slot: u8, success: bool },
    /// `[0x72, count, status...]`: one status code per slot.
    SlotStatus(Vec<u8>),
    /// Any notification on the Nordic listen characteristic while packet
    /// acknowledgment is enabled.
    PacketAck(Vec<u8>),
    /// Everything else (sensor data, "I'm here", mood reports, ...).
    Other {
        endpoint: Endpoint,
        opcode: u8,
        payload: Vec<u8>,
    },
}

/// Decodes a raw notification received on `endpoint`.
pub fn parse(endpoint: Endpoint, raw: &[u8]) -> Result<Notification, ProtocolError> {
    let Some((&opcode, rest)) = raw.split_first() else {
        return Err(ProtocolError::Empty);
    };

    if endpoint == Endpoint::NordicListen {
        return Ok(Notification::PacketAck(raw.to_vec()));
    }
    if endpoint != Endpoint::GeneralPlusListen {
        return Ok(Notification::Other {
            endpoint,
            opcode,
            payload: rest.to_vec(),
        });
    }

    if opcode == GpResponse::FileTransferMode as u8 {
        let &mode = rest.first().ok_or(ProtocolError::Truncated {
            opcode,
            expected: 2,
            actual: raw.len(),
        })?;
        return Ok(Notification::TransferStatus(FileTransferMode::try_from(
            mode,
        )?));
    }

    if opcode == GpResponse::SlotsInfo as u8 && !rest.is_empty() {
        let count = rest[0] as usize;
        let states = &rest[1..];
        if states.len() < count {
            return Err(ProtocolError::Truncated {
                opcode,
                expected: 2 + count,
                actual: raw.len(),
            });
        }
        return Ok(Notification::SlotStatus(states[..count].to_vec()));
    }

    if let Some(op) = SlotOp::from_opcode(opcode) {
        if rest.len() >= 2 {
            return Ok(Notification::SlotAck {
                op,
                slot: rest[0],
                success: rest[1] != 0,
            });
        }
    }

    Ok(Notification::Other {
        endpoint,
        opcode,
        payload: rest.to_vec(),
    })
}
