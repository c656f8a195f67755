//! Wire protocol for the Furby Connect BLE interface.
//!
//! Opcodes and layouts come from community reverse engineering and are
//! known to be incomplete.

pub mod commands;
pub mod constants;
pub mod notification;

pub use constants::{Endpoint, FileTransferMode, SlotOp};
pub use notification::Notification;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("frame 0x{opcode:02x} truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        opcode: u8,
        expected: usize,
        actual: usize,
    },

    #[error("unknown file transfer mode 0x{0:02x}")]
    UnknownTransferMode(u8),

    #[error("length {0} does not fit in 24 bits")]
    LengthOverflow(u32),

    #[error("filename must be ASCII: {0:?}")]
    InvalidFilename(String),

    #[error("{field} {value} out of range (max {max})")]
    OutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
}
