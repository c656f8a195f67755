//! Outbound command encoders.
//!
//! # Wire format
//!
//! ```text
//! ANNOUNCE (GeneralPlus):  [0x50][3 bytes BE: length][0x00][slot][12 bytes: name][0x00 0x00]
//! SLOT OP (GeneralPlus):   [opcode][slot]
//! SLOT STATUS (GeneralPlus): [0x72]
//! PACKET ACK (Nordic):     [0x09][enabled][0x00]
//! TRIGGER (GeneralPlus):   [0x13][0x00][input][index][subindex][specific]
//! ```

use crate::ProtocolError;
use crate::constants::{
    DLC_FILENAME_LEN, GpCommand, MAX_ANNOUNCE_LENGTH, MoodMeterType, NordicCommand, SlotOp,
};

/// Builds the DLC upload announce command.
///
/// The filename is truncated to 12 bytes and null-padded; it must be ASCII.
pub fn announce_dlc(length: u32, slot: u8, filename: &str) -> Result<Vec<u8>, ProtocolError> {
    if length > MAX_ANNOUNCE_LENGTH {
        return Err(ProtocolError::LengthOverflow(length));
    }
    if !filename.is_ascii() {
        return Err(ProtocolError::InvalidFilename(filename.to_string()));
    }

    let mut frame = Vec::with_capacity(8 + DLC_FILENAME_LEN);
    frame.push(GpCommand::AnnounceDlcUpload as u8);
    frame.push((length >> 16) as u8);
    frame.push((length >> 8) as u8);
    frame.push(length as u8);
    frame.push(0x00);
    frame.push(slot);

    let name = filename.as_bytes();
    let take = name.len().min(DLC_FILENAME_LEN);
    frame.extend_from_slice(&name[..take]);
    frame.resize(6 + DLC_FILENAME_LEN, 0x00);
    frame.extend_from_slice(&[0x00, 0x00]);
    Ok(frame)
}

/// Builds a slot lifecycle command (`load`, `activate`, `deactivate`, `delete`).
pub fn slot_command(op: SlotOp, slot: u8) -> Vec<u8> {
    vec![op.opcode(), slot]
}

/// Builds the slot allocation query.
pub fn slot_status_query() -> Vec<u8> {
    vec![GpCommand::GetSlotAllocation as u8]
}

/// Builds the Nordic packet-acknowledgment toggle.
pub fn nordic_packet_ack(enabled: bool) -> Vec<u8> {
    vec![NordicCommand::PacketAck as u8, u8::from(enabled), 0x00]
}

/// Builds a specific-action trigger.
pub fn trigger_action(input: u8, index: u8, subindex: u8, specific: u8) -> Vec<u8> {
    vec![
        GpCommand::TriggerSpecificAction as u8,
        0x00,
        input,
        index,
        subindex,
        specific,
    ]
}

pub fn antenna_color(red: u8, green: u8, blue: u8) -> Vec<u8> {
    vec![GpCommand::SetAntennaColor as u8, red, green, blue]
}

pub fn lcd_backlight(enabled: bool) -> Vec<u8> {
    vec![GpCommand::LcdBacklight as u8, u8::from(enabled)]
}

pub fn debug_menu() -> Vec<u8> {
    vec![GpCommand::LcdDebugMenu as u8]
}

/// Sets the toy's name by table index (0..=128).
pub fn set_name(name_id: u8) -> Result<Vec<u8>, ProtocolError> {
    if name_id > 128 {
        return Err(ProtocolError::OutOfRange {
            field: "name_id",
            value: name_id as u32,
            max: 128,
        });
    }
    Ok(vec![GpCommand::SetName as u8, name_id])
}

/// How a mood meter value is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoodAction {
    /// Add `value` to the current level.
    Increase,
    /// Replace the current level with `value`.
    Set,
}

pub fn set_mood_meter(action: MoodAction, mood: MoodMeterType, value: u8) -> Vec<u8> {
    let action = match action {
        MoodAction::Increase => 0x00,
        MoodAction::Set => 0x01,
    };
    vec![GpCommand::SetMoodMeter as u8, action, mood as u8, value]
}
