use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Largest payload a single write on the link may carry.
pub const MAX_PACKET_SIZE: usize = 20;

/// Bytes per file-endpoint packet during a DLC upload.
pub const FILE_CHUNK_SIZE: usize = 20;

/// Action input under which activated DLC content is reachable.
pub const DLC_ACTION_INPUT: u8 = 75;

/// Largest length the 24-bit announce field can carry.
pub const MAX_ANNOUNCE_LENGTH: u32 = 0x00FF_FFFF;

/// Width of the null-padded filename field in the announce command.
pub const DLC_FILENAME_LEN: usize = 12;

/// Slot status codes reported by [`GpResponse::SlotsInfo`].
pub const SLOT_STATUS_EMPTY: u8 = 0x00;
pub const SLOT_STATUS_UPLOADED: u8 = 0x01;
pub const SLOT_STATUS_ACTIVE: u8 = 0x02;

/// GATT characteristics exposed by the toy's "fluff" service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    GeneralPlusWrite,
    GeneralPlusListen,
    NordicWrite,
    NordicListen,
    RssiListen,
    FileWrite,
}

impl Endpoint {
    pub const ALL: [Self; 6] = [
        Self::GeneralPlusWrite,
        Self::GeneralPlusListen,
        Self::NordicWrite,
        Self::NordicListen,
        Self::RssiListen,
        Self::FileWrite,
    ];

    /// 128-bit characteristic UUID.
    pub fn uuid(self) -> &'static str {
        match self {
            Self::GeneralPlusWrite => "dab91383-b5a1-e29c-b041-bcd562613bde",
            Self::GeneralPlusListen => "dab91382-b5a1-e29c-b041-bcd562613bde",
            Self::NordicWrite => "dab90757-b5a1-e29c-b041-bcd562613bde",
            Self::NordicListen => "dab90756-b5a1-e29c-b041-bcd562613bde",
            Self::RssiListen => "dab90755-b5a1-e29c-b041-bcd562613bde",
            Self::FileWrite => "dab90758-b5a1-e29c-b041-bcd562613bde",
        }
    }

    /// Looks up the endpoint for a characteristic UUID, ignoring case.
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.uuid().eq_ignore_ascii_case(uuid))
    }

    /// Returns `true` for characteristics the toy notifies on.
    pub fn is_notify(self) -> bool {
        matches!(
            self,
            Self::GeneralPlusListen | Self::NordicListen | Self::RssiListen
        )
    }
}

/// Commands understood by the GeneralPlus microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GpCommand {
    TriggerActionByInput = 0x10,
    TriggerActionByIndex = 0x11,
    TriggerActionBySubindex = 0x12,
    TriggerSpecificAction = 0x13,
    SetAntennaColor = 0x14,
    SetName = 0x21,
    SetMoodMeter = 0x23,
    SetNotifications = 0x31,
    AnnounceDlcUpload = 0x50,
    DeleteFile = 0x53,
    GetFileSize = 0x54,
    GetChecksum = 0x55,
    LoadDlc = 0x60,
    ActivateDlc = 0x61,
    DeactivateDlc = 0x62,
    GetSlotAllocation = 0x72,
    GetSlotInfo = 0x73,
    DeleteDlcSlot = 0x74,
    LcdDebugMenu = 0xDB,
    LcdBacklight = 0xCD,
    GetFirmware = 0xFE,
}

/// Notification opcodes sent by the GeneralPlus microcontroller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GpResponse {
    FurbyMessage = 0x20,
    SensorStatus = 0x21,
    ImHere = 0x22,
    CurrentMode = 0x23,
    FileTransferMode = 0x24,
    Language = 0x25,
    FurbiesMet = 0x26,
    SlotsInfo = 0x72,
    SlotInfoByIndex = 0x73,
    DeleteSlotByIndex = 0x74,
    ReportDlc = 0xDC,
    FirmwareVersion = 0xFE,
}

/// Commands understood by the Nordic radio controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NordicCommand {
    PacketAck = 0x09,
}

/// Status byte carried by a [`GpResponse::FileTransferMode`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileTransferMode {
    FileAlreadyExists,
    ReadyToReceive,
    TransferTimeout,
    ReadyToAppend,
    ReceivedOk,
    ReceivedError,
}

impl FileTransferMode {
    /// Device accepted the announce and is waiting for data.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::ReadyToReceive | Self::ReadyToAppend)
    }

    /// Device finished (successfully or not) with the current file.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ReceivedOk | Self::ReceivedError | Self::TransferTimeout
        )
    }
}

impl TryFrom<u8> for FileTransferMode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::FileAlreadyExists),
            0x02 => Ok(Self::ReadyToReceive),
            0x03 => Ok(Self::TransferTimeout),
            0x04 => Ok(Self::ReadyToAppend),
            0x05 => Ok(Self::ReceivedOk),
            0x06 => Ok(Self::ReceivedError),
            other => Err(ProtocolError::UnknownTransferMode(other)),
        }
    }
}

impl From<FileTransferMode> for u8 {
    fn from(mode: FileTransferMode) -> u8 {
        match mode {
            FileTransferMode::FileAlreadyExists => 0x01,
            FileTransferMode::ReadyToReceive => 0x02,
            FileTransferMode::TransferTimeout => 0x03,
            FileTransferMode::ReadyToAppend => 0x04,
            FileTransferMode::ReceivedOk => 0x05,
            FileTransferMode::ReceivedError => 0x06,
        }
    }
}

/// Slot lifecycle operations and their command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOp {
    Load,
    Activate,
    Deactivate,
    Delete,
}

impl SlotOp {
    pub fn opcode(self) -> u8 {
        let cmd = match self {
            Self::Load => GpCommand::LoadDlc,
            Self::Activate => GpCommand::ActivateDlc,
            Self::Deactivate => GpCommand::DeactivateDlc,
            Self::Delete => GpCommand::DeleteDlcSlot,
        };
        cmd as u8
    }

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0x60 => Some(Self::Load),
            0x61 => Some(Self::Activate),
            0x62 => Some(Self::Deactivate),
            0x74 => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SlotOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotional dimensions of the mood meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MoodMeterType {
    Excitedness = 0x00,
    Displeasedness = 0x01,
    Tiredness = 0x02,
    Fullness = 0x03,
    Wellness = 0x04,
}
