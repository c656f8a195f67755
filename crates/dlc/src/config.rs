//! Transfer tuning.
//!
//! Timeouts, the payload cap and link geometry are only partially known
//! for the device, so every one of them is a tunable. Configuration is
//! read from TOML; missing keys fall back to the defaults below.
//!
//! ```toml
//! slot_count = 4
//! ack_mode = false
//! ready_timeout_ms = 10000
//! completion_timeout_ms = 300000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fluff_protocol::constants::{FILE_CHUNK_SIZE, MAX_ANNOUNCE_LENGTH, MAX_PACKET_SIZE};

/// Errors from loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for uploads and slot commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of addressable content slots.
    #[serde(default = "default_slot_count")]
    pub slot_count: u8,

    /// Largest payload accepted for upload.
    #[serde(default = "default_max_payload")]
    pub max_payload_size: usize,

    /// Requested chunk size; clamped to `link_max_packet`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Largest single write the link accepts.
    #[serde(default = "default_link_max_packet")]
    pub link_max_packet: usize,

    /// Wait for a per-chunk acknowledgment before sending the next chunk.
    #[serde(default)]
    pub ack_mode: bool,

    /// Delay between streamed chunks.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    #[serde(default = "default_completion_timeout_ms")]
    pub completion_timeout_ms: u64,

    #[serde(default = "default_chunk_ack_timeout_ms")]
    pub chunk_ack_timeout_ms: u64,

    #[serde(default = "default_slot_ack_timeout_ms")]
    pub slot_ack_timeout_ms: u64,

    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,

    /// Pause after delete and after upload in the flash workflow.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Pause after load in the flash workflow.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,

    /// User progress callbacks fire once per this many chunks.
    #[serde(default = "default_progress_interval")]
    pub progress_interval_chunks: usize,
}

fn default_slot_count() -> u8 {
    4
}

fn default_max_payload() -> usize {
    MAX_ANNOUNCE_LENGTH as usize
}

fn default_chunk_size() -> usize {
    FILE_CHUNK_SIZE
}

fn default_link_max_packet() -> usize {
    MAX_PACKET_SIZE
}

fn default_pacing_ms() -> u64 {
    2
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_completion_timeout_ms() -> u64 {
    300_000
}

fn default_chunk_ack_timeout_ms() -> u64 {
    2_000
}

fn default_slot_ack_timeout_ms() -> u64 {
    5_000
}

fn default_status_timeout_ms() -> u64 {
    3_000
}

fn default_settle_delay_ms() -> u64 {
    2_000
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_progress_interval() -> usize {
    50
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            slot_count: default_slot_count(),
            max_payload_size: default_max_payload(),
            chunk_size: default_chunk_size(),
            link_max_packet: default_link_max_packet(),
            ack_mode: false,
            pacing_ms: default_pacing_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            chunk_ack_timeout_ms: default_chunk_ack_timeout_ms(),
            slot_ack_timeout_ms: default_slot_ack_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            step_delay_ms: default_step_delay_ms(),
            progress_interval_chunks: default_progress_interval(),
        }
    }
}

impl TransferConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TransferConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`, or returns the defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no transfer config, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Rejects values the transfer core cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_count == 0 {
            return Err(ConfigError::Invalid("slot_count must be at least 1".into()));
        }
        if self.chunk_size == 0 || self.link_max_packet == 0 {
            return Err(ConfigError::Invalid(
                "chunk_size and link_max_packet must be non-zero".into(),
            ));
        }
        if self.max_payload_size > MAX_ANNOUNCE_LENGTH as usize {
            return Err(ConfigError::Invalid(format!(
                "max_payload_size {} exceeds the 24-bit announce limit",
                self.max_payload_size
            )));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn chunk_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_ack_timeout_ms)
    }

    pub fn slot_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_ack_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}
