//! Remembers toys seen on previous scans.
//!
//! Entries are keyed by BLE address and persisted to a JSON file. Writes
//! are debounced so a burst of scan results costs one disk write.

mod cache;
mod device;

pub use cache::{DEFAULT_SAVE_DELAY, DeviceCache, default_cache_path};
pub use device::{DeviceUpdate, KnownDevice};

/// Errors from cache persistence.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
