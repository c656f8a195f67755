use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A toy seen on a previous scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub address: String,
    /// BLE advertised name, usually "Furby".
    #[serde(default)]
    pub device_name: Option<String>,
    /// Name the toy calls itself.
    #[serde(default)]
    pub name: Option<String>,
    /// Index into the toy's name table.
    #[serde(default)]
    pub name_id: Option<u8>,
    #[serde(default)]
    pub firmware_revision: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl KnownDevice {
    pub(crate) fn new(address: &str, now: DateTime<Utc>) -> Self {
        Self {
            address: address.to_string(),
            device_name: None,
            name: None,
            name_id: None,
            firmware_revision: None,
            last_seen: now,
        }
    }

    /// Applies the fields present in `update` and bumps `last_seen`.
    pub(crate) fn apply(&mut self, update: DeviceUpdate, now: DateTime<Utc>) {
        if let Some(v) = update.device_name {
            self.device_name = Some(v);
        }
        if let Some(v) = update.name {
            self.name = Some(v);
        }
        if let Some(v) = update.name_id {
            self.name_id = Some(v);
        }
        if let Some(v) = update.firmware_revision {
            self.firmware_revision = Some(v);
        }
        self.last_seen = now;
    }
}

/// Fields learned about a device. `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceUpdate {
    pub device_name: Option<String>,
    pub name: Option<String>,
    pub name_id: Option<u8>,
    pub firmware_revision: Option<String>,
}

impl DeviceUpdate {
    pub fn device_name(mut self, value: impl Into<String>) -> Self {
        self.device_name = Some(value.into());
        self
    }

    pub fn name(mut self, value: impl Into<String>, name_id: u8) -> Self {
        self.name = Some(value.into());
        self.name_id = Some(name_id);
        self
    }

    pub fn firmware_revision(mut self, value: impl Into<String>) -> Self {
        self.firmware_revision = Some(value.into());
        self
    }
}
