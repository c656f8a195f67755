use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::CacheError;
use crate::device::{DeviceUpdate, KnownDevice};

/// Quiet period before a scheduled save hits the disk.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(1);

/// On-disk layout.
#[derive(Default, Deserialize)]
struct CacheFile {
    #[serde(default)]
    furbies: BTreeMap<String, KnownDevice>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    furbies: &'a BTreeMap<String, KnownDevice>,
}

struct Shared {
    path: PathBuf,
    devices: RwLock<BTreeMap<String, KnownDevice>>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, KnownDevice>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, BTreeMap<String, KnownDevice>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the current entries to disk.
    fn persist(&self) -> Result<(), CacheError> {
        let (json, count) = {
            let devices = self.read();
            let json = serde_json::to_string_pretty(&CacheFileRef {
                furbies: &devices,
            })?;
            (json, devices.len())
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} device(s) to {:?}", count, self.path);
        Ok(())
    }
}

/// Known-device store backed by a JSON file.
///
/// Mutations update memory immediately and schedule a debounced save. Inside
/// a tokio runtime the save runs on a background task after the quiet
/// period; a new mutation restarts the period. Outside a runtime the save is
/// synchronous.
pub struct DeviceCache {
    shared: Arc<Shared>,
    pending: Mutex<Option<JoinHandle<()>>>,
    save_delay: Duration,
}

impl DeviceCache {
    /// Opens the cache at `path`.
    ///
    /// A missing file starts an empty cache. So does an unreadable one,
    /// after logging the problem.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let devices = match load_devices(&path) {
            Ok(devices) => {
                info!("loaded {} known device(s) from {:?}", devices.len(), path);
                devices
            }
            Err(e) => {
                error!("failed to load device cache {:?}: {e}", path);
                warn!("starting with an empty device cache");
                BTreeMap::new()
            }
        };
        Self {
            shared: Arc::new(Shared {
                path,
                devices: RwLock::new(devices),
            }),
            pending: Mutex::new(None),
            save_delay: DEFAULT_SAVE_DELAY,
        }
    }

    /// Overrides the debounce period.
    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Records a sighting of `address`, merging in whatever `update` carries.
    pub fn add_or_update(&self, address: &str, update: DeviceUpdate) -> KnownDevice {
        let now = Utc::now();
        let device = {
            let mut devices = self.shared.write_lock();
            let entry = devices.entry(address.to_string()).or_insert_with(|| {
                info!(address, "adding new device to cache");
                KnownDevice::new(address, now)
            });
            entry.apply(update, now);
            entry.clone()
        };
        self.save();
        device
    }

    pub fn get(&self, address: &str) -> Option<KnownDevice> {
        self.shared.read().get(address).cloned()
    }

    /// All entries, most recently seen first.
    pub fn all(&self) -> Vec<KnownDevice> {
        let mut devices: Vec<KnownDevice> = self.shared.read().values().cloned().collect();
        devices.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.address.cmp(&b.address))
        });
        devices
    }

    pub fn most_recent(&self) -> Option<KnownDevice> {
        self.all().into_iter().next()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.shared.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.read().is_empty()
    }

    /// Removes `address`. Returns `false` if it was not cached.
    pub fn remove(&self, address: &str) -> bool {
        let removed = self.shared.write_lock().remove(address).is_some();
        if removed {
            info!(address, "removed device from cache");
            self.save();
        }
        removed
    }

    pub fn clear(&self) {
        let count = {
            let mut devices = self.shared.write_lock();
            let count = devices.len();
            devices.clear();
            count
        };
        info!("cleared device cache ({count} entries removed)");
        self.save();
    }

    /// Records the toy's name. Returns `false` for an unknown address.
    pub fn update_name(&self, address: &str, name: &str, name_id: u8) -> bool {
        let updated = {
            let mut devices = self.shared.write_lock();
            match devices.get_mut(address) {
                Some(device) => {
                    device.apply(DeviceUpdate::default().name(name, name_id), Utc::now());
                    true
                }
                None => false,
            }
        };
        if updated {
            info!(address, name, name_id, "updated device name");
            self.save();
        } else {
            warn!(address, "cannot update name of unknown device");
        }
        updated
    }

    /// Schedules a debounced save, replacing any save already scheduled.
    pub fn save(&self) {
        let mut pending = self.pending();
        if let Some(handle) = pending.take() {
            handle.abort();
        }

        match Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(&self.shared);
                let delay = self.save_delay;
                *pending = Some(runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = shared.persist() {
                        error!("failed to save device cache: {e}");
                    }
                }));
            }
            Err(_) => {
                if let Err(e) = self.shared.persist() {
                    error!("failed to save device cache: {e}");
                }
            }
        }
    }

    /// Cancels any scheduled save and writes to disk now.
    pub fn flush(&self) -> Result<(), CacheError> {
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }
        self.shared.persist()
    }

    /// Returns `true` while a scheduled save has not yet run.
    pub fn is_save_pending(&self) -> bool {
        self.pending()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_devices(path: &Path) -> Result<BTreeMap<String, KnownDevice>, CacheError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let file: CacheFile = serde_json::from_str(&data)?;
    Ok(file.furbies)
}

/// Returns the default cache location, `<config dir>/fluff/known_furbies.json`.
pub fn default_cache_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("fluff").join("known_furbies.json"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}
