use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::Preferences;

pub const PREFERENCES_FILE: &str = "preferences.json";

pub trait PreferenceStorage: Send {
    /// `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Preferences>, StoreError>;
    fn save(&self, prefs: &Preferences) -> Result<(), StoreError>;
}

/// Stores the two flags as `{"soundEnabled": .., "notificationsEnabled": ..}`.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(PREFERENCES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Writes `bytes` next to `path` and renames over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

impl PreferenceStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Preferences>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(prefs)?;
        write_atomic(&self.path, &bytes)
    }
}

/// Process-local storage; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Arc<Mutex<Option<Preferences>>>,
}

impl PreferenceStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Preferences>, StoreError> {
        Ok(*self.slot.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(*prefs);
        Ok(())
    }
}

pub struct PreferenceStore {
    storage: Box<dyn PreferenceStorage>,
    current: Preferences,
    /// Set while the last write failed; storage is then older than `current`.
    unsaved: bool,
}

impl PreferenceStore {
    /// Reads persisted flags; anything missing or unreadable falls back to defaults.
    pub fn load(storage: impl PreferenceStorage + 'static) -> Self {
        let current = match storage.load() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => {
                debug!("No stored preferences, using defaults");
                Preferences::default()
            }
            Err(e) => {
                warn!("Failed to read preferences, using defaults: {}", e);
                Preferences::default()
            }
        };

        Self {
            storage: Box::new(storage),
            current,
            unsaved: false,
        }
    }

    pub fn get(&self) -> Preferences {
        self.current
    }

    /// Picks up flags written by another process. Returns whether anything changed.
    pub fn reload(&mut self) -> bool {
        if self.unsaved {
            return false;
        }
        let stored = match self.storage.load() {
            Ok(Some(prefs)) => prefs,
            Ok(None) => return false,
            Err(e) => {
                debug!("Keeping current preferences, storage unreadable: {}", e);
                return false;
            }
        };
        if stored == self.current {
            return false;
        }
        info!(
            sound_enabled = stored.sound_enabled,
            notifications_enabled = stored.notifications_enabled,
            "Preferences changed on disk"
        );
        self.current = stored;
        true
    }

    pub fn toggle_sound(&mut self) -> Preferences {
        self.current.sound_enabled = !self.current.sound_enabled;
        self.persist();
        info!(sound_enabled = self.current.sound_enabled, "Sound preference changed");
        self.current
    }

    pub fn toggle_notifications(&mut self) -> Preferences {
        self.current.notifications_enabled = !self.current.notifications_enabled;
        self.persist();
        info!(
            notifications_enabled = self.current.notifications_enabled,
            "Desktop notification preference changed"
        );
        self.current
    }

    fn persist(&mut self) {
        // The in-memory value stays authoritative for this run if the write fails
        match self.storage.save(&self.current) {
            Ok(()) => self.unsaved = false,
            Err(e) => {
                warn!("Failed to persist preferences: {}", e);
                self.unsaved = true;
            }
        }
    }
}
