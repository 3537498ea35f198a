//! Settings persistence for picmeta
//!
//! Settings are a small key-value record persisted as TOML under the user's
//! config directory. Defaults are supplied for unset keys, with environment
//! fallback for the two API-key fields. Mutation replaces the whole record and
//! bumps an observable version atom; readers re-fetch the record rather than
//! diffing fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

use crate::error::{Error, Result};
use crate::store::{Atom, Store};

/// Environment fallback for the Imagga API credential
pub const IMAGGA_KEY_ENV: &str = "PICMETA_IMAGGA_KEY";
/// Environment fallback for the Shutterstock API credential
pub const SHUTTERSTOCK_KEY_ENV: &str = "PICMETA_SHUTTERSTOCK_KEY";

/// Persisted settings record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path or name of the external metadata tool binary
    pub exiftool: String,
    /// Basic credential for tagging Service A
    pub imagga_key: String,
    /// Basic credential for tagging Service B
    pub shutterstock_key: String,
    /// Last opened image, reloaded on startup
    pub last_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exiftool: "exiftool".to_string(),
            imagga_key: std::env::var(IMAGGA_KEY_ENV).unwrap_or_default(),
            shutterstock_key: std::env::var(SHUTTERSTOCK_KEY_ENV).unwrap_or_default(),
            last_file: String::new(),
        }
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub exiftool: Option<String>,
    pub imagga_key: Option<String>,
    pub shutterstock_key: Option<String>,
    pub last_file: Option<String>,
}

/// Singleton settings store with an observable version.
#[derive(Clone)]
pub struct SettingsStore {
    store: Store,
    path: PathBuf,
    current: Arc<Mutex<Settings>>,
    version: Atom<u64>,
}

impl SettingsStore {
    /// Default location: `<config dir>/picmeta/settings.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("picmeta")
            .join("settings.toml")
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable (unreadable files are logged, not fatal).
    pub fn load(store: &Store, path: PathBuf) -> Self {
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str::<Settings>(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "settings file malformed, using defaults");
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "settings file unreadable, using defaults");
                Settings::default()
            }
        };
        Self {
            store: store.clone(),
            path,
            current: Arc::new(Mutex::new(settings)),
            version: store.atom(0u64),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current record (whole-record snapshot).
    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Observable version; bumped on every successful `set`.
    pub fn version(&self) -> Atom<u64> {
        self.version
    }

    /// Replace the record with `update` applied and persist it.
    ///
    /// A failed disk write is logged and does not roll back the in-memory
    /// record; the version still bumps so observers converge on the new value.
    pub fn set(&self, update: SettingsUpdate) -> Result<()> {
        let next = {
            let mut current = self.lock();
            let mut next = current.clone();
            if let Some(exiftool) = update.exiftool {
                next.exiftool = exiftool;
            }
            if let Some(imagga_key) = update.imagga_key {
                next.imagga_key = imagga_key;
            }
            if let Some(shutterstock_key) = update.shutterstock_key {
                next.shutterstock_key = shutterstock_key;
            }
            if let Some(last_file) = update.last_file {
                next.last_file = last_file;
            }
            *current = next.clone();
            next
        };

        if let Err(e) = write_settings(&self.path, &next) {
            warn!(path = %self.path.display(), error = %e, "settings write failed");
        }

        let version = self.store.get(&self.version);
        self.store.set(&self.version, version + 1)?;
        Ok(())
    }
}

/// Write the record atomically: temp file in the same directory, then rename.
fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    let content =
        toml::to_string_pretty(settings).map_err(|e| Error::Config(e.to_string()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
