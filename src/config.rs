use crate::errors::{DaemonError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Recognized keys in the config document. Unrecognized keys round-trip
/// unharmed, but only these are ever written by this process.
pub const KEY_RESTAURANT_ID: &str = "restaurantId";
pub const KEY_DEVICE_NAME: &str = "deviceName";
pub const KEY_FIREBASE_PROJECT_ID: &str = "firebaseProjectId";
pub const KEY_UPDATED_AT: &str = "updatedAt";

/// Platform-specific application-support directory, e.g.
/// `~/Library/Application Support/printer-bridge` on macOS,
/// `%APPDATA%\printer-bridge` on Windows, `~/.config/printer-bridge` on Linux.
pub fn config_dir() -> PathBuf {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir().map(|p| p.join("Library/Application Support"))
    } else {
        dirs::config_dir()
    };
    base.unwrap_or_else(|| PathBuf::from("."))
        .join("printer-bridge")
}

fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// A trivial persistent key/value document at a platform-specific path.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self { path: config_path() }
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load the document. A missing or corrupt file yields an empty map;
    /// this operation never fails.
    pub fn load(&self) -> Map<String, Value> {
        load_from(&self.path)
    }

    /// Save the document, stamping `updatedAt`. Creates parent directories
    /// as needed. Writes to a sibling temp file and renames into place so a
    /// reader never observes a torn write.
    pub fn save(&self, mut map: Map<String, Value>) -> Result<()> {
        map.insert(
            KEY_UPDATED_AT.to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DaemonError::ConfigWriteError(e.to_string()))?;
        }

        let body = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| DaemonError::ConfigWriteError(e.to_string()))?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &body)
            .map_err(|e| DaemonError::ConfigWriteError(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| DaemonError::ConfigWriteError(e.to_string()))?;

        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }

    /// Best-effort delete.
    pub fn clear(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to clear config file: {}", e);
            }
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn load_from(path: &Path) -> Map<String, Value> {
    let Ok(contents) = std::fs::read(path) else {
        return Map::new();
    };
    match serde_json::from_slice::<Value>(&contents) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
