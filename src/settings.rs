//! Persisted runtime state: mixer values, auto-tune settings and device choices.
//!
//! Stores hold `serde_json::Value`s under fixed keys. Reads are tolerant: a
//! missing or malformed entry yields the caller's default.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

pub mod keys {
    pub const MIXER: &str = "mixer";
    pub const AUTOTUNE: &str = "autotune";
    pub const DEVICE_PA: &str = "devices.pa";
    pub const DEVICE_IEM: &str = "devices.iem";
    pub const DEVICE_INPUT: &str = "devices.input";
}

pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value) -> Result<()>;
}

/// Typed read with a fallback.
pub fn get_or<T: DeserializeOwned>(store: &dyn SettingsStore, key: &str, default: T) -> T {
    match store.get(key) {
        None | Some(Value::Null) => default,
        Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            tracing::warn!(key, %err, "ignoring malformed setting");
            default
        }),
    }
}

/// Typed write.
pub fn put<T: Serialize>(store: &mut dyn SettingsStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, value)
}

/// In-memory store. Clones share their contents, so a test can keep one and
/// inspect what the engine wrote.
#[derive(Clone, Debug, Default)]
pub struct MemorySettings {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: Value) -> Self {
        self.values.lock().insert(key.to_string(), value);
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileSettings {
    /// Open `path`; a missing file starts empty, an unreadable one too (with a warning).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!(path = %path.display(), "settings file is not a JSON object, starting fresh");
                    Map::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| EngineError::Settings(format!("replacing {}: {e}", self.path.display())))
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        self.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DevicePreference;
    use serde_json::json;

    #[test]
    fn missing_and_malformed_fall_back() {
        let store = MemorySettings::new().with(keys::AUTOTUNE, json!("garbage"));
        assert_eq!(get_or(&store, keys::MIXER, 7), 7);
        assert!(!get_or(&store, keys::AUTOTUNE, crate::autotune::AutoTuneSettings::default()).enabled);
    }

    #[test]
    fn clones_share_values() {
        let store = MemorySettings::new();
        let mut writer = store.clone();
        put(&mut writer, keys::DEVICE_PA, &DevicePreference::id("usb")).unwrap();
        assert_eq!(
            get_or(&store, keys::DEVICE_PA, DevicePreference::default()),
            DevicePreference::id("usb")
        );
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = JsonFileSettings::open(&path).unwrap();
        assert!(store.get(keys::MIXER).is_none());
        store.set(keys::MIXER, json!({"vocals_pa": true})).unwrap();

        let reopened = JsonFileSettings::open(&path).unwrap();
        assert_eq!(reopened.get(keys::MIXER), Some(json!({"vocals_pa": true})));
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileSettings::open(&path).unwrap();
        assert!(store.get(keys::MIXER).is_none());
    }
}
