use crate::error::{Error, ErrorKind};
use crate::run_state::{ControllerState, RunState};
use crate::timestamp::Timestamp;
use crate::tone_config::ToneConfig;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const CONFIG_KEY: &str = "sk_config";
pub const RUNNING_KEY: &str = "sk_running";
pub const LAST_PING_KEY: &str = "sk_lastPing";
pub const HEARTBEAT_KEY: &str = "last-heartbeat";

/// Durable key-value store shared by every incarnation of the controller.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    /// Writes all entries in one go.
    fn set(&self, entries: &[(&str, Value)]) -> Result<(), Error>;
}

#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let values = self.values.lock().map_err(|error| {
            Error::new(
                ErrorKind::StorageFailure,
                format!("memory storage poisoned: {}", error),
            )
        })?;

        Ok(values.get(key).cloned())
    }

    fn set(&self, entries: &[(&str, Value)]) -> Result<(), Error> {
        let mut values = self.values.lock().map_err(|error| {
            Error::new(
                ErrorKind::StorageFailure,
                format!("memory storage poisoned: {}", error),
            )
        })?;

        for (key, value) in entries {
            values.insert(key.to_string(), value.clone());
        }

        Ok(())
    }
}

/// Stores every key in a single JSON object on disk, rewritten on each `set`.
pub struct JsonFileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read_all(&self) -> Result<Map<String, Value>, Error> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(error) => {
                return Err(Error::new(
                    ErrorKind::StorageFailure,
                    format!("failed to read {}: {}", self.path.display(), error),
                ))
            }
        };

        match serde_json::from_slice::<Map<String, Value>>(&raw) {
            Ok(values) => Ok(values),
            Err(error) => Err(Error::new(
                ErrorKind::StorageFailure,
                format!("failed to parse {}: {}", self.path.display(), error),
            )),
        }
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let _guard = self.lock.lock().map_err(|error| {
            Error::new(
                ErrorKind::StorageFailure,
                format!("file storage lock poisoned: {}", error),
            )
        })?;

        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, entries: &[(&str, Value)]) -> Result<(), Error> {
        let _guard = self.lock.lock().map_err(|error| {
            Error::new(
                ErrorKind::StorageFailure,
                format!("file storage lock poisoned: {}", error),
            )
        })?;

        let mut values = self.read_all()?;
        for (key, value) in entries {
            values.insert(key.to_string(), value.clone());
        }

        let serialized = serde_json::to_vec_pretty(&values).map_err(|error| {
            Error::new(
                ErrorKind::StorageFailure,
                format!("failed to serialize storage: {}", error),
            )
        })?;

        // Write next to the target and rename so a crash never leaves half a file.
        let temporary_path = self.path.with_extension("tmp");
        std::fs::write(&temporary_path, serialized)
            .and_then(|_| std::fs::rename(&temporary_path, &self.path))
            .map_err(|error| {
                Error::new(
                    ErrorKind::StorageFailure,
                    format!("failed to write {}: {}", self.path.display(), error),
                )
            })
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, value: Option<Value>) -> Option<T> {
    let value = value?;
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            log::warn!("ignoring malformed stored value for {}: {}", key, error);
            None
        }
    }
}

/// Reloads the persisted controller state. Missing, malformed or out-of-range
/// keys fall back to defaults; a stored last ping of `0` means "never pinged".
pub fn load_state(storage: &dyn Storage) -> Result<ControllerState, Error> {
    let config = decode::<ToneConfig>(CONFIG_KEY, storage.get(CONFIG_KEY)?)
        .filter(|config| match config.validate() {
            Ok(_) => true,
            Err(error) => {
                log::warn!("ignoring stored config: {}", error);
                false
            }
        })
        .unwrap_or_default();
    let is_running = decode::<bool>(RUNNING_KEY, storage.get(RUNNING_KEY)?).unwrap_or(false);
    let last_ping_time = decode::<u64>(LAST_PING_KEY, storage.get(LAST_PING_KEY)?)
        .filter(|millis| *millis > 0)
        .map(Timestamp::from_millis);

    Ok(ControllerState {
        config,
        run: RunState {
            is_running,
            last_ping_time,
        },
    })
}

pub fn save_config(storage: &dyn Storage, config: &ToneConfig) -> Result<(), Error> {
    let value = serde_json::to_value(config).map_err(|error| {
        Error::new(
            ErrorKind::StorageFailure,
            format!("failed to serialize config: {}", error),
        )
    })?;

    storage.set(&[(CONFIG_KEY, value)])
}

pub fn save_running(storage: &dyn Storage, is_running: bool) -> Result<(), Error> {
    storage.set(&[(RUNNING_KEY, Value::Bool(is_running))])
}

pub fn save_last_ping(storage: &dyn Storage, last_ping: Option<Timestamp>) -> Result<(), Error> {
    let millis = last_ping.map(|timestamp| timestamp.as_millis()).unwrap_or(0);
    storage.set(&[(LAST_PING_KEY, Value::from(millis))])
}

pub fn save_heartbeat(storage: &dyn Storage, at: Timestamp) -> Result<(), Error> {
    storage.set(&[(HEARTBEAT_KEY, Value::from(at.as_millis()))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn empty_storage_loads_stopped_defaults() {
        let storage = MemoryStorage::new();

        let state = load_state(&storage).unwrap();

        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn state_survives_a_reload() {
        let storage = MemoryStorage::new();
        let config = ToneConfig::new(19_000, 300, 7);

        save_config(&storage, &config).unwrap();
        save_running(&storage, true).unwrap();
        save_last_ping(&storage, Some(Timestamp::from_millis(42_000))).unwrap();

        let state = load_state(&storage).unwrap();

        assert_eq!(state.config, config);
        assert!(state.run.is_running);
        assert_eq!(state.run.last_ping_time, Some(Timestamp::from_millis(42_000)));
    }

    #[test]
    fn malformed_config_falls_back_to_default() {
        let storage = MemoryStorage::new();
        storage
            .set(&[(CONFIG_KEY, serde_json::json!({"frequency": "loud"}))])
            .unwrap();

        assert_eq!(load_state(&storage).unwrap().config, ToneConfig::default());
    }

    #[test]
    fn out_of_range_stored_config_falls_back_to_default() {
        let storage = MemoryStorage::new();

        for interval in [0, u64::MAX / 2] {
            storage
                .set(&[(
                    CONFIG_KEY,
                    serde_json::json!({"frequency": 20000, "duration": 200, "interval": interval}),
                )])
                .unwrap();
            save_running(&storage, true).unwrap();

            let state = load_state(&storage).unwrap();

            assert_eq!(state.config, ToneConfig::default());
            assert!(state.run.is_running);
        }
    }

    #[test]
    fn json_file_storage_persists_across_instances() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("speaker_keepalive_storage_{suffix}.json"));

        {
            let storage = JsonFileStorage::new(&path);
            save_running(&storage, true).unwrap();
            save_heartbeat(&storage, Timestamp::from_millis(5)).unwrap();
        }

        let reopened = JsonFileStorage::new(&path);
        assert_eq!(reopened.get(RUNNING_KEY).unwrap(), Some(Value::Bool(true)));
        assert_eq!(reopened.get(HEARTBEAT_KEY).unwrap(), Some(Value::from(5u64)));
        assert_eq!(reopened.get(CONFIG_KEY).unwrap(), None);

        std::fs::remove_file(path).expect("cleanup");
    }
}
