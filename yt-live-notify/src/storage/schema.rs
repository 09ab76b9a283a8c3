//! Versioned envelope for persisted collections.
//!
//! Every value is stored as `{"version": N, "data": ...}`. Values without a
//! version field predate the envelope and are handed to a caller-supplied
//! migration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::KeyValueStore;
use crate::Result;

/// Current schema version for all persisted collections.
pub const SCHEMA_VERSION: u32 = 1;

/// Storage keys.
pub mod keys {
    pub const SUBSCRIPTIONS: &str = "subscriptions";
    pub const NOTIFICATION_RECORDS: &str = "notification_records";
    pub const COMPLETED_STREAM_IDS: &str = "completed_stream_ids";
    pub const STREAM_STATE: &str = "stream_state";
}

/// Versioned wrapper around a persisted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u32,
    pub data: T,
}

impl<T> Versioned<T> {
    pub fn current(data: T) -> Self {
        Self {
            version: SCHEMA_VERSION,
            data,
        }
    }
}

/// Serialize `data` in the current envelope and store it under `key`.
pub fn write_versioned<T: Serialize>(store: &dyn KeyValueStore, key: &str, data: &T) -> Result<()> {
    let json = serde_json::to_string(&Versioned::current(data))?;
    store.set(key, &json)
}

/// Load the payload stored under `key`.
///
/// Returns `None` when nothing is stored or the payload cannot be used.
/// Corrupt values and unknown future versions are logged and ignored rather
/// than failing startup.
pub fn read_versioned<T, M>(store: &dyn KeyValueStore, key: &str, migrate_legacy: M) -> Option<T>
where
    T: DeserializeOwned,
    M: FnOnce(Value) -> Option<T>,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(key, error = %e, "Failed to read persisted value");
            return None;
        }
    };

    let value: Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(key, error = %e, "Discarding corrupt persisted value");
            return None;
        }
    };

    let version = value.get("version").and_then(Value::as_u64);
    match version {
        Some(v) if v == u64::from(SCHEMA_VERSION) => {
            match serde_json::from_value::<Versioned<T>>(value) {
                Ok(envelope) => Some(envelope.data),
                Err(e) => {
                    warn!(key, error = %e, "Discarding persisted value with invalid shape");
                    None
                }
            }
        }
        Some(v) => {
            warn!(key, version = v, "Ignoring persisted value with unsupported schema version");
            None
        }
        None => migrate_legacy(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_envelope_shape() {
        let store = MemoryStore::new();
        write_versioned(&store, "k", &vec!["a", "b"]).unwrap();

        let raw: Value = serde_json::from_str(&store.get("k").unwrap().unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["data"][1], "b");

        let back: Option<Vec<String>> = read_versioned(&store, "k", |_| None);
        assert_eq!(back.unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_legacy_payload_goes_through_migration() {
        let store = MemoryStore::new();
        store.set("k", r#"["x","y"]"#).unwrap();

        let migrated: Option<Vec<String>> =
            read_versioned(&store, "k", |v| serde_json::from_value(v).ok());
        assert_eq!(migrated.unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_and_future_payloads_are_ignored() {
        let store = MemoryStore::new();
        store.set("corrupt", "{not json").unwrap();
        store.set("future", r#"{"version": 99, "data": []}"#).unwrap();

        let corrupt: Option<Vec<String>> = read_versioned(&store, "corrupt", |_| unreachable!());
        let future: Option<Vec<String>> = read_versioned(&store, "future", |_| unreachable!());
        assert!(corrupt.is_none());
        assert!(future.is_none());
    }
}
