//! Opaque key/value persistence with optional time-to-live.
//!
//! Holds the OAuth credential record and per-appliance definition caches.
//! Values are JSON so any serde type round-trips. Expiry only marks an
//! entry stale: `get` still returns it, which is what lets callers fall
//! back to old data when a refresh fails.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Error;

/// Persistence interface used by the token authority and appliance caches.
pub trait KeyValueStore: Send + Sync {
    /// The stored value, expired or not.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a value, replacing any previous one. `ttl: None` never expires.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Error>;

    /// `true` if the key is missing or its TTL has elapsed.
    fn has_expired(&self, key: &str) -> bool;

    fn remove(&self, key: &str) -> Result<(), Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        let expires = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        Self { value, expires }
    }

    fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= Utc::now())
    }
}

#[derive(Debug, Default)]
struct Entries(RwLock<HashMap<String, Entry>>);

impl Entries {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.0.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.0
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).map(|e| e.value.clone())
    }

    fn has_expired(&self, key: &str) -> bool {
        self.read().get(key).is_none_or(Entry::is_expired)
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// Volatile store. Used by tests and one-shot CLI invocations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Entries,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Error> {
        self.entries
            .write()
            .insert(key.to_owned(), Entry::new(value, ttl));
        Ok(())
    }

    fn has_expired(&self, key: &str) -> bool {
        self.entries.has_expired(key)
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ── JSON file ────────────────────────────────────────────────────────

/// Store persisted as a single JSON document, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Entries,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| Error::Deserialization {
                message: format!("cache file {}: {e}", path.display()),
                body: String::new(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "opened cache file");
        Ok(Self {
            path,
            entries: Entries(RwLock::new(entries)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write to a sibling temp file, then rename over the original.
    fn persist(&self, entries: &HashMap<String, Entry>) -> Result<(), Error> {
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| Error::Storage(format!("failed to serialize cache: {e}")))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("failed to create {}: {e}", parent.display())))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::Storage(format!("failed to write {}: {e}", self.path.display())))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key)
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), Error> {
        let mut entries = self.entries.write();
        entries.insert(key.to_owned(), Entry::new(value, ttl));
        self.persist(&entries)
    }

    fn has_expired(&self, key: &str) -> bool {
        self.entries.has_expired(key)
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_key_counts_as_expired() {
        let store = MemoryStore::new();
        assert!(store.get("nope").is_none());
        assert!(store.has_expired("nope"));
    }

    #[test]
    fn value_without_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", json!(1), None).unwrap();
        assert!(!store.has_expired("k"));
        assert_eq!(store.get("k"), Some(json!(1)));
    }

    #[test]
    fn expired_value_is_still_readable() {
        let store = MemoryStore::new();
        store.set("k", json!("stale"), Some(Duration::ZERO)).unwrap();
        assert!(store.has_expired("k"));
        assert_eq!(store.get("k"), Some(json!("stale")));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let store = JsonFileStore::open(&path).unwrap();
        store
            .set("token abc", json!({"refresh_token": "r"}), None)
            .unwrap();
        store
            .set("short", json!(2), Some(Duration::from_secs(3600)))
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("token abc"),
            Some(json!({"refresh_token": "r"}))
        );
        assert!(!reopened.has_expired("short"));

        reopened.remove("token abc").unwrap();
        let again = JsonFileStore::open(&path).unwrap();
        assert!(again.get("token abc").is_none());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(Error::Deserialization { .. })
        ));
    }
}
