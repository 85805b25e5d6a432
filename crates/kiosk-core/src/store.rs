//! # Credential Store
//!
//! Durable key/value storage for tokens, identifiers, and ledger state.
//! Pure storage, no policy. A missing key always means "not yet set";
//! every record must be reconstructable from absence.

use crate::error::{KioskError, KioskResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Well-known storage keys
pub mod keys {
    /// Serialized [`crate::credential::Credential`]
    pub const CREDENTIAL: &str = "credential";
    /// Serialized [`crate::credential::PendingAuthorization`]
    pub const PENDING_AUTHORIZATION: &str = "pending_authorization";
    /// Serialized idempotency-ledger map
    pub const IDEMPOTENCY_LEDGER: &str = "idempotency_ledger";
}

/// Durable key/value storage for session and ledger state.
///
/// Implementations must be safe to share across tasks. All values are
/// opaque strings; serialization policy belongs to the owning component.
pub trait CredentialStore: Send + Sync {
    /// Read a value; `None` means the key has never been set (or was removed).
    fn get(&self, key: &str) -> KioskResult<Option<String>>;

    /// Write a value, replacing any previous value.
    fn put(&self, key: &str, value: &str) -> KioskResult<()>;

    /// Remove a value. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> KioskResult<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> KioskResult<Option<String>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> KioskResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> KioskResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// File-backed store: one JSON document holding the whole key space.
///
/// Writes go through a temp file followed by a rename so a crash
/// mid-write cannot leave a truncated document behind.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> KioskResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| KioskError::Serialization(format!("corrupt store file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(KioskError::Storage(e.to_string())),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> KioskResult<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| KioskError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| KioskError::Storage(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| KioskError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl CredentialStore for JsonFileStore {
    fn get(&self, key: &str) -> KioskResult<Option<String>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> KioskResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> KioskResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> KioskError {
    KioskError::Internal("store lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();

        assert_eq!(store.get("missing").unwrap(), None);
        store.put("k", "v1").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
        store.put("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        // Removing an absent key is fine.
        store.remove("k").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.put(keys::CREDENTIAL, "{\"token\":\"abc\"}").unwrap();
            store.put("other", "x").unwrap();
            store.remove("other").unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(
            store.get(keys::CREDENTIAL).unwrap().as_deref(),
            Some("{\"token\":\"abc\"}")
        );
        assert_eq!(store.get("other").unwrap(), None);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("fresh.json")).unwrap();
        assert_eq!(store.get(keys::CREDENTIAL).unwrap(), None);
    }
}
