//! Key-value storage backends for flow state and tokens.
//!
//! The connection engine reads and writes a small, flat key space
//! (`accessToken`, `refreshToken`, `pending_oauth_<platform>`,
//! `pkce_verifier_<state>`). [`KeyValueStore`] abstracts over where those keys
//! live: an in-memory map for session-scoped entries and a JSON file on disk
//! for entries that must survive a restart.

pub mod encryption;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::{Error, StorageErrorKind};

/// Trait for flat key-value storage.
///
/// `remove` returns the previous value so that destructive reads (consume
/// semantics) need only one storage round-trip.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value by key. Returns `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Write a value, replacing any existing entry (last write wins).
    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Remove an entry, returning the previous value if one existed.
    async fn remove(&self, key: &str) -> Result<Option<String>, Error>;
}

/// In-memory store, the session-storage equivalent.
///
/// Entries live only as long as the process; PKCE verifiers and OAuth
/// sessions must never outlast it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

/// File-backed store, the persistent-storage equivalent.
///
/// Serializes the whole map as JSON on every write and restricts the file to
/// owner read/write. When an encryption key is configured, values are
/// encrypted with AES-256-GCM before they touch the disk.
pub struct FileStore {
    path: PathBuf,
    encryption_key: Option<String>,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStore {
    /// Open a file store, loading any existing entries.
    ///
    /// A missing file is treated as an empty store; the file is created on
    /// first write.
    pub fn open(path: impl AsRef<Path>, encryption_key: Option<String>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Storage(StorageErrorKind::Io),
            })?;
            serde_json::from_str(&contents).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Storage(StorageErrorKind::Serialization),
            })?
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            encryption_key,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), Error> {
        let contents = serde_json::to_string_pretty(entries).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Storage(StorageErrorKind::Serialization),
        })?;

        tokio::fs::write(&self.path, contents).await.map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: crate::error::ErrorKind::Storage(StorageErrorKind::Io),
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms).map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Storage(StorageErrorKind::Io),
            })?;
        }

        Ok(())
    }

    fn seal(&self, value: &str) -> Result<String, Error> {
        match &self.encryption_key {
            Some(key) => encryption::encrypt(value, key),
            None => Ok(value.to_string()),
        }
    }

    fn unseal(&self, value: &str) -> Result<String, Error> {
        match &self.encryption_key {
            Some(key) => encryption::decrypt(value, key),
            None => Ok(value.to_string()),
        }
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(|sealed| self.unseal(sealed))
            .transpose()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let sealed = self.seal(value)?;
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), sealed);
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;
        // Unseal before touching the map, so a bad key cannot leave the map
        // and the file disagreeing about the entry.
        let previous = match entries.get(key) {
            Some(sealed) => self.unseal(sealed)?,
            None => return Ok(None),
        };
        entries.remove(key);
        self.persist(&entries).await?;
        Ok(Some(previous))
    }
}
