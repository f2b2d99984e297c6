// crates/client/src/store.rs
//! Durable storage for the session credential.
//!
//! The credential is kept as three independent string entries under fixed
//! keys: access token, refresh token, and the JSON-serialized user.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use explainer_core::{Credential, User};

use crate::error::StoreError;

pub const TOKEN_KEY: &str = "explainer_auth_token";
pub const REFRESH_TOKEN_KEY: &str = "explainer_refresh_token";
pub const USER_KEY: &str = "explainer_user";

/// Key-value string storage that outlives the process.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// The three persisted entries, as read back from a store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistedEntries {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<String>,
}

impl PersistedEntries {
    pub fn load(store: &dyn CredentialStore) -> Result<Self, StoreError> {
        Ok(Self {
            access_token: store.get(TOKEN_KEY)?,
            refresh_token: store.get(REFRESH_TOKEN_KEY)?,
            user: store.get(USER_KEY)?,
        })
    }

    /// Rebuild the credential. `None` if any entry is missing or the user
    /// entry does not deserialize.
    pub fn into_credential(self) -> Option<Credential> {
        let user: User = serde_json::from_str(self.user.as_deref()?).ok()?;
        Some(Credential::new(self.access_token?, self.refresh_token?, user))
    }
}

pub fn save_credential(store: &dyn CredentialStore, credential: &Credential) -> Result<(), StoreError> {
    let user = serde_json::to_string(&credential.user).map_err(|e| StoreError::Corrupt {
        path: PathBuf::new(),
        message: e.to_string(),
    })?;
    store.set(TOKEN_KEY, &credential.access_token)?;
    store.set(REFRESH_TOKEN_KEY, &credential.refresh_token)?;
    store.set(USER_KEY, &user)?;
    Ok(())
}

pub fn clear_credential(store: &dyn CredentialStore) -> Result<(), StoreError> {
    store.remove(TOKEN_KEY)?;
    store.remove(REFRESH_TOKEN_KEY)?;
    store.remove(USER_KEY)?;
    Ok(())
}

// ── File-backed store ───────────────────────────────────────────────────

/// JSON document on disk holding all entries. Writes go through a temp file
/// and rename so a crash never leaves a half-written document.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(entries).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::io(&self.path, e))
    }

    fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = match self.lock.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("Mutex poisoned guarding credential store");
                poisoned.into_inner()
            }
        };
        let mut entries = self.read_all()?;
        if f(&mut entries) {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| entries.remove(key).is_some())
    }
}

// ── In-memory store ─────────────────────────────────────────────────────

/// Non-durable store for hosts without a data directory, and for tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("Mutex poisoned in memory credential store");
                poisoned.into_inner()
            }
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}
