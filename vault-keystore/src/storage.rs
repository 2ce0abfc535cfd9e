//! Storage backends: where the three value domains (§4.7) physically live.

use crate::error::KeystoreError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Which of the three value domains a key belongs to.
///
/// `Wrapped` holds encrypted payload blobs; `Unwrapped` is the in-memory-only
/// decrypted mirror (never persisted); `Nonwrapped` is always plaintext on
/// disk (key params, the wrapped root key blob).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageDomain {
    Wrapped,
    Unwrapped,
    Nonwrapped,
}

impl StorageDomain {
    fn label(&self) -> &'static str {
        match self {
            Self::Wrapped => "wrapped",
            Self::Unwrapped => "unwrapped",
            Self::Nonwrapped => "nonwrapped",
        }
    }
}

/// Backend for persisting domain-scoped key/value pairs.
///
/// Implement this for your infrastructure:
/// - InMemoryBackend (testing)
/// - FileBackend (development)
/// - a host-supplied on-disk KV store (production, per §6's raw KV collaborator)
pub trait StorageBackend: Send + Sync {
    fn get(&self, domain: StorageDomain, key: &str) -> Result<Option<Vec<u8>>, KeystoreError>;
    fn put(&self, domain: StorageDomain, key: &str, value: &[u8]) -> Result<(), KeystoreError>;
    fn delete(&self, domain: StorageDomain, key: &str) -> Result<(), KeystoreError>;
    fn list_keys(&self, domain: StorageDomain) -> Result<Vec<String>, KeystoreError>;
    fn clear_domain(&self, domain: StorageDomain) -> Result<(), KeystoreError>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

pub struct InMemoryBackend {
    values: RwLock<HashMap<(StorageDomain, String), Vec<u8>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, domain: StorageDomain, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let values = self.values.read().unwrap();
        Ok(values.get(&(domain, key.to_string())).cloned())
    }

    fn put(&self, domain: StorageDomain, key: &str, value: &[u8]) -> Result<(), KeystoreError> {
        let mut values = self.values.write().unwrap();
        values.insert((domain, key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, domain: StorageDomain, key: &str) -> Result<(), KeystoreError> {
        let mut values = self.values.write().unwrap();
        values.remove(&(domain, key.to_string()));
        Ok(())
    }

    fn list_keys(&self, domain: StorageDomain) -> Result<Vec<String>, KeystoreError> {
        let values = self.values.read().unwrap();
        Ok(values
            .keys()
            .filter(|(d, _)| *d == domain)
            .map(|(_, k)| k.clone())
            .collect())
    }

    fn clear_domain(&self, domain: StorageDomain) -> Result<(), KeystoreError> {
        let mut values = self.values.write().unwrap();
        values.retain(|(d, _), _| *d != domain);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File backend
// ---------------------------------------------------------------------------

/// File-based storage. Directory layout: `{dir}/{domain}/{key}.bin`.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| KeystoreError::StorageWrite(format!("create dir: {e}")))?;
        Ok(Self { dir })
    }

    fn domain_dir(&self, domain: StorageDomain) -> PathBuf {
        self.dir.join(domain.label())
    }

    fn entry_path(&self, domain: StorageDomain, key: &str) -> PathBuf {
        self.domain_dir(domain).join(format!("{key}.bin"))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, domain: StorageDomain, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        let path = self.entry_path(domain, key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read(&path)
            .map(Some)
            .map_err(|e| KeystoreError::StorageRead(format!("read: {e}")))
    }

    fn put(&self, domain: StorageDomain, key: &str, value: &[u8]) -> Result<(), KeystoreError> {
        let dir = self.domain_dir(domain);
        std::fs::create_dir_all(&dir)
            .map_err(|e| KeystoreError::StorageWrite(format!("create domain dir: {e}")))?;
        let path = self.entry_path(domain, key);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, value).map_err(|e| KeystoreError::StorageWrite(format!("write: {e}")))?;
        std::fs::rename(&tmp, &path).map_err(|e| KeystoreError::StorageWrite(format!("rename: {e}")))?;
        Ok(())
    }

    fn delete(&self, domain: StorageDomain, key: &str) -> Result<(), KeystoreError> {
        let path = self.entry_path(domain, key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| KeystoreError::StorageWrite(format!("delete: {e}")))?;
        }
        Ok(())
    }

    fn list_keys(&self, domain: StorageDomain) -> Result<Vec<String>, KeystoreError> {
        let dir = self.domain_dir(domain);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| KeystoreError::StorageRead(format!("readdir: {e}")))? {
            let entry = entry.map_err(|e| KeystoreError::StorageRead(format!("entry: {e}")))?;
            if let Some(name) = file_stem_if_bin(&entry.path()) {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    fn clear_domain(&self, domain: StorageDomain) -> Result<(), KeystoreError> {
        let dir = self.domain_dir(domain);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| KeystoreError::StorageWrite(format!("clear: {e}")))?;
        }
        Ok(())
    }
}

fn file_stem_if_bin(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("bin") {
        return None;
    }
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}
