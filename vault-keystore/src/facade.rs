//! The storage facade (§4.7): the single point through which every other
//! service reads and writes persisted state, gated by the application
//! lifecycle stage and the active storage policy.
//!
//! `Unwrapped` values never reach the backend — they live only in an
//! in-memory mirror, same as the backend's "decrypted cache" concept in the
//! lineage storage layer. `Wrapped` and `Nonwrapped` values go to the
//! backend unless the session is `Ephemeral`, in which case they live in the
//! same in-memory mirror and disk is cleared immediately.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::KeystoreError;
use crate::policy::{LifecycleStage, StorageConfig, StoragePersistencePolicy};
use crate::storage::{StorageBackend, StorageDomain};

pub struct StorageFacade {
    backend: Arc<dyn StorageBackend>,
    config: RwLock<StorageConfig>,
    stage: RwLock<LifecycleStage>,
    ephemeral_mirror: RwLock<HashMap<(StorageDomain, String), Vec<u8>>>,
}

impl StorageFacade {
    pub fn new(backend: Arc<dyn StorageBackend>, config: StorageConfig) -> Self {
        Self {
            backend,
            config: RwLock::new(config),
            stage: RwLock::new(LifecycleStage::PreparingForLaunch),
            ephemeral_mirror: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_stage(&self, stage: LifecycleStage) {
        *self.stage.write().unwrap() = stage;
    }

    pub fn stage(&self) -> LifecycleStage {
        *self.stage.read().unwrap()
    }

    pub fn config(&self) -> StorageConfig {
        *self.config.read().unwrap()
    }

    /// Switch persistence policy. Entering `Ephemeral` clears the backend's
    /// `Wrapped`/`Nonwrapped` domains immediately, per §4.7.
    pub fn set_persistence_policy(&self, policy: StoragePersistencePolicy) -> Result<(), KeystoreError> {
        let mut config = self.config.write().unwrap();
        config.persistence = policy;
        if policy == StoragePersistencePolicy::Ephemeral {
            drop(config);
            self.backend.clear_domain(StorageDomain::Wrapped)?;
            self.backend.clear_domain(StorageDomain::Nonwrapped)?;
        }
        Ok(())
    }

    fn require_launched(&self) -> Result<(), KeystoreError> {
        if self.stage().permits_storage_access() {
            Ok(())
        } else {
            Err(KeystoreError::NotLaunched)
        }
    }

    fn is_ephemeral(&self) -> bool {
        self.config().persistence == StoragePersistencePolicy::Ephemeral
    }

    pub fn read(&self, domain: StorageDomain, key: &str) -> Result<Option<Vec<u8>>, KeystoreError> {
        self.require_launched()?;
        if domain == StorageDomain::Unwrapped || self.is_ephemeral() {
            let mirror = self.ephemeral_mirror.read().unwrap();
            return Ok(mirror.get(&(domain, key.to_string())).cloned());
        }
        self.backend.get(domain, key)
    }

    pub fn write(&self, domain: StorageDomain, key: &str, value: &[u8]) -> Result<(), KeystoreError> {
        self.require_launched()?;
        if domain == StorageDomain::Unwrapped || self.is_ephemeral() {
            let mut mirror = self.ephemeral_mirror.write().unwrap();
            mirror.insert((domain, key.to_string()), value.to_vec());
            return Ok(());
        }
        self.backend.put(domain, key, value)
    }

    pub fn delete(&self, domain: StorageDomain, key: &str) -> Result<(), KeystoreError> {
        self.require_launched()?;
        {
            let mut mirror = self.ephemeral_mirror.write().unwrap();
            mirror.remove(&(domain, key.to_string()));
        }
        if domain == StorageDomain::Unwrapped || self.is_ephemeral() {
            return Ok(());
        }
        self.backend.delete(domain, key)
    }

    pub fn list_keys(&self, domain: StorageDomain) -> Result<Vec<String>, KeystoreError> {
        self.require_launched()?;
        if domain == StorageDomain::Unwrapped || self.is_ephemeral() {
            let mirror = self.ephemeral_mirror.read().unwrap();
            return Ok(mirror
                .keys()
                .filter(|(d, _)| *d == domain)
                .map(|(_, k)| k.clone())
                .collect());
        }
        self.backend.list_keys(domain)
    }

    pub fn clear_domain(&self, domain: StorageDomain) -> Result<(), KeystoreError> {
        self.require_launched()?;
        {
            let mut mirror = self.ephemeral_mirror.write().unwrap();
            mirror.retain(|(d, _), _| *d != domain);
        }
        if domain == StorageDomain::Unwrapped || self.is_ephemeral() {
            return Ok(());
        }
        self.backend.clear_domain(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;

    fn launched_facade() -> StorageFacade {
        let facade = StorageFacade::new(Arc::new(InMemoryBackend::new()), StorageConfig::default());
        facade.set_stage(LifecycleStage::Launched);
        facade
    }

    #[test]
    fn storage_access_before_launched_fails() {
        let facade = StorageFacade::new(Arc::new(InMemoryBackend::new()), StorageConfig::default());
        assert!(matches!(
            facade.read(StorageDomain::Wrapped, "k"),
            Err(KeystoreError::NotLaunched)
        ));
    }

    #[test]
    fn unwrapped_domain_never_touches_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let facade = StorageFacade::new(backend.clone(), StorageConfig::default());
        facade.set_stage(LifecycleStage::Launched);
        facade.write(StorageDomain::Unwrapped, "k", b"plaintext").unwrap();
        assert_eq!(
            facade.read(StorageDomain::Unwrapped, "k").unwrap(),
            Some(b"plaintext".to_vec())
        );
        assert_eq!(backend.get(StorageDomain::Unwrapped, "k").unwrap(), None);
    }

    #[test]
    fn wrapped_domain_persists_to_backend_by_default() {
        let backend = Arc::new(InMemoryBackend::new());
        let facade = StorageFacade::new(backend.clone(), StorageConfig::default());
        facade.set_stage(LifecycleStage::Launched);
        facade.write(StorageDomain::Wrapped, "k", b"ciphertext").unwrap();
        assert_eq!(backend.get(StorageDomain::Wrapped, "k").unwrap(), Some(b"ciphertext".to_vec()));
    }

    #[test]
    fn switching_to_ephemeral_clears_backend_and_routes_future_writes_in_memory() {
        let backend = Arc::new(InMemoryBackend::new());
        let facade = StorageFacade::new(backend.clone(), StorageConfig::default());
        facade.set_stage(LifecycleStage::Launched);
        facade.write(StorageDomain::Wrapped, "k", b"ciphertext").unwrap();

        facade.set_persistence_policy(StoragePersistencePolicy::Ephemeral).unwrap();
        assert_eq!(backend.get(StorageDomain::Wrapped, "k").unwrap(), None);

        facade.write(StorageDomain::Wrapped, "k2", b"more").unwrap();
        assert_eq!(backend.get(StorageDomain::Wrapped, "k2").unwrap(), None);
        assert_eq!(facade.read(StorageDomain::Wrapped, "k2").unwrap(), Some(b"more".to_vec()));
    }

    #[test]
    fn list_and_clear_scope_to_domain() {
        let facade = launched_facade();
        facade.write(StorageDomain::Wrapped, "a", b"1").unwrap();
        facade.write(StorageDomain::Wrapped, "b", b"2").unwrap();
        facade.write(StorageDomain::Nonwrapped, "c", b"3").unwrap();

        let mut wrapped_keys = facade.list_keys(StorageDomain::Wrapped).unwrap();
        wrapped_keys.sort();
        assert_eq!(wrapped_keys, vec!["a".to_string(), "b".to_string()]);

        facade.clear_domain(StorageDomain::Wrapped).unwrap();
        assert!(facade.list_keys(StorageDomain::Wrapped).unwrap().is_empty());
        assert_eq!(facade.list_keys(StorageDomain::Nonwrapped).unwrap(), vec!["c".to_string()]);
    }
}
