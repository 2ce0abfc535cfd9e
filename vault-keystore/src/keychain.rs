//! The OS keychain collaborator (§6 device interface: `get_keychain` /
//! `set_keychain` / `clear_keychain`). The host application supplies a real
//! implementation; this crate only depends on the trait.

use crate::error::KeystoreError;

/// Holds exactly one opaque value: the plaintext root key, when the key mode
/// is `RootKeyOnly`. Cleared whenever a wrapper is introduced.
pub trait KeychainClient: Send + Sync {
    fn get(&self) -> Result<Option<Vec<u8>>, KeystoreError>;
    fn set(&self, value: &[u8]) -> Result<(), KeystoreError>;
    fn clear(&self) -> Result<(), KeystoreError>;
}

/// In-memory keychain, for tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemoryKeychain {
    value: std::sync::RwLock<Option<Vec<u8>>>,
}

impl InMemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeychainClient for InMemoryKeychain {
    fn get(&self) -> Result<Option<Vec<u8>>, KeystoreError> {
        Ok(self.value.read().unwrap().clone())
    }

    fn set(&self, value: &[u8]) -> Result<(), KeystoreError> {
        *self.value.write().unwrap() = Some(value.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<(), KeystoreError> {
        *self.value.write().unwrap() = None;
        Ok(())
    }
}
