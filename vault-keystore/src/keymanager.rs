//! The key manager: the stateful wrapper around `KeyMode` (§4.3) that owns
//! the keychain and the `Nonwrapped` storage domain.
//!
//! `vault-protocol::keys` defines the pure state machine; this module is the
//! I/O shell around it, the way the lineage keystore crate wraps its pure
//! `KeyState` machine with a storage-backed `Keystore`.

use std::sync::Mutex;

use vault_protocol::aead::{random_nonce_24, xchacha20poly1305_open, xchacha20poly1305_seal};
use vault_protocol::wire::{b64_decode, b64_encode};
use vault_protocol::{KeyMode, KeyParams, RootKey};

use crate::audit::{AuditAction, AuditEvent, AuditSinkSync};
use crate::error::KeystoreError;
use crate::keychain::KeychainClient;
use crate::storage::{StorageBackend, StorageDomain};

const WRAPPED_ROOT_KEY_ENTRY: &str = "wrapped_root_key";
const ROOT_KEY_PARAMS_ENTRY: &str = "root_key_params";
const WRAPPER_KEY_PARAMS_ENTRY: &str = "root_key_wrapper_key_params";

/// A wrapped root key blob: the root key's material sealed under a wrapping
/// key derived from the user's passcode (§6's `wrapped_root_key`).
#[derive(serde::Serialize, serde::Deserialize)]
struct WrappedRootKey {
    nonce: String,
    ciphertext: String,
    version: String,
}

const WRAP_AAD: &[u8] = b"vault-keystore:wrapped-root-key";

fn wrap_root_key(root_key: &RootKey, wrapping_key: &[u8; 32]) -> Result<WrappedRootKey, KeystoreError> {
    let mut plaintext = root_key.master_key.to_vec();
    if let Some(auth) = root_key.data_authentication_key {
        plaintext.extend_from_slice(&auth);
    }
    let nonce = random_nonce_24().map_err(|_| KeystoreError::WrappingKeyInvalid)?;
    let ciphertext =
        xchacha20poly1305_seal(wrapping_key, &nonce, &plaintext, WRAP_AAD).map_err(|_| KeystoreError::WrappingKeyInvalid)?;
    Ok(WrappedRootKey {
        nonce: b64_encode(&nonce),
        ciphertext: b64_encode(&ciphertext),
        version: root_key.version.clone(),
    })
}

fn unwrap_root_key_blob(blob: &WrappedRootKey, wrapping_key: &[u8; 32]) -> Result<RootKey, KeystoreError> {
    let nonce_raw = b64_decode(&blob.nonce).map_err(|_| KeystoreError::WrappingKeyInvalid)?;
    let nonce: [u8; 24] = nonce_raw.try_into().map_err(|_| KeystoreError::WrappingKeyInvalid)?;
    let ciphertext = b64_decode(&blob.ciphertext).map_err(|_| KeystoreError::WrappingKeyInvalid)?;
    let plaintext =
        xchacha20poly1305_open(wrapping_key, &nonce, &ciphertext, WRAP_AAD).map_err(|_| KeystoreError::WrappingKeyInvalid)?;

    let mut master_key = [0u8; 32];
    let data_authentication_key = match plaintext.len() {
        32 => {
            master_key.copy_from_slice(&plaintext);
            None
        }
        64 => {
            master_key.copy_from_slice(&plaintext[0..32]);
            let mut auth = [0u8; 32];
            auth.copy_from_slice(&plaintext[32..64]);
            Some(auth)
        }
        _ => return Err(KeystoreError::WrappingKeyInvalid),
    };
    Ok(RootKey::new(master_key, data_authentication_key, &blob.version))
}

/// The stateful wrapper around `KeyMode`, the keychain, and the nonwrapped
/// key-params storage.
pub struct KeyManager {
    storage: std::sync::Arc<dyn StorageBackend>,
    keychain: std::sync::Arc<dyn KeychainClient>,
    audit: std::sync::Arc<dyn AuditSinkSync>,
    mode: Mutex<KeyMode>,
}

impl KeyManager {
    /// Construct a key manager, recomputing `KeyMode` from whatever is
    /// already persisted (§4.3's "on load" rule).
    pub fn new(
        storage: std::sync::Arc<dyn StorageBackend>,
        keychain: std::sync::Arc<dyn KeychainClient>,
        audit: std::sync::Arc<dyn AuditSinkSync>,
    ) -> Result<Self, KeystoreError> {
        let has_account = keychain.get()?.is_some()
            || storage.get(StorageDomain::Nonwrapped, ROOT_KEY_PARAMS_ENTRY)?.is_some()
            || storage.get(StorageDomain::Nonwrapped, WRAPPED_ROOT_KEY_ENTRY)?.is_some();
        let wrapper_present = storage.get(StorageDomain::Nonwrapped, WRAPPER_KEY_PARAMS_ENTRY)?.is_some();
        let mode = KeyMode::None.transition(has_account, wrapper_present);

        Ok(Self {
            storage,
            keychain,
            audit,
            mode: Mutex::new(mode),
        })
    }

    pub fn mode(&self) -> KeyMode {
        *self.mode.lock().unwrap()
    }

    pub fn account_key_params(&self) -> Result<Option<KeyParams>, KeystoreError> {
        self.read_key_params(ROOT_KEY_PARAMS_ENTRY)
    }

    pub fn wrapper_key_params(&self) -> Result<Option<KeyParams>, KeystoreError> {
        self.read_key_params(WRAPPER_KEY_PARAMS_ENTRY)
    }

    fn read_key_params(&self, entry: &str) -> Result<Option<KeyParams>, KeystoreError> {
        match self.storage.get(StorageDomain::Nonwrapped, entry)? {
            Some(bytes) => {
                let params: KeyParams =
                    serde_json::from_slice(&bytes).map_err(|e| KeystoreError::StorageRead(e.to_string()))?;
                Ok(Some(params))
            }
            None => Ok(None),
        }
    }

    /// Valid only in `WrapperOnly` or `RootKeyPlusWrapper` (§4.3).
    pub fn unwrap_root_key(&self, wrapping_key: &[u8; 32]) -> Result<RootKey, KeystoreError> {
        let mode = self.mode();
        if !mode.supports_unwrap() {
            return Err(KeystoreError::InvalidKeyMode {
                mode: mode_label(mode),
                op: "unwrap_root_key",
            });
        }

        if mode == KeyMode::WrapperOnly {
            // No account: the wrapping key itself is the root key, so there
            // is no wrapped blob to decrypt.
            let version = self
                .wrapper_key_params()?
                .map(|p| p.version)
                .unwrap_or_else(|| vault_protocol::LATEST_VERSION.to_string());
            let key = RootKey::new(*wrapping_key, None, &version);
            self.audit.record(AuditEvent::key_mode_event(mode, AuditAction::RootKeyUnwrapped));
            return Ok(key);
        }

        let blob = self
            .storage
            .get(StorageDomain::Nonwrapped, WRAPPED_ROOT_KEY_ENTRY)?
            .ok_or(KeystoreError::WrappingKeyInvalid)?;
        let wrapped: WrappedRootKey =
            serde_json::from_slice(&blob).map_err(|_| KeystoreError::WrappingKeyInvalid)?;

        match unwrap_root_key_blob(&wrapped, wrapping_key) {
            Ok(key) => {
                self.audit.record(AuditEvent::key_mode_event(mode, AuditAction::RootKeyUnwrapped));
                Ok(key)
            }
            Err(e) => {
                self.audit
                    .record(AuditEvent::key_mode_event(mode, AuditAction::RootKeyUnwrapFailed).with_failure());
                Err(e)
            }
        }
    }

    /// Verify a candidate wrapping key without mutating state.
    pub fn validate_wrapping_key(&self, candidate: &[u8; 32]) -> Result<bool, KeystoreError> {
        let valid = self.unwrap_root_key(candidate).is_ok();
        self.audit.record(AuditEvent::key_mode_event(
            self.mode(),
            AuditAction::WrappingKeyValidated { valid },
        ));
        Ok(valid)
    }

    /// Atomically persist a new root key, transition the key mode, and
    /// report whether items keys must be re-marked dirty (§4.3). The caller
    /// (the items-key manager in `vault-sync`) performs that re-marking;
    /// this crate has no dependency on item state.
    pub fn set_new_root_key(
        &self,
        key: &RootKey,
        key_params: &KeyParams,
        wrapping_key: Option<&[u8; 32]>,
    ) -> Result<(), KeystoreError> {
        let has_wrapper = wrapping_key.is_some();
        let new_mode = KeyMode::None.transition(true, has_wrapper);
        let old_mode = self.mode();

        let params_json =
            serde_json::to_vec(key_params).map_err(|e| KeystoreError::StorageWrite(e.to_string()))?;
        self.storage.put(StorageDomain::Nonwrapped, ROOT_KEY_PARAMS_ENTRY, &params_json)?;

        match wrapping_key {
            Some(wk) => {
                let wrapped = wrap_root_key(key, wk)?;
                let wrapped_json =
                    serde_json::to_vec(&wrapped).map_err(|e| KeystoreError::StorageWrite(e.to_string()))?;
                self.storage.put(StorageDomain::Nonwrapped, WRAPPED_ROOT_KEY_ENTRY, &wrapped_json)?;
                self.keychain.clear()?;
            }
            None => {
                self.storage.delete(StorageDomain::Nonwrapped, WRAPPED_ROOT_KEY_ENTRY)?;
                self.keychain.set(&key.master_key)?;
            }
        }

        *self.mode.lock().unwrap() = new_mode;
        self.audit.record(AuditEvent::key_mode_event(
            new_mode,
            AuditAction::KeyModeTransitioned {
                from: mode_label(old_mode).to_string(),
                to: mode_label(new_mode).to_string(),
            },
        ));
        self.audit.record(AuditEvent::key_mode_event(new_mode, AuditAction::RootKeyCreated));
        Ok(())
    }

    /// Set or clear the wrapper (passcode) key params, used when adding or
    /// removing a passcode without changing the account root key.
    pub fn set_wrapper_key_params(&self, params: Option<&KeyParams>) -> Result<(), KeystoreError> {
        match params {
            Some(p) => {
                let json = serde_json::to_vec(p).map_err(|e| KeystoreError::StorageWrite(e.to_string()))?;
                self.storage.put(StorageDomain::Nonwrapped, WRAPPER_KEY_PARAMS_ENTRY, &json)
            }
            None => self.storage.delete(StorageDomain::Nonwrapped, WRAPPER_KEY_PARAMS_ENTRY),
        }
    }

    /// Set a passcode with no account present (§4.3's `None --set
    /// passcode--> WrapperOnly` edge). There is no account root key to wrap;
    /// the wrapping key derived from this passcode becomes the root key
    /// itself, so only the wrapper's key params are persisted.
    pub fn set_wrapper_only_root_key(&self, wrapper_key_params: &KeyParams) -> Result<(), KeystoreError> {
        let mode = self.mode();
        if mode.has_root_key() {
            return Err(KeystoreError::InvalidKeyMode {
                mode: mode_label(mode),
                op: "set_wrapper_only_root_key",
            });
        }

        let json = serde_json::to_vec(wrapper_key_params).map_err(|e| KeystoreError::StorageWrite(e.to_string()))?;
        self.storage.put(StorageDomain::Nonwrapped, WRAPPER_KEY_PARAMS_ENTRY, &json)?;

        let old_mode = mode;
        let new_mode = KeyMode::None.transition(false, true);
        *self.mode.lock().unwrap() = new_mode;
        self.audit.record(AuditEvent::key_mode_event(
            new_mode,
            AuditAction::KeyModeTransitioned {
                from: mode_label(old_mode).to_string(),
                to: mode_label(new_mode).to_string(),
            },
        ));
        Ok(())
    }

    /// Remove the passcode wrapper (§4.3's two "remove passcode" edges).
    /// From `RootKeyPlusWrapper`, unwraps the stored root key with
    /// `wrapping_key` and re-stores it plaintext in the keychain, landing in
    /// `RootKeyOnly`. From `WrapperOnly`, there is no account root key to
    /// preserve, so the wrapper params are simply discarded and the mode
    /// falls back to `None`.
    pub fn remove_passcode(&self, wrapping_key: &[u8; 32]) -> Result<(), KeystoreError> {
        let mode = self.mode();
        if !mode.has_wrapper() {
            return Err(KeystoreError::InvalidKeyMode {
                mode: mode_label(mode),
                op: "remove_passcode",
            });
        }

        if mode == KeyMode::RootKeyPlusWrapper {
            let root_key = self.unwrap_root_key(wrapping_key)?;
            self.keychain.set(&root_key.master_key)?;
            self.storage.delete(StorageDomain::Nonwrapped, WRAPPED_ROOT_KEY_ENTRY)?;
        }

        self.storage.delete(StorageDomain::Nonwrapped, WRAPPER_KEY_PARAMS_ENTRY)?;

        let old_mode = mode;
        let new_mode = KeyMode::None.transition(mode.has_root_key(), false);
        *self.mode.lock().unwrap() = new_mode;
        self.audit.record(AuditEvent::key_mode_event(
            new_mode,
            AuditAction::KeyModeTransitioned {
                from: mode_label(old_mode).to_string(),
                to: mode_label(new_mode).to_string(),
            },
        ));
        Ok(())
    }

    /// Sign-out: clear all key state (§8 invariant — no root key, no
    /// wrapped/unwrapped storage, no keychain value remain).
    pub fn sign_out(&self) -> Result<(), KeystoreError> {
        self.keychain.clear()?;
        self.storage.clear_domain(StorageDomain::Wrapped)?;
        self.storage.clear_domain(StorageDomain::Unwrapped)?;
        self.storage.clear_domain(StorageDomain::Nonwrapped)?;
        *self.mode.lock().unwrap() = KeyMode::None;
        self.audit.record(AuditEvent::system_event(AuditAction::SignedOut));
        Ok(())
    }
}

fn mode_label(mode: KeyMode) -> &'static str {
    match mode {
        KeyMode::None => "None",
        KeyMode::RootKeyOnly => "RootKeyOnly",
        KeyMode::WrapperOnly => "WrapperOnly",
        KeyMode::RootKeyPlusWrapper => "RootKeyPlusWrapper",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::keychain::InMemoryKeychain;
    use crate::storage::InMemoryBackend;
    use std::sync::Arc;

    fn fresh_manager() -> KeyManager {
        KeyManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryKeychain::new()),
            Arc::new(InMemoryAuditSink::new()),
        )
        .unwrap()
    }

    fn sample_root_key() -> RootKey {
        RootKey::new([7u8; 32], None, "004")
    }

    fn sample_params() -> KeyParams {
        KeyParams {
            identifier: "a@b.c".into(),
            version: "004".into(),
            salt: vec![1, 2, 3, 4],
            pbkdf2_cost: None,
            argon2_params: None,
        }
    }

    #[test]
    fn fresh_manager_starts_in_none_mode() {
        let km = fresh_manager();
        assert_eq!(km.mode(), KeyMode::None);
    }

    #[test]
    fn set_new_root_key_without_wrapper_goes_to_root_key_only() {
        let km = fresh_manager();
        km.set_new_root_key(&sample_root_key(), &sample_params(), None).unwrap();
        assert_eq!(km.mode(), KeyMode::RootKeyOnly);
    }

    #[test]
    fn set_new_root_key_with_wrapper_goes_to_root_key_plus_wrapper_and_wraps() {
        let km = fresh_manager();
        let wrapping_key = [9u8; 32];
        let key = sample_root_key();
        km.set_new_root_key(&key, &sample_params(), Some(&wrapping_key)).unwrap();
        assert_eq!(km.mode(), KeyMode::RootKeyPlusWrapper);

        let unwrapped = km.unwrap_root_key(&wrapping_key).unwrap();
        assert_eq!(unwrapped.master_key, key.master_key);
    }

    #[test]
    fn unwrap_fails_with_wrong_wrapping_key() {
        let km = fresh_manager();
        let key = sample_root_key();
        km.set_new_root_key(&key, &sample_params(), Some(&[9u8; 32])).unwrap();
        assert!(km.unwrap_root_key(&[1u8; 32]).is_err());
    }

    #[test]
    fn unwrap_root_key_only_invalid_in_root_key_only_mode() {
        let km = fresh_manager();
        km.set_new_root_key(&sample_root_key(), &sample_params(), None).unwrap();
        assert!(matches!(
            km.unwrap_root_key(&[0u8; 32]),
            Err(KeystoreError::InvalidKeyMode { .. })
        ));
    }

    #[test]
    fn sign_out_returns_to_none_and_clears_everything() {
        let km = fresh_manager();
        km.set_new_root_key(&sample_root_key(), &sample_params(), Some(&[9u8; 32])).unwrap();
        km.sign_out().unwrap();
        assert_eq!(km.mode(), KeyMode::None);
        assert!(km.account_key_params().unwrap().is_none());
    }

    #[test]
    fn validate_wrapping_key_does_not_mutate_mode() {
        let km = fresh_manager();
        let key = sample_root_key();
        km.set_new_root_key(&key, &sample_params(), Some(&[9u8; 32])).unwrap();
        let before = km.mode();
        assert!(km.validate_wrapping_key(&[9u8; 32]).unwrap());
        assert!(!km.validate_wrapping_key(&[1u8; 32]).unwrap());
        assert_eq!(km.mode(), before);
    }

    #[test]
    fn set_wrapper_only_root_key_reaches_wrapper_only_mode() {
        let km = fresh_manager();
        km.set_wrapper_only_root_key(&sample_params()).unwrap();
        assert_eq!(km.mode(), KeyMode::WrapperOnly);
    }

    #[test]
    fn set_wrapper_only_root_key_refuses_when_account_present() {
        let km = fresh_manager();
        km.set_new_root_key(&sample_root_key(), &sample_params(), None).unwrap();
        assert!(matches!(
            km.set_wrapper_only_root_key(&sample_params()),
            Err(KeystoreError::InvalidKeyMode { .. })
        ));
    }

    #[test]
    fn unwrap_root_key_in_wrapper_only_mode_returns_the_wrapping_key_itself() {
        let km = fresh_manager();
        km.set_wrapper_only_root_key(&sample_params()).unwrap();
        let wrapping_key = [3u8; 32];
        let unwrapped = km.unwrap_root_key(&wrapping_key).unwrap();
        assert_eq!(unwrapped.master_key, wrapping_key);
    }

    #[test]
    fn remove_passcode_from_wrapper_only_returns_to_none() {
        let km = fresh_manager();
        km.set_wrapper_only_root_key(&sample_params()).unwrap();
        km.remove_passcode(&[3u8; 32]).unwrap();
        assert_eq!(km.mode(), KeyMode::None);
    }

    #[test]
    fn remove_passcode_from_root_key_plus_wrapper_returns_to_root_key_only() {
        let km = fresh_manager();
        let key = sample_root_key();
        let wrapping_key = [9u8; 32];
        km.set_new_root_key(&key, &sample_params(), Some(&wrapping_key)).unwrap();
        km.remove_passcode(&wrapping_key).unwrap();
        assert_eq!(km.mode(), KeyMode::RootKeyOnly);

        // the account root key survives the wrapper removal
        assert!(km.unwrap_root_key(&wrapping_key).is_err());
        assert!(matches!(
            km.unwrap_root_key(&wrapping_key),
            Err(KeystoreError::InvalidKeyMode { .. })
        ));
    }

    #[test]
    fn remove_passcode_refuses_when_no_wrapper_present() {
        let km = fresh_manager();
        km.set_new_root_key(&sample_root_key(), &sample_params(), None).unwrap();
        assert!(matches!(
            km.remove_passcode(&[0u8; 32]),
            Err(KeystoreError::InvalidKeyMode { .. })
        ));
    }
}
