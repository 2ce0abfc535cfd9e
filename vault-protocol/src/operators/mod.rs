//! Versioned protocol operators (001-004).
//!
//! Each operator owns one version's key derivation and item-level
//! encryption. The protocol service (`crate::service`) dispatches to the
//! operator matching a payload's version and never implements crypto itself.

mod v001;
mod v002;
mod v003;
mod v004;

pub use v001::OperatorV001;
pub use v002::OperatorV002;
pub use v003::OperatorV003;
pub use v004::{generate_items_key_material, OperatorV004};

use crate::error::VaultError;
use crate::keys::{KeyParams, RootKey};

/// The symmetric key material used to encrypt/decrypt one string: an
/// encryption key, plus (for versions <= 003) a detached authentication key.
/// Version 004 leaves `auth_key` empty; its AEAD tag authenticates itself.
pub struct SymmetricKey {
    pub enc_key: [u8; 32],
    pub auth_key: Option<[u8; 32]>,
}

impl SymmetricKey {
    pub fn aead_only(enc_key: [u8; 32]) -> Self {
        Self {
            enc_key,
            auth_key: None,
        }
    }

    pub fn with_auth(enc_key: [u8; 32], auth_key: [u8; 32]) -> Self {
        Self {
            enc_key,
            auth_key: Some(auth_key),
        }
    }
}

/// One version's key derivation and item-level encryption contract.
pub trait ProtocolOperator {
    fn version(&self) -> &'static str;

    /// Whether this version may still be used to encrypt *new* content.
    /// Decryption of existing content is always supported.
    fn encryption_expired(&self) -> bool;

    fn create_root_key(&self, identifier: &str, password: &str) -> Result<(RootKey, KeyParams), VaultError>;

    fn derive_root_key(
        &self,
        identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> Result<RootKey, VaultError>;

    /// Encrypt `plaintext` (either item content or a raw item key's bytes)
    /// under `key`, producing the version's wire framing. `uuid` is bound
    /// into the frame so a swapped envelope is detected as tamper.
    fn encrypt_string(&self, plaintext: &[u8], key: &SymmetricKey, uuid: &str) -> Result<String, VaultError>;

    fn decrypt_string(&self, ciphertext: &str, key: &SymmetricKey, uuid: &str) -> Result<Vec<u8>, VaultError>;
}

pub fn root_key_to_symmetric(root_key: &RootKey) -> SymmetricKey {
    match root_key.data_authentication_key {
        Some(auth) => SymmetricKey::with_auth(root_key.master_key, auth),
        None => SymmetricKey::aead_only(root_key.master_key),
    }
}
