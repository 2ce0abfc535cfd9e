//! Versioned client-side encryption protocol for synced, end-to-end
//! encrypted items.
//!
//! This crate is pure: no network, no storage, no keychain. It knows how to
//! derive keys, encrypt/decrypt strings per protocol version, and describe
//! the payload data model. The stateful key manager lives in
//! `vault_keystore`; the item pipeline and sync controller live in
//! `vault_sync`.

pub mod aad;
pub mod aead;
pub mod error;
pub mod items_key;
pub mod kdf;
pub mod keys;
pub mod operators;
pub mod payload;
pub mod service;
pub mod wire;

pub use error::{DecryptError, EncodingError, VaultError};
pub use items_key::ItemsKeyContent;
pub use keys::{Argon2Params, KeyMode, KeyParams, RootKey};
pub use operators::{root_key_to_symmetric, ProtocolOperator, SymmetricKey};
pub use payload::{FieldSet, Payload, PayloadContent};
pub use service::{
    compare_versions, format_for_intent, is_protocol_version_outdated, is_version_newer_than_library,
    key_requirement_for_decryption, key_requirement_for_encryption, BackupFile, EncryptionFormat, Intent,
    KeyRequirement, ProtocolService, LATEST_VERSION, LAST_NONROOT_ITEMS_KEY_VERSION,
};
