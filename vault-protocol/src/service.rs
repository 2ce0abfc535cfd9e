//! Protocol service: version dispatch, intent/format mapping, key selection
//! policy, batch decryption, and the backup file codec.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::VaultError;
use crate::items_key::ItemsKeyContent;
use crate::keys::{KeyParams, RootKey};
use crate::operators::{
    generate_items_key_material, root_key_to_symmetric, OperatorV001, OperatorV002, OperatorV003, OperatorV004,
    ProtocolOperator, SymmetricKey,
};
use crate::payload::{FieldSet, Payload, PayloadContent};
use crate::wire::{V001, V002, V003, V004};

/// The newest version this library encrypts new content with.
pub const LATEST_VERSION: &str = V004;
/// Last version without a dedicated items key: items are wrapped directly
/// by the root key.
pub const LAST_NONROOT_ITEMS_KEY_VERSION: &str = V003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Sync,
    SyncDecrypted,
    LocalStorageEncrypted,
    LocalStoragePreferEncrypted,
    LocalStorageDecrypted,
    FileEncrypted,
    FilePreferEncrypted,
    FileDecrypted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionFormat {
    EncryptedString,
    DecryptedBase64String,
    DecryptedBareObject,
}

/// Which key a content type needs for encryption/decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRequirement {
    RootKey,
    DefaultItemsKey,
    ItemsKeyById(String),
}

fn uses_root_key_directly(content_type: &str) -> bool {
    matches!(content_type, "ItemsKey" | "EncryptedStorage" | "RootKey")
}

pub fn key_requirement_for_encryption(content_type: &str) -> KeyRequirement {
    if uses_root_key_directly(content_type) {
        KeyRequirement::RootKey
    } else {
        KeyRequirement::DefaultItemsKey
    }
}

pub fn key_requirement_for_decryption(content_type: &str, items_key_id: Option<&str>) -> KeyRequirement {
    if uses_root_key_directly(content_type) {
        KeyRequirement::RootKey
    } else if let Some(id) = items_key_id {
        KeyRequirement::ItemsKeyById(id.to_string())
    } else {
        KeyRequirement::DefaultItemsKey
    }
}

/// Resolve the format an intent requires, given whether a key is available.
/// Mirrors the table in SPEC_FULL.md §4.2.
pub fn format_for_intent(intent: Intent, has_key: bool) -> Result<EncryptionFormat, VaultError> {
    use EncryptionFormat::*;
    use Intent::*;
    match (intent, has_key) {
        (Sync, true) => Ok(EncryptedString),
        (Sync, false) => Err(VaultError::InvalidIntent("Sync requires a key")),
        (SyncDecrypted, _) => Ok(DecryptedBase64String),
        (LocalStorageEncrypted, true) => Ok(EncryptedString),
        (LocalStorageEncrypted, false) => Err(VaultError::InvalidIntent("LocalStorageEncrypted requires a key")),
        (LocalStoragePreferEncrypted, true) => Ok(EncryptedString),
        (LocalStoragePreferEncrypted, false) => Ok(DecryptedBareObject),
        (LocalStorageDecrypted, _) => Ok(DecryptedBareObject),
        (FileEncrypted, true) => Ok(EncryptedString),
        (FileEncrypted, false) => Err(VaultError::InvalidIntent("FileEncrypted requires a key")),
        (FilePreferEncrypted, true) => Ok(EncryptedString),
        (FilePreferEncrypted, false) => Ok(DecryptedBareObject),
        (FileDecrypted, _) => Ok(DecryptedBareObject),
    }
}

fn version_rank(version: &str) -> u32 {
    version.parse().unwrap_or(0)
}

pub fn compare_versions(a: &str, b: &str) -> Ordering {
    version_rank(a).cmp(&version_rank(b))
}

pub fn is_version_newer_than_library(version: &str) -> bool {
    compare_versions(version, LATEST_VERSION) == Ordering::Greater
}

pub fn is_protocol_version_outdated(version: &str) -> bool {
    matches!(version, V001 | V002)
}

pub struct ProtocolService {
    operators: HashMap<&'static str, Box<dyn ProtocolOperator + Send + Sync>>,
}

impl Default for ProtocolService {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolService {
    pub fn new() -> Self {
        let mut operators: HashMap<&'static str, Box<dyn ProtocolOperator + Send + Sync>> = HashMap::new();
        operators.insert(V001, Box::new(OperatorV001));
        operators.insert(V002, Box::new(OperatorV002));
        operators.insert(V003, Box::new(OperatorV003));
        operators.insert(V004, Box::new(OperatorV004));
        Self { operators }
    }

    pub fn operator(&self, version: &str) -> Result<&(dyn ProtocolOperator + Send + Sync), VaultError> {
        self.operators
            .get(version)
            .map(|op| op.as_ref())
            .ok_or_else(|| VaultError::VersionUnsupported(version.to_string()))
    }

    pub fn latest_operator(&self) -> &(dyn ProtocolOperator + Send + Sync) {
        self.operators[V004].as_ref()
    }

    pub fn create_root_key(&self, identifier: &str, password: &str) -> Result<(RootKey, KeyParams), VaultError> {
        self.latest_operator().create_root_key(identifier, password)
    }

    pub fn derive_root_key(&self, identifier: &str, password: &str, params: &KeyParams) -> Result<RootKey, VaultError> {
        let op = self.operator(&params.version)?;
        op.derive_root_key(identifier, password, params)
    }

    /// Create the default items key tied to `root_key`'s version. Per
    /// SPEC_FULL.md §4.4: at versions <= 003 there is no cryptographic
    /// separation, so the manufactured items key simply mirrors the root
    /// key's master key to unify downstream code paths.
    pub fn create_default_items_key(&self, root_key: &RootKey) -> Result<ItemsKeyContent, VaultError> {
        if compare_versions(&root_key.version, LAST_NONROOT_ITEMS_KEY_VERSION) != Ordering::Greater {
            warn!(version = %root_key.version, "manufacturing mirrored items key for non-root-key version");
            Ok(ItemsKeyContent::new(root_key.master_key, &root_key.version, true))
        } else {
            let material = generate_items_key_material()?;
            Ok(ItemsKeyContent::new(material, &root_key.version, true))
        }
    }

    /// Encrypt a single payload's content under `key`, per `intent`.
    pub fn encrypt_payload(
        &self,
        payload: &Payload,
        intent: Intent,
        key: Option<&SymmetricKey>,
        version: &str,
        now: DateTime<Utc>,
    ) -> Result<Payload, VaultError> {
        // Never re-encrypt a payload that failed to decrypt: its content may
        // be corrupt and re-sealing it would paper over the failure.
        if payload.error_decrypting {
            return Ok(payload.clone());
        }

        let format = format_for_intent(intent, key.is_some())?;
        let mut out = payload.project(FieldSet::EncryptionParameters);
        out.updated_at = now;

        match format {
            EncryptionFormat::DecryptedBareObject => {
                out.content = payload.content.clone();
            }
            EncryptionFormat::DecryptedBase64String => {
                let json = serde_json::to_vec(&payload.content).map_err(|_| crate::error::EncodingError)?;
                out.content = PayloadContent::Encrypted(format!("000{}", crate::wire::b64_encode(&json)));
            }
            EncryptionFormat::EncryptedString => {
                let key = key.ok_or(VaultError::NoKeyAvailable)?;
                let op = self.operator(version)?;
                if op.encryption_expired() {
                    return Err(VaultError::VersionOutdated(version.to_string()));
                }
                let plaintext = match &payload.content {
                    PayloadContent::Decrypted(v) => serde_json::to_vec(v).map_err(|_| crate::error::EncodingError)?,
                    PayloadContent::Encrypted(_) => {
                        return Err(VaultError::InvalidIntent("payload already encrypted"))
                    }
                };
                out.content = PayloadContent::Encrypted(op.encrypt_string(&plaintext, key, &payload.uuid)?);
            }
        }

        Ok(out)
    }

    /// Decrypt a single payload. Failures are never propagated to the
    /// caller: the returned payload carries `error_decrypting` instead, per
    /// SPEC_FULL.md §7.
    pub fn decrypt_payload(&self, payload: &Payload, key: Option<&SymmetricKey>) -> Payload {
        if payload.deleted && payload.content == PayloadContent::Decrypted(serde_json::Value::Null) {
            return payload.clone();
        }

        let Some(ciphertext) = payload.content.as_encrypted_str() else {
            return payload.clone();
        };

        let attempt = || -> Result<Payload, VaultError> {
            let version = crate::wire::peek_version(ciphertext).ok_or(crate::error::DecryptError)?;

            if version == "000" {
                let json = crate::wire::b64_decode(&ciphertext[3..])?;
                let value: serde_json::Value = serde_json::from_slice(&json).map_err(|_| crate::error::DecryptError)?;
                let mut out = payload.clone();
                out.content = PayloadContent::Decrypted(value);
                out.waiting_for_key = false;
                return Ok(out);
            }

            let key = key.ok_or(VaultError::NoKeyAvailable)?;
            let op = self.operator(version)?;
            let plaintext = op.decrypt_string(ciphertext, key, &payload.uuid)?;
            let value: serde_json::Value = serde_json::from_slice(&plaintext).map_err(|_| crate::error::DecryptError)?;

            let mut out = payload.clone();
            out.content = PayloadContent::Decrypted(value);
            out.waiting_for_key = false;
            out.error_decrypting = false;
            Ok(out)
        };

        match attempt() {
            Ok(decrypted) => decrypted,
            Err(VaultError::NoKeyAvailable) => {
                let mut out = payload.clone();
                out.waiting_for_key = true;
                out.error_decrypting = true;
                out
            }
            Err(other) => {
                warn!(uuid = %payload.uuid, error = %other, "payload failed to decrypt");
                let mut out = payload.clone();
                let changed = !out.error_decrypting;
                out.error_decrypting = true;
                out.error_decrypting_changed = changed;
                out
            }
        }
    }

    /// Decrypt a batch, looking up each payload's key via `key_lookup`. A
    /// single payload's failure never aborts the batch.
    pub fn decrypt_payloads_batch<F>(&self, payloads: &[Payload], mut key_lookup: F) -> Vec<Payload>
    where
        F: FnMut(&Payload) -> Option<SymmetricKey>,
    {
        payloads
            .iter()
            .map(|p| {
                if p.deleted && p.content.as_decrypted().map(|v| v.is_null()).unwrap_or(false) {
                    return p.clone();
                }
                if !p.content.is_encrypted() {
                    return p.clone();
                }
                let key = key_lookup(p);
                self.decrypt_payload(p, key.as_ref())
            })
            .collect()
    }
}

/// Backup file: key params plus a list of items, encrypted or plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(skip_serializing_if = "Option::is_none", alias = "auth_params")]
    pub key_params: Option<KeyParams>,
    pub items: Vec<Payload>,
}

impl ProtocolService {
    pub fn create_backup_file(&self, items: &[Payload], key_params: Option<KeyParams>) -> BackupFile {
        BackupFile {
            key_params,
            items: items.iter().map(|p| p.project(FieldSet::File)).collect(),
        }
    }

    /// Import a backup file: derive a key from its key params and the
    /// supplied password, decrypt what can be decrypted, and report how many
    /// items could not be recovered. Plaintext backups (no key params) pass
    /// items through unchanged.
    pub fn import_backup_file(&self, file: &BackupFile, password: &str) -> Result<(Vec<Payload>, usize), VaultError> {
        let Some(ref params) = file.key_params else {
            return Ok((file.items.clone(), 0));
        };

        let root_key = self.derive_root_key(&params.identifier, password, params)?;
        let root_symmetric = root_key_to_symmetric(&root_key);

        let mut imported = Vec::with_capacity(file.items.len());
        let mut error_count = 0usize;

        for item in &file.items {
            if !item.content.is_encrypted() {
                imported.push(item.clone());
                continue;
            }
            let decrypted = self.decrypt_payload(item, Some(&root_symmetric));
            if decrypted.error_decrypting {
                error_count += 1;
            } else {
                imported.push(decrypted);
            }
        }

        Ok((imported, error_count))
    }
}
