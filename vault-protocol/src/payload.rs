//! The payload model: the atomic, immutable unit of persistence and transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which fields survive a projection, chosen by the caller's intent/source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSet {
    /// Every field, including client-only bookkeeping. Used for local snapshots.
    Max,
    /// Only what an operator needs to encrypt/decrypt.
    EncryptionParameters,
    /// Fields destined for a backup file.
    File,
    /// Fields destined for on-disk storage.
    Storage,
    /// Fields destined for the server (strips all client-only bookkeeping).
    Server,
    /// Fields as returned by the server after a successful save.
    ServerSaved,
    /// Fields kept in session history.
    SessionHistory,
    /// Fields as retrieved from an installed component/extension.
    ComponentRetrieved,
}

/// The atomic unit of persistence and transfer.
///
/// A payload is immutable: every mutation constructs a new value via
/// [`Payload::copy_with`] rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub uuid: String,
    pub content_type: String,
    /// Either structured JSON (decrypted) or a version-prefixed ciphertext string.
    pub content: PayloadContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc_item_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,

    // Client-only bookkeeping, stripped by Server/ServerSaved projections.
    #[serde(default)]
    pub dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirtied_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_begin: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_decrypting: bool,
    #[serde(default)]
    pub error_decrypting_changed: bool,
    #[serde(default)]
    pub waiting_for_key: bool,
    #[serde(default)]
    pub dummy: bool,

    // Legacy fields (<=002), kept for interop with pre-items-key payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_params: Option<serde_json::Value>,
}

/// Payload content is either a structured object (decrypted) or an opaque,
/// version-prefixed ciphertext string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadContent {
    Decrypted(serde_json::Value),
    Encrypted(String),
}

impl PayloadContent {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, PayloadContent::Encrypted(_))
    }

    pub fn as_encrypted_str(&self) -> Option<&str> {
        match self {
            PayloadContent::Encrypted(s) => Some(s.as_str()),
            PayloadContent::Decrypted(_) => None,
        }
    }

    pub fn as_decrypted(&self) -> Option<&serde_json::Value> {
        match self {
            PayloadContent::Decrypted(v) => Some(v),
            PayloadContent::Encrypted(_) => None,
        }
    }
}

impl Payload {
    /// Project this payload into the field set appropriate for `set`,
    /// returning a new, independent copy.
    pub fn project(&self, set: FieldSet) -> Payload {
        let mut copy = self.clone();
        match set {
            FieldSet::Max | FieldSet::EncryptionParameters => {}
            FieldSet::File | FieldSet::Storage => {
                copy.last_sync_begin = None;
                copy.last_sync_end = None;
            }
            FieldSet::Server | FieldSet::ServerSaved => {
                copy.dirty = false;
                copy.dirtied_at = None;
                copy.last_sync_begin = None;
                copy.last_sync_end = None;
                copy.error_decrypting = false;
                copy.error_decrypting_changed = false;
                copy.waiting_for_key = false;
                copy.dummy = false;
            }
            FieldSet::SessionHistory => {
                copy.dirty = false;
                copy.dirtied_at = None;
            }
            FieldSet::ComponentRetrieved => {
                copy.last_sync_begin = None;
                copy.last_sync_end = None;
            }
        }
        copy
    }

    /// Construct a new payload from this one with the given mutation applied,
    /// stamping `dirty`/`dirtied_at`. This is the only sanctioned way to
    /// "change" a payload: the original is left untouched.
    pub fn copy_with(&self, now: DateTime<Utc>, mutate: impl FnOnce(&mut Payload)) -> Payload {
        let mut copy = self.clone();
        mutate(&mut copy);
        copy.dirty = true;
        copy.dirtied_at = Some(now);
        copy.updated_at = now;
        copy
    }

    /// A tombstone: deleted, content cleared, still carrying the uuid so
    /// sync can reconcile it.
    pub fn tombstone(uuid: &str, content_type: &str, now: DateTime<Utc>) -> Payload {
        Payload {
            uuid: uuid.to_string(),
            content_type: content_type.to_string(),
            content: PayloadContent::Decrypted(serde_json::Value::Null),
            items_key_id: None,
            enc_item_key: None,
            created_at: now,
            updated_at: now,
            deleted: true,
            dirty: true,
            dirtied_at: Some(now),
            last_sync_begin: None,
            last_sync_end: None,
            error_decrypting: false,
            error_decrypting_changed: false,
            waiting_for_key: false,
            dummy: false,
            auth_hash: None,
            auth_params: None,
        }
    }

    /// A payload that is safe to drop from the collection immediately after
    /// being emitted to observers: deleted and not locally dirty.
    pub fn is_discardable(&self) -> bool {
        self.deleted && !self.dirty
    }

    /// Only errored items that are also deletions may still be synced.
    pub fn is_syncable(&self) -> bool {
        self.dirty && !self.dummy && (!self.error_decrypting || self.deleted)
    }
}
