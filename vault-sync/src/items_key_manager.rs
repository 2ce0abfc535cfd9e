//! The items-key manager (§4.4): creates, selects, and reconciles the synced
//! `ItemsKey` items that actually encrypt user content at protocol version
//! > 003.

use chrono::{DateTime, TimeZone, Utc};
use vault_protocol::{ItemsKeyContent, KeyMode, ProtocolService, RootKey};

use crate::collection::Collection;
use crate::error::SyncError;
use crate::item::{Item, ItemVariant, CONTENT_TYPE_ITEMS_KEY};
use crate::pipeline::ItemPipeline;

/// Epoch sentinel used as `updated_at` for items keys that have never been
/// synced (§4.4: "never_synced = true" is defined as `updated_at` being
/// epoch or null).
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().expect("epoch is representable")
}

fn is_never_synced(item: &Item) -> bool {
    item.payload.updated_at == epoch()
}

fn items_key_content(item: &Item) -> Option<&ItemsKeyContent> {
    match &item.variant {
        ItemVariant::ItemsKey(content) => Some(content),
        _ => None,
    }
}

pub struct ItemsKeyManager<'a> {
    protocol: &'a ProtocolService,
}

impl<'a> ItemsKeyManager<'a> {
    pub fn new(protocol: &'a ProtocolService) -> Self {
        Self { protocol }
    }

    /// The single items key with `is_default = true`, falling back leniently
    /// to the lone items key if exactly one exists.
    pub fn default_items_key<'c>(&self, collection: &'c Collection) -> Option<&'c Item> {
        let keys = collection.by_content_type(CONTENT_TYPE_ITEMS_KEY);
        if let Some(found) = keys.iter().find(|i| items_key_content(i).map(|c| c.is_default).unwrap_or(false)) {
            return collection.get(found.uuid());
        }
        if keys.len() == 1 {
            return collection.get(keys[0].uuid());
        }
        None
    }

    /// The items key a payload should decrypt/encrypt with: the one
    /// referenced by `items_key_id`, else the default for the payload's
    /// implied version.
    pub fn items_key_for_payload<'c>(&self, collection: &'c Collection, items_key_id: Option<&str>) -> Option<&'c Item> {
        if let Some(id) = items_key_id {
            if let Some(item) = collection.get(id) {
                return Some(item);
            }
        }
        self.default_items_key(collection)
    }

    /// Create a new default items key tied to `root_key`'s version, un-flag
    /// the previous default, and return both as dirty payloads ready for
    /// the caller to feed back into the pipeline (§4.4).
    pub fn create_new_default_items_key(
        &self,
        collection: &Collection,
        root_key: &RootKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<vault_protocol::Payload>, SyncError> {
        let mut out = Vec::new();

        if let Some(previous) = self.default_items_key(collection) {
            if let Some(content) = items_key_content(previous) {
                if content.is_default {
                    let mut unflagged = content.clone();
                    unflagged.is_default = false;
                    out.push(previous.payload.copy_with(now, |p| {
                        p.content = vault_protocol::PayloadContent::Decrypted(
                            serde_json::to_value(&unflagged).expect("ItemsKeyContent serializes"),
                        );
                    }));
                }
            }
        }

        let new_content = self.protocol.create_default_items_key(root_key)?;
        let new_uuid = uuid::Uuid::new_v4().to_string();
        let new_payload = vault_protocol::Payload {
            uuid: new_uuid,
            content_type: CONTENT_TYPE_ITEMS_KEY.into(),
            content: vault_protocol::PayloadContent::Decrypted(
                serde_json::to_value(&new_content).expect("ItemsKeyContent serializes"),
            ),
            items_key_id: None,
            enc_item_key: None,
            created_at: now,
            updated_at: epoch(),
            deleted: false,
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
        };
        out.push(new_payload);

        Ok(out)
    }

    /// Reconcile local items keys once a download-first sync pass has
    /// completed (§4.4). Returns payloads the caller must feed back into the
    /// pipeline: tombstones for keys that should be dropped, and any newly
    /// created default.
    pub fn reconcile_after_download_first(
        &self,
        collection: &Collection,
        root_key: &RootKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<vault_protocol::Payload>, SyncError> {
        let keys = collection.by_content_type(CONTENT_TYPE_ITEMS_KEY);
        let never_synced: Vec<&Item> = keys.iter().copied().filter(|i| is_never_synced(i)).collect();

        let synced_default_exists = keys
            .iter()
            .any(|i| !is_never_synced(i) && items_key_content(i).map(|c| c.is_default).unwrap_or(false));

        let mut out = Vec::new();

        if synced_default_exists {
            for key in &never_synced {
                out.push(vault_protocol::Payload::tombstone(key.uuid(), CONTENT_TYPE_ITEMS_KEY, now));
            }
            return Ok(out);
        }

        let current_version = root_key.version.clone();
        let mut survivors_of_current_version = 0usize;
        for key in &keys {
            let version_matches = items_key_content(key).map(|c| c.version == current_version).unwrap_or(false);
            if version_matches {
                survivors_of_current_version += 1;
            } else {
                out.push(vault_protocol::Payload::tombstone(key.uuid(), CONTENT_TYPE_ITEMS_KEY, now));
            }
        }

        if survivors_of_current_version == 0 {
            out.extend(self.create_new_default_items_key(collection, root_key, now)?);
        }

        Ok(out)
    }

    /// Reconcile once a full (non-download-first) sync completes (§4.4):
    /// create a default if none exists anywhere; if `mode` is `WrapperOnly`,
    /// additionally re-persist every item to disk, since the encryption
    /// scope storage is written under just changed.
    pub fn reconcile_after_full_sync(
        &self,
        collection: &Collection,
        root_key: &RootKey,
        now: DateTime<Utc>,
        mode: KeyMode,
    ) -> Result<Vec<vault_protocol::Payload>, SyncError> {
        let mut out = if self.default_items_key(collection).is_some() {
            Vec::new()
        } else {
            self.create_new_default_items_key(collection, root_key, now)?
        };

        if mode == KeyMode::WrapperOnly {
            let already_touched: std::collections::HashSet<&str> =
                out.iter().map(|p| p.uuid.as_str()).collect();
            for item in collection.all() {
                if !already_touched.contains(item.uuid()) {
                    out.push(item.payload.copy_with(now, |_| {}));
                }
            }
        }

        Ok(out)
    }

    /// Mark every items key dirty without changing its content (§4.3:
    /// `set_new_root_key` "re-encrypts all items keys by marking them dirty"
    /// once a new root key is persisted, so the next sync re-uploads each
    /// one sealed under the new key material).
    pub fn mark_all_dirty_for_new_root_key(&self, collection: &Collection, now: DateTime<Utc>) -> Vec<vault_protocol::Payload> {
        collection
            .by_content_type(CONTENT_TYPE_ITEMS_KEY)
            .into_iter()
            .map(|item| item.payload.copy_with(now, |_| {}))
            .collect()
    }

    /// Feed the reconciliation payloads from either reconcile pass back into
    /// the pipeline so the collection/graph reflect the change immediately.
    pub fn apply(&self, pipeline: &mut ItemPipeline, payloads: Vec<vault_protocol::Payload>) {
        if !payloads.is_empty() {
            pipeline.ingest(&payloads, crate::pipeline::PayloadSource::LocalChanged, None);
        }
    }
}
