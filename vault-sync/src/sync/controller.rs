//! The sync controller (§4.6): the upload/download loop, conflict
//! resolution, uuid alternation, and integrity checking.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use vault_protocol::{
    key_requirement_for_decryption, key_requirement_for_encryption, root_key_to_symmetric, Intent, KeyMode,
    KeyRequirement, Payload, PayloadContent, ProtocolService, RootKey, SymmetricKey, LATEST_VERSION,
};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncRunError};
use crate::item::ItemVariant;
use crate::items_key_manager::ItemsKeyManager;
use crate::pipeline::{ItemPipeline, PayloadSource};

use super::wire::{ConflictKind, SyncRequest, SyncResponse, SyncTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    DownloadFirst,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    ForceSpawnNew,
    Resolve,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    FullSyncCompleted,
    EnteredOutOfSync,
}

struct ControllerState {
    pipeline: ItemPipeline,
    sync_token: Option<String>,
    locked: bool,
    syncing: bool,
    out_of_sync: bool,
}

/// Drives one sync cycle at a time over an in-memory pipeline. Scheduling is
/// single-threaded and cooperative (§5): this controller does not spawn
/// tasks of its own, so `std::sync::Mutex` around the pipeline is just
/// reentrancy bookkeeping, not contention control.
pub struct SyncController {
    transport: Arc<dyn SyncTransport>,
    protocol: Arc<ProtocolService>,
    config: SyncConfig,
    state: Mutex<ControllerState>,
}

impl SyncController {
    pub fn new(transport: Arc<dyn SyncTransport>, protocol: Arc<ProtocolService>, config: SyncConfig) -> Self {
        Self {
            transport,
            protocol,
            config,
            state: Mutex::new(ControllerState {
                pipeline: ItemPipeline::new(),
                sync_token: None,
                locked: false,
                syncing: false,
                out_of_sync: false,
            }),
        }
    }

    pub fn lock_syncing(&self) {
        self.state.lock().unwrap().locked = true;
    }

    pub fn unlock_syncing(&self) {
        self.state.lock().unwrap().locked = false;
    }

    pub fn is_out_of_sync(&self) -> bool {
        self.state.lock().unwrap().out_of_sync
    }

    pub fn with_pipeline<R>(&self, f: impl FnOnce(&ItemPipeline) -> R) -> R {
        f(&self.state.lock().unwrap().pipeline)
    }

    /// Feed locally created/edited payloads into the pipeline (e.g. from the
    /// item mutator) ahead of the next sync.
    pub fn ingest_local(&self, payloads: &[Payload]) {
        self.state.lock().unwrap().pipeline.ingest(payloads, PayloadSource::LocalChanged, None);
    }

    /// Run one sync (§4.6's 8-step lifecycle). `root_key` is supplied by the
    /// caller per call rather than stored: the controller never owns key
    /// material (§5). `key_mode` is likewise supplied per call, since only
    /// the key manager in `vault-keystore` tracks it.
    pub fn perform_sync(
        &self,
        mode: SyncMode,
        queue: QueueStrategy,
        root_key: &RootKey,
        key_mode: KeyMode,
    ) -> Result<SyncOutcome, SyncRunError> {
        self.begin(queue)?;
        let result = self.run(mode, root_key, key_mode);
        self.end();
        result.map_err(SyncRunError::from)
    }

    /// A follow-up full deep pull after an integrity mismatch (§4.6 step 8).
    pub fn resolve_out_of_sync(&self, root_key: &RootKey) -> Result<(), SyncRunError> {
        self.begin(QueueStrategy::ForceSpawnNew)?;
        let result = self.download_first_pass(root_key);
        self.end();
        result.map_err(SyncRunError::from)?;
        self.state.lock().unwrap().out_of_sync = false;
        Ok(())
    }

    fn begin(&self, queue: QueueStrategy) -> Result<(), SyncError> {
        let mut state = self.state.lock().unwrap();
        if state.locked {
            return Err(SyncError::SyncLocked);
        }
        if state.syncing && queue != QueueStrategy::ForceSpawnNew {
            // Resolve/Default coalesce with the sync already in flight rather
            // than issuing a second network round-trip.
            return Err(SyncError::Network("sync already in flight; coalesced".into()));
        }
        state.syncing = true;
        Ok(())
    }

    fn end(&self) {
        self.state.lock().unwrap().syncing = false;
    }

    fn run(&self, mode: SyncMode, root_key: &RootKey, key_mode: KeyMode) -> Result<SyncOutcome, SyncError> {
        if mode == SyncMode::DownloadFirst {
            self.download_first_pass(root_key)?;
        }
        self.full_sync(root_key, key_mode)
    }

    /// Step 2 with an empty dirty upload, full processing of step 4, so the
    /// items-key manager can reconcile keys before anything is sent up.
    fn download_first_pass(&self, root_key: &RootKey) -> Result<(), SyncError> {
        let now = Utc::now();
        let sync_token = self.state.lock().unwrap().sync_token.clone();
        let request = SyncRequest {
            sync_token,
            cursor_token: None,
            items: Vec::new(),
            compute_integrity: false,
        };
        let response = self.transport.sync(request)?;
        self.state.lock().unwrap().sync_token = response.sync_token.clone();
        self.apply_response(&response, root_key, now)?;
        self.reconcile_items_keys(root_key, now, true, KeyMode::None)
    }

    fn full_sync(&self, root_key: &RootKey, key_mode: KeyMode) -> Result<SyncOutcome, SyncError> {
        let now = Utc::now();
        let dirty = self.stamp_and_collect_dirty(now);
        let encrypted = self.encrypt_for_upload(&dirty, root_key, now)?;

        let page_size = self.config.max_items_per_page.max(1);
        let mut chunks: std::collections::VecDeque<Vec<Payload>> =
            encrypted.chunks(page_size).map(|c| c.to_vec()).collect();
        if chunks.is_empty() {
            chunks.push_back(Vec::new());
        }

        let mut cursor_token = None;
        let mut sync_token = self.state.lock().unwrap().sync_token.clone();
        let mut out_of_sync = false;

        loop {
            let items = chunks.pop_front().unwrap_or_default();
            let request = SyncRequest {
                sync_token: sync_token.clone(),
                cursor_token: cursor_token.clone(),
                items,
                compute_integrity: chunks.is_empty(),
            };
            let response = self.transport.sync(request)?;
            sync_token = response.sync_token.clone();

            if self.apply_response(&response, root_key, now)? {
                out_of_sync = true;
            }

            cursor_token = response.cursor_token.clone();
            if cursor_token.is_none() && chunks.is_empty() {
                break;
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.sync_token = sync_token;
            if out_of_sync {
                state.out_of_sync = true;
            }
        }

        self.reconcile_items_keys(root_key, now, false, key_mode)?;

        Ok(if out_of_sync {
            SyncOutcome::EnteredOutOfSync
        } else {
            SyncOutcome::FullSyncCompleted
        })
    }

    /// `key_mode` only matters for the end-of-full-sync pass (§4.4's
    /// `WrapperOnly` re-persist rule); the download-first pass ignores it.
    fn reconcile_items_keys(
        &self,
        root_key: &RootKey,
        now: DateTime<Utc>,
        download_first: bool,
        key_mode: KeyMode,
    ) -> Result<(), SyncError> {
        let ik_mgr = ItemsKeyManager::new(&self.protocol);
        let reconciliation = {
            let state = self.state.lock().unwrap();
            if download_first {
                ik_mgr.reconcile_after_download_first(state.pipeline.collection(), root_key, now)?
            } else {
                ik_mgr.reconcile_after_full_sync(state.pipeline.collection(), root_key, now, key_mode)?
            }
        };
        if !reconciliation.is_empty() {
            let mut state = self.state.lock().unwrap();
            ik_mgr.apply(&mut state.pipeline, reconciliation);
        }
        Ok(())
    }

    /// Step 1: stamp `last_sync_begin` on the current dirty set and snapshot it.
    fn stamp_and_collect_dirty(&self, now: DateTime<Utc>) -> Vec<Payload> {
        let mut state = self.state.lock().unwrap();
        let stamped: Vec<Payload> = state
            .pipeline
            .collection()
            .dirty_items()
            .iter()
            .map(|item| {
                let mut p = item.payload.clone();
                p.last_sync_begin = Some(now);
                p
            })
            .collect();
        state.pipeline.ingest(&stamped, PayloadSource::LocalChanged, None);
        stamped
    }

    /// Step 2: encrypt each dirty payload under its resolved key, projected
    /// to server field set.
    fn encrypt_for_upload(&self, dirty: &[Payload], root_key: &RootKey, now: DateTime<Utc>) -> Result<Vec<Payload>, SyncError> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::with_capacity(dirty.len());
        for payload in dirty {
            let (key, items_key_id) = resolve_key_for_encryption(&payload.content_type, &state.pipeline, &self.protocol, root_key);
            let mut encrypted = self
                .protocol
                .encrypt_payload(payload, Intent::Sync, key.as_ref(), LATEST_VERSION, now)?;
            if items_key_id.is_some() {
                encrypted.items_key_id = items_key_id;
            }
            out.push(encrypted.project(vault_protocol::FieldSet::Server));
        }
        Ok(out)
    }

    /// Steps 4-6: merge retrieved/saved/conflicts into the pipeline, returning
    /// whether the server's integrity hash disagreed with ours.
    fn apply_response(&self, response: &SyncResponse, root_key: &RootKey, sync_begin: DateTime<Utc>) -> Result<bool, SyncError> {
        let mut to_ingest = Vec::new();
        let mut uuid_alternations = Vec::new();

        {
            let state = self.state.lock().unwrap();

            for retrieved in &response.retrieved_items {
                let key = resolve_key_for_decryption(retrieved, &state.pipeline, &self.protocol, root_key);
                let decrypted = self.protocol.decrypt_payload(retrieved, key.as_ref());

                let local_dirty_and_differs = state
                    .pipeline
                    .collection()
                    .get(&decrypted.uuid)
                    .map(|local| local.payload.dirty && local.payload.content != decrypted.content)
                    .unwrap_or(false);

                if local_dirty_and_differs {
                    let mut duplicate = decrypted.clone();
                    duplicate.uuid = uuid::Uuid::new_v4().to_string();
                    to_ingest.push(duplicate);
                }
                to_ingest.push(decrypted);
            }

            for saved in &response.saved_items {
                let cleared = state
                    .pipeline
                    .collection()
                    .get(&saved.uuid)
                    .map(|local| local.payload.dirtied_at.map(|d| d <= sync_begin).unwrap_or(true))
                    .unwrap_or(true);
                if !cleared {
                    // A newer local edit superseded this confirmation; leave
                    // the in-memory copy dirty for the next sync.
                    continue;
                }
                let mut confirmed = saved.clone();
                confirmed.dirty = false;
                confirmed.dirtied_at = None;
                confirmed.last_sync_end = Some(sync_begin);
                to_ingest.push(confirmed);
            }

            for conflict in &response.conflicts {
                match conflict.kind {
                    ConflictKind::ConflictUuid => uuid_alternations.push(conflict.server_item.uuid.clone()),
                    ConflictKind::ConflictData => {
                        let key = resolve_key_for_decryption(&conflict.server_item, &state.pipeline, &self.protocol, root_key);
                        let decrypted = self.protocol.decrypt_payload(&conflict.server_item, key.as_ref());
                        let mut duplicate = decrypted.clone();
                        duplicate.uuid = uuid::Uuid::new_v4().to_string();
                        to_ingest.push(duplicate);
                        to_ingest.push(decrypted);
                    }
                }
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state.pipeline.ingest(&to_ingest, PayloadSource::RemoteRetrieved, None);

            for old_uuid in &uuid_alternations {
                alternate_uuid(&mut state.pipeline, old_uuid, sync_begin);
            }

            let discardable: Vec<String> = state
                .pipeline
                .collection()
                .all()
                .filter(|i| i.payload.is_discardable())
                .map(|i| i.uuid().to_string())
                .collect();
            for uuid in discardable {
                state.pipeline.drop_discardable(&uuid);
            }
        }

        let mismatch = match &response.integrity_hash {
            Some(server_hash) => {
                let state = self.state.lock().unwrap();
                *server_hash != compute_integrity_hash(&state.pipeline)
            }
            None => false,
        };

        Ok(mismatch)
    }
}

/// Resolve the key to encrypt `content_type` under, plus the `items_key_id`
/// the payload should carry once encrypted (`None` for root-key-wrapped
/// content types, which never reference an items key).
fn resolve_key_for_encryption(
    content_type: &str,
    pipeline: &ItemPipeline,
    protocol: &ProtocolService,
    root_key: &RootKey,
) -> (Option<SymmetricKey>, Option<String>) {
    match key_requirement_for_encryption(content_type) {
        KeyRequirement::RootKey => (Some(root_key_to_symmetric(root_key)), None),
        KeyRequirement::DefaultItemsKey => {
            let ik_mgr = ItemsKeyManager::new(protocol);
            let Some(default) = ik_mgr.default_items_key(pipeline.collection()) else {
                return (None, None);
            };
            match &default.variant {
                ItemVariant::ItemsKey(content) => {
                    (Some(SymmetricKey::aead_only(content.items_key)), Some(default.uuid().to_string()))
                }
                _ => (None, None),
            }
        }
        KeyRequirement::ItemsKeyById(_) => (None, None),
    }
}

fn resolve_key_for_decryption(
    payload: &Payload,
    pipeline: &ItemPipeline,
    protocol: &ProtocolService,
    root_key: &RootKey,
) -> Option<SymmetricKey> {
    match key_requirement_for_decryption(&payload.content_type, payload.items_key_id.as_deref()) {
        KeyRequirement::RootKey => Some(root_key_to_symmetric(root_key)),
        KeyRequirement::DefaultItemsKey => {
            let ik_mgr = ItemsKeyManager::new(protocol);
            let default = ik_mgr.default_items_key(pipeline.collection())?;
            match &default.variant {
                ItemVariant::ItemsKey(content) => Some(SymmetricKey::aead_only(content.items_key)),
                _ => None,
            }
        }
        KeyRequirement::ItemsKeyById(id) => {
            let item = pipeline.collection().get(&id)?;
            match &item.variant {
                ItemVariant::ItemsKey(content) => Some(SymmetricKey::aead_only(content.items_key)),
                _ => None,
            }
        }
    }
}

/// §4.5's uuid alternation: tombstone the old uuid, recreate an identical
/// item under a fresh one, and rewrite every referrer to point at it.
fn alternate_uuid(pipeline: &mut ItemPipeline, old_uuid: &str, now: DateTime<Utc>) -> Option<String> {
    let old_item = pipeline.collection().get(old_uuid)?.clone();
    let new_uuid = uuid::Uuid::new_v4().to_string();

    let tombstone = Payload::tombstone(old_uuid, old_item.content_type(), now);

    let mut recreated = old_item.payload.clone();
    recreated.uuid = new_uuid.clone();
    recreated.dirty = true;
    recreated.dirtied_at = Some(now);
    recreated.updated_at = now;

    let referrers = pipeline.graph().inverse_refs(old_uuid);
    let mut batch = vec![tombstone, recreated];
    for referrer_uuid in referrers {
        if let Some(referrer) = pipeline.collection().get(&referrer_uuid) {
            if let Some(rewritten) = rewrite_reference(&referrer.payload, old_uuid, &new_uuid, now) {
                batch.push(rewritten);
            }
        }
    }

    pipeline.ingest(&batch, PayloadSource::LocalChanged, None);
    Some(new_uuid)
}

fn rewrite_reference(payload: &Payload, old_uuid: &str, new_uuid: &str, now: DateTime<Utc>) -> Option<Payload> {
    let value = payload.content.as_decrypted()?;
    let mut content = value.clone();
    let array = content.get("references")?.as_array()?.clone();
    let mut changed = false;
    let rewritten: Vec<serde_json::Value> = array
        .into_iter()
        .map(|mut entry| {
            if entry.get("uuid").and_then(|u| u.as_str()) == Some(old_uuid) {
                if let Some(map) = entry.as_object_mut() {
                    map.insert("uuid".into(), serde_json::json!(new_uuid));
                }
                changed = true;
            }
            entry
        })
        .collect();

    if !changed {
        return None;
    }
    if let Some(map) = content.as_object_mut() {
        map.insert("references".into(), serde_json::Value::Array(rewritten));
    }

    Some(payload.copy_with(now, |p| {
        p.content = PayloadContent::Decrypted(content);
    }))
}

fn compute_integrity_hash(pipeline: &ItemPipeline) -> String {
    let mut entries: Vec<(String, String)> = pipeline
        .collection()
        .all()
        .map(|i| (i.uuid().to_string(), i.payload.updated_at.to_rfc3339()))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (uuid, updated_at) in entries {
        hasher.update(uuid.as_bytes());
        hasher.update(updated_at.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::CONTENT_TYPE_NOTE;
    use crate::sync::wire::{ScriptedTransport, SyncConflict, SyncResponse};
    use vault_protocol::PayloadContent;

    fn note_payload(uuid: &str, title: &str) -> Payload {
        let now = Utc::now();
        Payload {
            uuid: uuid.into(),
            content_type: CONTENT_TYPE_NOTE.into(),
            content: PayloadContent::Decrypted(serde_json::json!({"title": title, "references": []})),
            items_key_id: None,
            enc_item_key: None,
            created_at: now,
            updated_at: now,
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
        }
    }

    fn root_key() -> RootKey {
        RootKey::new([4u8; 32], None, "004")
    }

    #[test]
    fn locked_controller_refuses_sync() {
        let protocol = Arc::new(ProtocolService::new());
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let controller = SyncController::new(transport, protocol, SyncConfig::default());
        controller.lock_syncing();
        let result = controller.perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key(), KeyMode::RootKeyOnly);
        assert!(matches!(result, Err(SyncRunError(SyncError::SyncLocked))));
    }

    #[test]
    fn full_sync_uploads_dirty_items_and_clears_dirty_on_confirmation() {
        let protocol = Arc::new(ProtocolService::new());
        let rk = root_key();
        let items_key = protocol.create_default_items_key(&rk).unwrap();

        let items_key_payload = Payload {
            uuid: "ik-1".into(),
            content_type: crate::item::CONTENT_TYPE_ITEMS_KEY.into(),
            content: PayloadContent::Decrypted(serde_json::to_value(&items_key).unwrap()),
            items_key_id: None,
            enc_item_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            dirty: false,
            dirtied_at: None,
            last_sync_begin: None,
            last_sync_end: None,
            error_decrypting: false,
            error_decrypting_changed: false,
            waiting_for_key: false,
            dummy: false,
            auth_hash: None,
            auth_params: None,
        };

        let note = note_payload("note-1", "hello");
        let server_saved = note.project(vault_protocol::FieldSet::ServerSaved);

        let transport = Arc::new(ScriptedTransport::new(vec![SyncResponse {
            retrieved_items: Vec::new(),
            saved_items: vec![server_saved],
            conflicts: Vec::new(),
            sync_token: Some("tok".into()),
            cursor_token: None,
            integrity_hash: None,
        }]));
        let controller = SyncController::new(transport.clone(), protocol.clone(), SyncConfig::default());
        controller.ingest_local(&[items_key_payload]);
        controller.ingest_local(&[note]);

        let outcome = controller
            .perform_sync(SyncMode::Default, QueueStrategy::Default, &rk, KeyMode::RootKeyOnly)
            .unwrap();
        assert_eq!(outcome, SyncOutcome::FullSyncCompleted);

        let first_request = transport.requests_seen.lock().unwrap()[0].clone();
        assert_eq!(first_request.items.len(), 1);
        assert!(first_request.items[0].content.as_encrypted_str().unwrap().starts_with("004"));

        let cleared = controller.with_pipeline(|p| p.collection().get("note-1").unwrap().payload.dirty);
        assert!(!cleared);
    }

    #[test]
    fn uuid_conflict_alternates_and_updates_referrers() {
        let protocol = Arc::new(ProtocolService::new());
        let conflicting_server_item = note_payload("note-a", "someone else's content");
        let transport = Arc::new(ScriptedTransport::new(vec![SyncResponse {
            retrieved_items: Vec::new(),
            saved_items: Vec::new(),
            conflicts: vec![SyncConflict { kind: ConflictKind::ConflictUuid, server_item: conflicting_server_item }],
            sync_token: Some("tok".into()),
            cursor_token: None,
            integrity_hash: None,
        }]));
        let controller = SyncController::new(transport.clone(), protocol, SyncConfig::default());

        let note = note_payload("note-a", "note A");
        controller.ingest_local(&[note]);

        let tag = Payload {
            uuid: "tag-1".into(),
            content_type: "Tag".into(),
            content: PayloadContent::Decrypted(serde_json::json!({
                "title": "Work",
                "references": [{"uuid": "note-a", "content_type": "Note"}],
            })),
            items_key_id: None,
            enc_item_key: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted: false,
            dirty: false,
            dirtied_at: None,
            last_sync_begin: None,
            last_sync_end: None,
            error_decrypting: false,
            error_decrypting_changed: false,
            waiting_for_key: false,
            dummy: false,
            auth_hash: None,
            auth_params: None,
        };
        controller.ingest_local(&[tag]);

        controller
            .perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key(), KeyMode::RootKeyOnly)
            .unwrap();

        let note_a_deleted = controller.with_pipeline(|p| p.collection().contains("note-a"));
        assert!(!note_a_deleted, "old uuid should have been tombstoned out of the collection");

        let tag_refs = controller.with_pipeline(|p| {
            let tag = p.collection().get("tag-1").unwrap();
            tag.references.clone()
        });
        assert_eq!(tag_refs.len(), 1);
        assert_ne!(tag_refs[0].uuid, "note-a");
    }

    #[test]
    fn integrity_mismatch_enters_out_of_sync() {
        let protocol = Arc::new(ProtocolService::new());
        let transport = Arc::new(ScriptedTransport::new(vec![SyncResponse {
            retrieved_items: Vec::new(),
            saved_items: Vec::new(),
            conflicts: Vec::new(),
            sync_token: Some("tok".into()),
            cursor_token: None,
            integrity_hash: Some("not-the-real-hash".into()),
        }]));
        let controller = SyncController::new(transport, protocol, SyncConfig::default());

        let outcome = controller
            .perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key(), KeyMode::RootKeyOnly)
            .unwrap();
        assert_eq!(outcome, SyncOutcome::EnteredOutOfSync);
        assert!(controller.is_out_of_sync());
    }
}
