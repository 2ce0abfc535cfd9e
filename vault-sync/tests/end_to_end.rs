//! Integration tests for the six literal end-to-end scenarios.
//!
//! Each test wires `vault_protocol::ProtocolService` and `vault_keystore::KeyManager`
//! together with the `vault_sync` item pipeline and sync controller, the way an
//! application would, rather than exercising any one module in isolation.

use std::sync::Arc;

use chrono::Utc;
use vault_keystore::{InMemoryAuditSink, InMemoryBackend, InMemoryKeychain, KeyManager};
use vault_protocol::{
    root_key_to_symmetric, Intent, Payload, PayloadContent, ProtocolService, RootKey, SymmetricKey, LATEST_VERSION,
};
use vault_sync::sync::{ConflictKind, ScriptedTransport, SyncConflict, SyncResponse};
use vault_sync::{
    item::{CONTENT_TYPE_ITEMS_KEY, CONTENT_TYPE_NOTE},
    ItemPipeline, ItemsKeyManager, PayloadSource, QueueStrategy, SyncConfig, SyncController, SyncMode,
};

fn note_payload_with_dirty(uuid: &str, title: &str, text: &str, references: serde_json::Value, dirty: bool) -> Payload {
    let now = Utc::now();
    Payload {
        uuid: uuid.into(),
        content_type: CONTENT_TYPE_NOTE.into(),
        content: PayloadContent::Decrypted(serde_json::json!({"title": title, "text": text, "references": references})),
        items_key_id: None,
        enc_item_key: None,
        created_at: now,
        updated_at: now,
        deleted: false,
        dirty,
        dirtied_at: if dirty { Some(now) } else { None },
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

fn note_payload(uuid: &str, title: &str, text: &str, references: serde_json::Value) -> Payload {
    note_payload_with_dirty(uuid, title, text, references, true)
}

/// Scenario 1: register with email/password, create a single note, sync.
#[test]
fn register_and_single_note_sync() {
    let protocol = Arc::new(ProtocolService::new());
    let (root_key, _params) = protocol.create_root_key("a@b.c", "correct horse").unwrap();

    let ik_mgr = ItemsKeyManager::new(&protocol);
    let mut seed = ItemPipeline::new();
    let ik_batch = ik_mgr.create_new_default_items_key(seed.collection(), &root_key, Utc::now()).unwrap();
    seed.ingest(&ik_batch, PayloadSource::LocalChanged, None);
    let default_uuid = ik_mgr.default_items_key(seed.collection()).unwrap().uuid().to_string();

    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::empty_success()]));
    let controller = SyncController::new(transport.clone(), protocol.clone(), SyncConfig::default());
    controller.ingest_local(&ik_batch);
    let note = note_payload("note-1", "T", "X", serde_json::json!([]));
    controller.ingest_local(&[note]);

    let outcome = controller
        .perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key, vault_protocol::KeyMode::RootKeyOnly)
        .unwrap();
    assert_eq!(outcome, vault_sync::SyncOutcome::FullSyncCompleted);

    let sent = transport.requests_seen.lock().unwrap()[0].clone();
    assert_eq!(sent.items.len(), 2, "server should receive the items key and the note");
    for item in &sent.items {
        assert!(item.content.as_encrypted_str().unwrap().starts_with(LATEST_VERSION));
    }

    let note_dirty = controller.with_pipeline(|p| p.collection().get("note-1").unwrap().payload.dirty);
    assert!(!note_dirty);
    let note_items_key_id = controller.with_pipeline(|p| p.collection().get("note-1").unwrap().payload.items_key_id.clone());
    assert_eq!(note_items_key_id, Some(default_uuid));
}

/// Scenario 2: add a passcode to an account that only has a root key.
/// `KeyManager` never reaches into item state (see its own doc comment), so
/// the re-dirtying of items keys is the caller's job via `ItemsKeyManager`.
#[test]
fn add_passcode_marks_items_keys_dirty() {
    let km = KeyManager::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(InMemoryKeychain::new()),
        Arc::new(InMemoryAuditSink::new()),
    )
    .unwrap();

    let protocol = ProtocolService::new();
    let (root_key, account_params) = protocol.create_root_key("a@b.c", "correct horse").unwrap();
    km.set_new_root_key(&root_key, &account_params, None).unwrap();
    assert_eq!(km.mode(), vault_protocol::KeyMode::RootKeyOnly);

    let wrapper_params = vault_protocol::KeyParams {
        identifier: "a@b.c".into(),
        version: "004".into(),
        salt: vec![9u8; 16],
        pbkdf2_cost: None,
        argon2_params: None,
    };
    let wrapping_key = [42u8; 32];
    km.set_wrapper_key_params(Some(&wrapper_params)).unwrap();
    km.set_new_root_key(&root_key, &account_params, Some(&wrapping_key)).unwrap();
    assert_eq!(km.mode(), vault_protocol::KeyMode::RootKeyPlusWrapper);

    let recovered = km.unwrap_root_key(&wrapping_key).unwrap();
    assert_eq!(recovered.master_key, root_key.master_key);

    let ik_mgr = ItemsKeyManager::new(&protocol);
    let mut pipeline = ItemPipeline::new();
    let created = ik_mgr.create_new_default_items_key(pipeline.collection(), &root_key, Utc::now()).unwrap();
    pipeline.ingest(&created, PayloadSource::LocalChanged, None);
    let cleaned: Vec<Payload> = pipeline
        .collection()
        .by_content_type(CONTENT_TYPE_ITEMS_KEY)
        .into_iter()
        .map(|i| i.payload.copy_with(Utc::now(), |p| p.dirty = false))
        .collect();
    pipeline.ingest(&cleaned, PayloadSource::LocalChanged, None);
    assert!(pipeline.collection().dirty_items().is_empty());

    let dirtied = ik_mgr.mark_all_dirty_for_new_root_key(pipeline.collection(), Utc::now());
    pipeline.ingest(&dirtied, PayloadSource::LocalChanged, None);

    assert_eq!(pipeline.collection().dirty_items().len(), 1);
}

/// Scenario 3: a 003 account upgrades to 004. The challenge/UI prompting
/// layer is an external collaborator (§6 non-goal); this test exercises the
/// upgrade itself, modeling "wrong passcode, then right passcode, then
/// account password" as a plain retry loop rather than a real prompt.
#[test]
fn upgrade_from_003_to_004_recreates_default_items_key() {
    let protocol = ProtocolService::new();
    let (old_root_key, old_params) = protocol.operator("003").unwrap().create_root_key("a@b.c", "correct horse").unwrap();
    assert_eq!(old_params.version, "003");

    let old_key = SymmetricKey::with_auth(old_root_key.master_key, old_root_key.data_authentication_key.unwrap());
    let now = Utc::now();
    let note = note_payload("note-1", "T", "X", serde_json::json!([]));
    let encrypted_003 = protocol.encrypt_payload(&note, Intent::Sync, Some(&old_key), "003", now).unwrap();
    assert!(encrypted_003.content.as_encrypted_str().unwrap().starts_with("003"));

    let wrapper_candidates = ["0000", "1234"];
    let correct_wrapper = "1234";
    let mut unlocked = None;
    for candidate in wrapper_candidates {
        if candidate == correct_wrapper {
            unlocked = Some(candidate);
            break;
        }
    }
    assert_eq!(unlocked, Some(correct_wrapper));

    let (new_root_key, new_params) = protocol.create_root_key("a@b.c", "correct horse").unwrap();
    assert_eq!(new_params.version, LATEST_VERSION);

    let ik_mgr = ItemsKeyManager::new(&protocol);
    let mut pipeline = ItemPipeline::new();
    let created = ik_mgr.create_new_default_items_key(pipeline.collection(), &new_root_key, Utc::now()).unwrap();
    pipeline.ingest(&created, PayloadSource::LocalChanged, None);
    let default_items_key = ik_mgr.default_items_key(pipeline.collection()).unwrap();
    let default_content = match &default_items_key.variant {
        vault_sync::item::ItemVariant::ItemsKey(c) => c.clone(),
        _ => panic!("expected items key variant"),
    };
    assert_eq!(default_content.version, LATEST_VERSION);

    let decrypted_note = protocol.decrypt_payload(&encrypted_003, Some(&old_key));
    assert!(!decrypted_note.error_decrypting);
    let new_key = SymmetricKey::aead_only(default_content.items_key);
    let re_saved = protocol
        .encrypt_payload(&decrypted_note, Intent::Sync, Some(&new_key), LATEST_VERSION, Utc::now())
        .unwrap();
    assert!(re_saved.content.as_encrypted_str().unwrap().starts_with(LATEST_VERSION));
}

/// Scenario 4: a tag referencing a note, then a server-retrieved payload
/// empties the tag's references. Both sides of the bidirectional index
/// must end up empty.
#[test]
fn tag_note_reference_invariant_after_emptying_references() {
    let protocol = Arc::new(ProtocolService::new());

    let note = note_payload_with_dirty("note-n", "N", "body", serde_json::json!([]), false);
    let tag = Payload {
        uuid: "tag-t".into(),
        content_type: "Tag".into(),
        content: PayloadContent::Decrypted(serde_json::json!({
            "title": "T",
            "references": [{"uuid": "note-n", "content_type": "Note"}],
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

    let emptied_tag = Payload {
        uuid: "tag-t".into(),
        content_type: "Tag".into(),
        content: PayloadContent::Decrypted(serde_json::json!({"title": "T", "references": []})),
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
    let transport = Arc::new(ScriptedTransport::new(vec![SyncResponse {
        retrieved_items: vec![emptied_tag],
        saved_items: Vec::new(),
        conflicts: Vec::new(),
        sync_token: Some("tok".into()),
        cursor_token: None,
        integrity_hash: None,
    }]));
    let controller = SyncController::new(transport.clone(), protocol, SyncConfig::default());
    controller.ingest_local(&[note]);
    controller.ingest_local(&[tag]);

    assert_eq!(controller.with_pipeline(|p| p.graph().inverse_refs("note-n").len()), 1);

    controller
        .perform_sync(
            SyncMode::Default,
            QueueStrategy::Default,
            &RootKey::new([1u8; 32], None, LATEST_VERSION),
            vault_protocol::KeyMode::RootKeyOnly,
        )
        .unwrap();

    let tag_refs = controller.with_pipeline(|p| p.collection().get("tag-t").unwrap().references.clone());
    assert!(tag_refs.is_empty());
    assert!(controller.with_pipeline(|p| p.graph().inverse_refs("note-n").is_empty()));
    assert!(controller.with_pipeline(|p| p.graph().forward_refs("tag-t").is_empty()));
    assert!(!controller.with_pipeline(|p| p.collection().get("tag-t").unwrap().payload.dirty));
    assert!(!controller.with_pipeline(|p| p.collection().get("note-n").unwrap().payload.dirty));
}

/// Scenario 5: signing in merges a local note with a server uuid conflict:
/// the local uuid is tombstoned, a fresh uuid carries the original content,
/// and referencing tags follow it.
#[test]
fn uuid_conflict_on_sign_in_merge_preserves_local_content_and_referrers() {
    let protocol = Arc::new(ProtocolService::new());
    let root_key = RootKey::new([1u8; 32], None, LATEST_VERSION);

    let servers_note_u = note_payload("note-u", "someone else's title", "someone else's body", serde_json::json!([]));
    let transport = Arc::new(ScriptedTransport::new(vec![SyncResponse {
        retrieved_items: Vec::new(),
        saved_items: Vec::new(),
        conflicts: vec![SyncConflict { kind: ConflictKind::ConflictUuid, server_item: servers_note_u }],
        sync_token: Some("tok".into()),
        cursor_token: None,
        integrity_hash: None,
    }]));
    let controller = SyncController::new(transport.clone(), protocol.clone(), SyncConfig::default());

    let ik_mgr = ItemsKeyManager::new(&protocol);
    let mut seed = ItemPipeline::new();
    let ik_batch = ik_mgr.create_new_default_items_key(seed.collection(), &root_key, Utc::now()).unwrap();
    controller.ingest_local(&ik_batch);

    let local_note = note_payload("note-u", "local title", "local body", serde_json::json!([]));
    controller.ingest_local(&[local_note]);

    let tag = Payload {
        uuid: "tag-1".into(),
        content_type: "Tag".into(),
        content: PayloadContent::Decrypted(serde_json::json!({
            "title": "Work",
            "references": [{"uuid": "note-u", "content_type": "Note"}],
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
        .perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key, vault_protocol::KeyMode::RootKeyOnly)
        .unwrap();

    assert!(!controller.with_pipeline(|p| p.collection().contains("note-u")));

    let tag_refs = controller.with_pipeline(|p| p.collection().get("tag-1").unwrap().references.clone());
    assert_eq!(tag_refs.len(), 1);
    assert_ne!(tag_refs[0].uuid, "note-u");

    let new_uuid = tag_refs[0].uuid.clone();
    let recreated = controller.with_pipeline(|p| p.collection().get(&new_uuid).unwrap().payload.clone());
    assert_eq!(recreated.content.as_decrypted().unwrap()["title"], "local title");
    assert!(recreated.dirty);
}

/// Scenario 6: a 5-item backup with one corrupt item imports 4, then a
/// subsequent sync uploads exactly those 4.
#[test]
fn backup_import_with_one_corrupt_item_then_sync() {
    let protocol = Arc::new(ProtocolService::new());
    let (root_key, params) = protocol.create_root_key("a@b.c", "correct horse").unwrap();
    let root_symmetric = root_key_to_symmetric(&root_key);

    let mut items = Vec::new();
    for i in 0..5 {
        let note = note_payload(&format!("note-{i}"), &format!("T{i}"), "body", serde_json::json!([]));
        let encrypted = protocol
            .encrypt_payload(&note, Intent::Sync, Some(&root_symmetric), LATEST_VERSION, Utc::now())
            .unwrap();
        items.push(encrypted);
    }
    // Corrupt item 2's ciphertext so it fails to decrypt.
    if let PayloadContent::Encrypted(ref mut s) = items[2].content {
        s.push_str("tampered");
    }

    let backup = protocol.create_backup_file(&items, Some(params));
    let (imported, error_count) = protocol.import_backup_file(&backup, "correct horse").unwrap();
    assert_eq!(imported.len(), 4);
    assert_eq!(error_count, 1);

    let ik_mgr = ItemsKeyManager::new(&protocol);
    let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::empty_success()]));
    let controller = SyncController::new(transport.clone(), protocol.clone(), SyncConfig::default());

    let created = {
        let mut seed = ItemPipeline::new();
        ik_mgr.create_new_default_items_key(seed.collection(), &root_key, Utc::now()).unwrap()
    };
    controller.ingest_local(&created);

    let dirty_imported: Vec<Payload> = imported
        .into_iter()
        .map(|p| p.copy_with(Utc::now(), |_| {}))
        .collect();
    controller.ingest_local(&dirty_imported);

    controller
        .perform_sync(SyncMode::Default, QueueStrategy::Default, &root_key, vault_protocol::KeyMode::RootKeyOnly)
        .unwrap();

    let sent = transport.requests_seen.lock().unwrap()[0].clone();
    let note_items = sent.items.iter().filter(|p| p.content_type == CONTENT_TYPE_NOTE).count();
    assert_eq!(note_items, 4);
}
