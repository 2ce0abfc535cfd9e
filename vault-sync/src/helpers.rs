//! Singleton, privileges, and history-session helpers (§2: "auxiliary item
//! policies over the above"). These sit above the collection/pipeline and
//! are not required by the sync lifecycle itself, but an application wiring
//! a notes UI over this crate needs them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use vault_protocol::{Payload, PayloadContent};

use crate::collection::Collection;
use crate::item::{GenericContent, Item, ItemVariant, CONTENT_TYPE_HISTORY_SESSION, CONTENT_TYPE_PRIVILEGES};
use crate::pipeline::{ItemPipeline, PayloadSource};

fn blank_payload(content_type: &str, fields: serde_json::Map<String, Value>, now: DateTime<Utc>) -> Payload {
    Payload {
        uuid: uuid::Uuid::new_v4().to_string(),
        content_type: content_type.to_string(),
        content: PayloadContent::Decrypted(Value::Object(fields)),
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

/// Find the single live item of a singleton content type (`Privileges`,
/// `UserPrefs`, `HistorySession`), tolerating accidental duplicates by
/// picking the oldest survivor — the same leniency
/// [`ItemsKeyManager::default_items_key`](crate::items_key_manager::ItemsKeyManager::default_items_key)
/// applies to items keys.
pub fn find_singleton<'c>(collection: &'c Collection, content_type: &str) -> Option<&'c Item> {
    let mut candidates = collection.by_content_type(content_type);
    candidates.sort_by_key(|i| i.payload.created_at);
    candidates.into_iter().next()
}

/// Create a singleton item of `content_type` seeded with `fields`, unless one
/// already exists. Returns `None` when a singleton is already present.
pub fn create_singleton_if_absent(
    collection: &Collection,
    content_type: &str,
    fields: serde_json::Map<String, Value>,
    now: DateTime<Utc>,
) -> Option<Payload> {
    if find_singleton(collection, content_type).is_some() {
        return None;
    }
    Some(blank_payload(content_type, fields, now))
}

/// Whether the `Privileges` singleton grants `action`, a free-form key the
/// application defines (e.g. `"delete_account"`). No privileges item, or no
/// entry for the action, means not granted.
pub fn has_privilege(collection: &Collection, action: &str) -> bool {
    let Some(item) = find_singleton(collection, CONTENT_TYPE_PRIVILEGES) else {
        return false;
    };
    match &item.variant {
        ItemVariant::Privileges(GenericContent { fields, .. }) => {
            fields.get(action).and_then(Value::as_bool).unwrap_or(false)
        }
        _ => false,
    }
}

/// Append one entry to the `HistorySession` singleton tracking recent edits
/// across the collection, capped at `max_entries` (oldest dropped first).
pub fn record_history_entry(pipeline: &mut ItemPipeline, item_uuid: &str, action: &str, now: DateTime<Utc>, max_entries: usize) {
    let existing = find_singleton(pipeline.collection(), CONTENT_TYPE_HISTORY_SESSION);

    let mut entries: Vec<Value> = existing
        .and_then(|i| match &i.variant {
            ItemVariant::HistorySession(GenericContent { fields, .. }) => fields.get("entries").cloned(),
            _ => None,
        })
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();

    entries.push(serde_json::json!({ "uuid": item_uuid, "action": action, "at": now.to_rfc3339() }));
    if entries.len() > max_entries {
        let overflow = entries.len() - max_entries;
        entries.drain(0..overflow);
    }

    let mut fields = serde_json::Map::new();
    fields.insert("entries".into(), Value::Array(entries));

    let payload = match existing {
        Some(item) => item.payload.copy_with(now, |p| {
            p.content = PayloadContent::Decrypted(Value::Object(fields.clone()));
        }),
        None => blank_payload(CONTENT_TYPE_HISTORY_SESSION, fields, now),
    };

    pipeline.ingest(&[payload], PayloadSource::LocalChanged, None);
}
