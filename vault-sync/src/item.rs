//! The item model (§3, §4.5): a typed view over the latest payload for a
//! uuid, plus the denormalized reference list the reference graph is built
//! from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vault_protocol::{Payload, PayloadContent};

use crate::error::SyncError;

/// A single entry in an item's denormalized reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemReference {
    pub uuid: String,
    pub content_type: String,
}

/// Whether a mutation came from the user directly interacting with an item,
/// or from internal bookkeeping (sync reconciliation, migration). Only
/// `UserInteraction` touches `user_modified_date` (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    UserInteraction,
    Internal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub references: Vec<ItemReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_modified_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub references: Vec<ItemReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_modified_date: Option<String>,
}

/// Holds a predicate describing membership, not a denormalized reference
/// list — a smart tag's "contents" are computed on demand by evaluating the
/// predicate against the collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartTagContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub predicate: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_modified_date: Option<String>,
}

/// Catch-all content shape for variants whose internal structure the sync
/// engine does not need to reason about beyond references: `Component`,
/// `Theme`, `Editor`, `ActionsExtension`, `Privileges`, `HistorySession`,
/// `UserPrefs`, `EncryptedStorage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericContent {
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub references: Vec<ItemReference>,
}

/// The typed view for one item's content, tagged by `content_type`.
#[derive(Debug, Clone)]
pub enum ItemVariant {
    Note(NoteContent),
    Tag(TagContent),
    SmartTag(SmartTagContent),
    ItemsKey(vault_protocol::ItemsKeyContent),
    Component(GenericContent),
    Theme(GenericContent),
    Editor(GenericContent),
    ActionsExtension(GenericContent),
    Privileges(GenericContent),
    HistorySession(GenericContent),
    UserPrefs(GenericContent),
    EncryptedStorage(GenericContent),
    /// Never synced; content lives only in the keychain/storage facade.
    RootKey,
    /// Content is still ciphertext, or an unrecognized content type.
    Unresolved,
}

pub const CONTENT_TYPE_NOTE: &str = "Note";
pub const CONTENT_TYPE_TAG: &str = "Tag";
pub const CONTENT_TYPE_SMART_TAG: &str = "SmartTag";
pub const CONTENT_TYPE_ITEMS_KEY: &str = "ItemsKey";
pub const CONTENT_TYPE_COMPONENT: &str = "Component";
pub const CONTENT_TYPE_THEME: &str = "Theme";
pub const CONTENT_TYPE_EDITOR: &str = "Editor";
pub const CONTENT_TYPE_ACTIONS_EXTENSION: &str = "ActionsExtension";
pub const CONTENT_TYPE_PRIVILEGES: &str = "Privileges";
pub const CONTENT_TYPE_HISTORY_SESSION: &str = "HistorySession";
pub const CONTENT_TYPE_USER_PREFS: &str = "UserPrefs";
pub const CONTENT_TYPE_ENCRYPTED_STORAGE: &str = "EncryptedStorage";
pub const CONTENT_TYPE_ROOT_KEY: &str = "RootKey";

/// A typed, live view of the latest payload for a uuid.
#[derive(Debug, Clone)]
pub struct Item {
    pub payload: Payload,
    pub references: Vec<ItemReference>,
    pub variant: ItemVariant,
}

impl Item {
    pub fn uuid(&self) -> &str {
        &self.payload.uuid
    }

    pub fn content_type(&self) -> &str {
        &self.payload.content_type
    }

    pub fn is_deleted(&self) -> bool {
        self.payload.deleted
    }

    /// Project a decrypted payload into its concrete item variant (§4.5
    /// step 1). Payloads whose content is still ciphertext (awaiting a key,
    /// or a decrypt failure) project to `ItemVariant::Unresolved` with an
    /// empty reference list — the pipeline must not propagate stale
    /// references for content it cannot see.
    pub fn from_payload(payload: &Payload) -> Item {
        let Some(value) = payload.content.as_decrypted() else {
            return Item {
                payload: payload.clone(),
                references: Vec::new(),
                variant: ItemVariant::Unresolved,
            };
        };

        let (variant, references) = parse_variant(&payload.content_type, value);
        Item {
            payload: payload.clone(),
            references,
            variant,
        }
    }
}

fn extract_references(value: &serde_json::Value) -> Vec<ItemReference> {
    value
        .get("references")
        .and_then(|r| serde_json::from_value::<Vec<ItemReference>>(r.clone()).ok())
        .unwrap_or_default()
}

fn parse_variant(content_type: &str, value: &serde_json::Value) -> (ItemVariant, Vec<ItemReference>) {
    let references = extract_references(value);
    let variant = match content_type {
        CONTENT_TYPE_NOTE => serde_json::from_value(value.clone()).map(ItemVariant::Note).unwrap_or(ItemVariant::Unresolved),
        CONTENT_TYPE_TAG => serde_json::from_value(value.clone()).map(ItemVariant::Tag).unwrap_or(ItemVariant::Unresolved),
        CONTENT_TYPE_SMART_TAG => serde_json::from_value(value.clone())
            .map(ItemVariant::SmartTag)
            .unwrap_or(ItemVariant::Unresolved),
        CONTENT_TYPE_ITEMS_KEY => serde_json::from_value(value.clone())
            .map(ItemVariant::ItemsKey)
            .unwrap_or(ItemVariant::Unresolved),
        CONTENT_TYPE_COMPONENT => ItemVariant::Component(generic(value)),
        CONTENT_TYPE_THEME => ItemVariant::Theme(generic(value)),
        CONTENT_TYPE_EDITOR => ItemVariant::Editor(generic(value)),
        CONTENT_TYPE_ACTIONS_EXTENSION => ItemVariant::ActionsExtension(generic(value)),
        CONTENT_TYPE_PRIVILEGES => ItemVariant::Privileges(generic(value)),
        CONTENT_TYPE_HISTORY_SESSION => ItemVariant::HistorySession(generic(value)),
        CONTENT_TYPE_USER_PREFS => ItemVariant::UserPrefs(generic(value)),
        CONTENT_TYPE_ENCRYPTED_STORAGE => ItemVariant::EncryptedStorage(generic(value)),
        CONTENT_TYPE_ROOT_KEY => ItemVariant::RootKey,
        _ => ItemVariant::Unresolved,
    };
    // SmartTag carries a predicate, not a reference list (§3); never surface
    // stray "references" fields for it into the graph.
    if content_type == CONTENT_TYPE_SMART_TAG {
        (variant, Vec::new())
    } else {
        (variant, references)
    }
}

fn generic(value: &serde_json::Value) -> GenericContent {
    let references = extract_references(value);
    let fields = match value {
        serde_json::Value::Object(map) => {
            let mut map = map.clone();
            map.remove("references");
            map
        }
        _ => serde_json::Map::new(),
    };
    GenericContent { fields, references }
}

/// Apply `edit` to a typed content snapshot of `item` and produce the new,
/// dirty payload that results (§4.5: "the mutator takes a snapshot of the
/// item, applies caller edits, produces a new payload with `dirty=true`").
/// The original item/payload is left untouched.
pub fn mutate<T, F>(item: &Item, now: DateTime<Utc>, mutation_type: MutationType, edit: F) -> Result<Payload, SyncError>
where
    T: Serialize + serde::de::DeserializeOwned,
    F: FnOnce(&mut T),
{
    let value = item.payload.content.as_decrypted().ok_or(SyncError::ContentNotDecrypted)?;
    let mut content: T = serde_json::from_value(value.clone()).map_err(|_| SyncError::MalformedContent)?;
    edit(&mut content);

    let mut new_value = serde_json::to_value(&content).map_err(|_| SyncError::MalformedContent)?;
    if mutation_type == MutationType::UserInteraction {
        if let serde_json::Value::Object(ref mut map) = new_value {
            map.insert("user_modified_date".into(), serde_json::json!(now.to_rfc3339()));
        }
    }

    Ok(item.payload.copy_with(now, |p| {
        p.content = PayloadContent::Decrypted(new_value);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_payload(uuid: &str, references: Vec<ItemReference>) -> Payload {
        let now = Utc::now();
        Payload {
            uuid: uuid.into(),
            content_type: CONTENT_TYPE_NOTE.into(),
            content: PayloadContent::Decrypted(serde_json::json!({
                "title": "T",
                "text": "X",
                "references": references,
            })),
            items_key_id: None,
            enc_item_key: None,
            created_at: now,
            updated_at: now,
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
        }
    }

    #[test]
    fn from_payload_parses_note_and_references() {
        let refs = vec![ItemReference { uuid: "tag-1".into(), content_type: CONTENT_TYPE_TAG.into() }];
        let item = Item::from_payload(&note_payload("note-1", refs.clone()));
        assert!(matches!(item.variant, ItemVariant::Note(_)));
        assert_eq!(item.references, refs);
    }

    #[test]
    fn ciphertext_content_projects_to_unresolved_with_no_references() {
        let mut p = note_payload("note-1", vec![ItemReference { uuid: "x".into(), content_type: "Tag".into() }]);
        p.content = PayloadContent::Encrypted("004:...".into());
        let item = Item::from_payload(&p);
        assert!(matches!(item.variant, ItemVariant::Unresolved));
        assert!(item.references.is_empty());
    }

    #[test]
    fn mutate_marks_dirty_and_leaves_original_untouched() {
        let original = note_payload("note-1", vec![]);
        let item = Item::from_payload(&original);
        let now = Utc::now();
        let mutated = mutate::<NoteContent, _>(&item, now, MutationType::UserInteraction, |n| {
            n.title = "new title".into();
        })
        .unwrap();

        assert!(mutated.dirty);
        assert!(!original.dirty);
        let value = mutated.content.as_decrypted().unwrap();
        assert_eq!(value["title"], "new title");
        assert!(value.get("user_modified_date").is_some());
    }

    #[test]
    fn internal_mutation_does_not_set_user_modified_date() {
        let original = note_payload("note-1", vec![]);
        let item = Item::from_payload(&original);
        let mutated = mutate::<NoteContent, _>(&item, Utc::now(), MutationType::Internal, |n| {
            n.text = "y".into();
        })
        .unwrap();
        let value = mutated.content.as_decrypted().unwrap();
        assert!(value.get("user_modified_date").is_none());
    }

    #[test]
    fn smart_tag_predicate_never_yields_references() {
        let now = Utc::now();
        let payload = Payload {
            uuid: "smart-1".into(),
            content_type: CONTENT_TYPE_SMART_TAG.into(),
            content: PayloadContent::Decrypted(serde_json::json!({
                "title": "Recent",
                "predicate": {"op": "newer_than", "days": 7},
            })),
            items_key_id: None,
            enc_item_key: None,
            created_at: now,
            updated_at: now,
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
        let item = Item::from_payload(&payload);
        assert!(matches!(item.variant, ItemVariant::SmartTag(_)));
        assert!(item.references.is_empty());
    }
}
