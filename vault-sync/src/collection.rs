//! The item collection (§3): an indexed, typed container of current items,
//! keyed by uuid with a secondary index by content type.

use std::collections::{HashMap, HashSet};

use crate::item::Item;

#[derive(Debug, Default)]
pub struct Collection {
    items: HashMap<String, Item>,
    by_content_type: HashMap<String, HashSet<String>>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uuid: &str) -> Option<&Item> {
        self.items.get(uuid)
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.items.contains_key(uuid)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert or replace the current item for a uuid, keeping the
    /// content-type index in sync. If the content type changed from a prior
    /// insertion for this uuid, the old index entry is removed.
    pub fn upsert(&mut self, item: Item) {
        let uuid = item.uuid().to_string();
        if let Some(old) = self.items.get(&uuid) {
            if old.content_type() != item.content_type() {
                if let Some(set) = self.by_content_type.get_mut(old.content_type()) {
                    set.remove(&uuid);
                }
            }
        }
        self.by_content_type.entry(item.content_type().to_string()).or_default().insert(uuid.clone());
        self.items.insert(uuid, item);
    }

    /// Remove a uuid entirely (§4.5 step 2: deleted items are detached).
    pub fn remove(&mut self, uuid: &str) -> Option<Item> {
        let removed = self.items.remove(uuid);
        if let Some(ref item) = removed {
            if let Some(set) = self.by_content_type.get_mut(item.content_type()) {
                set.remove(uuid);
            }
        }
        removed
    }

    pub fn by_content_type(&self, content_type: &str) -> Vec<&Item> {
        self.by_content_type
            .get(content_type)
            .map(|uuids| uuids.iter().filter_map(|u| self.items.get(u)).collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Items with local, unsynced changes eligible for upload (§4.5's dirty
    /// set): `dirty ∧ ¬dummy ∧ (¬error_decrypting ∨ deleted)`.
    pub fn dirty_items(&self) -> Vec<&Item> {
        self.items.values().filter(|i| i.payload.is_syncable()).collect()
    }
}
