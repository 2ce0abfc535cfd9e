//! The item pipeline (§4.5): projects payloads into items, maintains the
//! reference graph and collection, and fans out typed notifications to
//! observers.

use vault_protocol::Payload;

use crate::collection::Collection;
use crate::graph::ReferenceGraph;
use crate::item::Item;

/// Where a batch of payloads originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    LocalChanged,
    RemoteRetrieved,
    FileImport,
    ComponentRetrieved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    Inserted,
    Changed,
}

/// An observer's content-type filter; `Any` matches every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTypeFilter {
    Any,
    Only(&'static str),
}

impl ContentTypeFilter {
    fn matches(&self, content_type: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(ct) => *ct == content_type,
        }
    }
}

type Observer = Box<dyn FnMut(&[&Item], PayloadSource, Option<&str>, ObservationKind) + Send>;

/// Subscribes to payload insertions/changes, maintains the collection and
/// reference graph, and fans notifications out to registered observers in
/// registration order (§5's ordering guarantee).
pub struct ItemPipeline {
    collection: Collection,
    graph: ReferenceGraph,
    observers: Vec<(ContentTypeFilter, Observer)>,
}

impl Default for ItemPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemPipeline {
    pub fn new() -> Self {
        Self {
            collection: Collection::new(),
            graph: ReferenceGraph::new(),
            observers: Vec::new(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn graph(&self) -> &ReferenceGraph {
        &self.graph
    }

    pub fn observe(&mut self, filter: ContentTypeFilter, observer: Observer) {
        self.observers.push((filter, observer));
    }

    /// Ingest one batch of payloads (§4.5 steps 1-5).
    pub fn ingest(&mut self, payloads: &[Payload], source: PayloadSource, source_key: Option<&str>) {
        let mut inserted = Vec::new();
        let mut changed = Vec::new();

        for payload in payloads {
            let existed = self.collection.contains(&payload.uuid);
            let item = Item::from_payload(payload);

            if item.is_deleted() {
                self.graph.remove(item.uuid());
                self.collection.remove(item.uuid());
            } else {
                let referents: Vec<String> = item.references.iter().map(|r| r.uuid.clone()).collect();
                self.graph.set_forward_refs(item.uuid(), referents);
                self.collection.upsert(item.clone());
            }

            if existed {
                changed.push(item);
            } else {
                inserted.push(item);
            }
        }

        self.notify(&inserted, source, source_key, ObservationKind::Inserted);
        self.notify(&changed, source, source_key, ObservationKind::Changed);
    }

    /// Drop a discardable item (deleted and no longer dirty) from the
    /// collection and reference graph without emitting a notification; the
    /// caller already observed it via the ingest that made it discardable.
    pub fn drop_discardable(&mut self, uuid: &str) {
        self.graph.remove(uuid);
        self.collection.remove(uuid);
    }

    fn notify(&mut self, items: &[Item], source: PayloadSource, source_key: Option<&str>, kind: ObservationKind) {
        if items.is_empty() {
            return;
        }
        for (filter, observer) in &mut self.observers {
            let matching: Vec<&Item> = items.iter().filter(|i| filter.matches(i.content_type())).collect();
            if !matching.is_empty() {
                observer(&matching, source, source_key, kind);
            }
        }
    }
}
