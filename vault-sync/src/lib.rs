//! Item model, reference graph, items-key manager, and sync controller,
//! layered over `vault_protocol`'s pure crypto and `vault_keystore`'s
//! key/storage façade.

pub mod collection;
pub mod config;
pub mod error;
pub mod graph;
pub mod helpers;
pub mod item;
pub mod items_key_manager;
pub mod pipeline;
pub mod sync;

pub use collection::Collection;
pub use config::SyncConfig;
pub use error::{MutateError, SyncError, SyncRunError};
pub use graph::ReferenceGraph;
pub use item::{Item, ItemReference, ItemVariant, MutationType};
pub use items_key_manager::ItemsKeyManager;
pub use pipeline::{ContentTypeFilter, ItemPipeline, ObservationKind, PayloadSource};
pub use sync::{ConflictKind, QueueStrategy, SyncConflict, SyncController, SyncMode, SyncOutcome, SyncRequest, SyncResponse, SyncTransport};
