//! The sync subsystem (§4.6): wire shapes plus the controller that drives
//! them against an [`ItemPipeline`](crate::pipeline::ItemPipeline).

pub mod controller;
pub mod wire;

pub use controller::{SyncController, SyncMode, SyncOutcome, QueueStrategy};
pub use wire::{ConflictKind, ScriptedTransport, SyncConflict, SyncRequest, SyncResponse, SyncTransport};
