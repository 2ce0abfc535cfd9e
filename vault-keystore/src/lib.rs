//! # vault-keystore
//!
//! The stateful shell around `vault-protocol`'s pure key-mode machine: a
//! storage facade over three value domains, a key manager implementing the
//! wrap/unwrap lifecycle, and an audit log every key-mode transition reports
//! into.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use vault_keystore::{InMemoryAuditSink, InMemoryBackend, InMemoryKeychain, KeyManager};
//! use vault_protocol::{KeyParams, RootKey};
//!
//! let storage = Arc::new(InMemoryBackend::new());
//! let keychain = Arc::new(InMemoryKeychain::new());
//! let audit = Arc::new(InMemoryAuditSink::new());
//! let manager = KeyManager::new(storage, keychain, audit).unwrap();
//!
//! let key = RootKey::new([1u8; 32], None, "004");
//! let params = KeyParams {
//!     identifier: "user@example.com".into(),
//!     version: "004".into(),
//!     salt: vec![0u8; 16],
//!     pbkdf2_cost: None,
//!     argon2_params: None,
//! };
//! manager.set_new_root_key(&key, &params, None).unwrap();
//! assert!(manager.mode().has_root_key());
//! ```

pub mod audit;
pub mod error;
pub mod facade;
pub mod keychain;
pub mod keymanager;
pub mod policy;
pub mod storage;

pub use audit::{AuditAction, AuditEvent, AuditSinkSync, FileAuditSink, InMemoryAuditSink, IntegrityChainSink, TracingAuditSink};
pub use error::{KeystoreError, SetRootKeyError, UnwrapError};
pub use facade::StorageFacade;
pub use keychain::{InMemoryKeychain, KeychainClient};
pub use keymanager::KeyManager;
pub use policy::{LifecycleStage, StorageConfig, StorageEncryptionPolicy, StoragePersistencePolicy};
pub use storage::{FileBackend, InMemoryBackend, StorageBackend, StorageDomain};
