//! Audit logging: every key-mode transition and storage access emits a
//! structured event, mirroring the audit sink taxonomy this lineage's
//! keystore crate uses for key lifecycle operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use vault_protocol::KeyMode;

// ---------------------------------------------------------------------------
// Audit events
// ---------------------------------------------------------------------------

/// What happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AuditAction {
    RootKeyCreated,
    RootKeyUnwrapped,
    RootKeyUnwrapFailed,
    WrappingKeyValidated { valid: bool },
    KeyModeTransitioned { from: String, to: String },
    StorageDomainCleared { domain: String },
    SignedOut,
}

/// A structured audit event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub key_mode: Option<KeyMode>,
    pub action: AuditAction,
    pub actor: String,
    pub success: bool,
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

impl AuditEvent {
    pub fn key_mode_event(key_mode: KeyMode, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            key_mode: Some(key_mode),
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    pub fn system_event(action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            key_mode: None,
            action,
            actor: "system".into(),
            success: true,
            detail: None,
            sequence: None,
            prev_hash: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.success = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Audit sink trait
// ---------------------------------------------------------------------------

/// Where audit events go. Implement this for your SIEM/log system.
pub trait AuditSinkSync: Send + Sync {
    fn record(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Built-in sinks
// ---------------------------------------------------------------------------

/// Logs events via the `tracing` crate.
pub struct TracingAuditSink;

impl AuditSinkSync for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            timestamp = %event.timestamp,
            key_mode = ?event.key_mode,
            action = ?event.action,
            actor = %event.actor,
            success = event.success,
            detail = ?event.detail,
            "audit"
        );
    }
}

/// Collects events in memory (for testing).
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }
}

impl AuditSinkSync for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.try_lock() {
            events.push(event);
        }
    }
}

/// Writes JSON events to a file (append-only).
pub struct FileAuditSink {
    path: std::path::PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSinkSync for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        use std::io::Write;
        match std::fs::OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        tracing::warn!(error = %e, "audit file write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "audit event serialize failed"),
            },
            Err(e) => tracing::warn!(path = ?self.path, error = %e, "cannot open audit file"),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity chain sink (tamper-evident audit log)
// ---------------------------------------------------------------------------

/// Wraps any `AuditSinkSync` and adds a SHA-256 hash chain, so a verifier can
/// replay the log and detect insertion, deletion, or modification of events.
pub struct IntegrityChainSink {
    inner: Arc<dyn AuditSinkSync>,
    state: std::sync::Mutex<ChainState>,
}

struct ChainState {
    sequence: u64,
    prev_hash: String,
}

impl IntegrityChainSink {
    pub fn new(inner: Arc<dyn AuditSinkSync>) -> Self {
        use sha2::{Digest, Sha256};
        let genesis = format!("{:x}", Sha256::digest(b"vault-audit-genesis"));
        Self {
            inner,
            state: std::sync::Mutex::new(ChainState {
                sequence: 0,
                prev_hash: genesis,
            }),
        }
    }
}

impl AuditSinkSync for IntegrityChainSink {
    fn record(&self, mut event: AuditEvent) {
        use sha2::{Digest, Sha256};

        let mut state = self.state.lock().unwrap();
        event.sequence = Some(state.sequence);
        event.prev_hash = Some(state.prev_hash.clone());

        if let Ok(json) = serde_json::to_string(&event) {
            state.prev_hash = format!("{:x}", Sha256::digest(json.as_bytes()));
        }
        state.sequence += 1;

        drop(state);
        self.inner.record(event);
    }
}
