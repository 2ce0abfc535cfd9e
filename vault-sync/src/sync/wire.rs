//! Wire shapes for one sync round-trip (§6): what the controller sends and
//! what the server is expected to answer with.

use vault_protocol::Payload;

/// One request to the sync endpoint.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub sync_token: Option<String>,
    pub cursor_token: Option<String>,
    /// Dirty payloads, already projected to `FieldSet::Server`.
    pub items: Vec<Payload>,
    pub compute_integrity: bool,
}

/// Why the server rejected one of our uploaded items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Another client already used this uuid; we must alternate ours (§4.5).
    ConflictUuid,
    /// The server's copy disagrees with ours at the content level.
    ConflictData,
}

#[derive(Debug, Clone)]
pub struct SyncConflict {
    pub kind: ConflictKind,
    pub server_item: Payload,
}

#[derive(Debug, Clone)]
pub struct SyncResponse {
    pub retrieved_items: Vec<Payload>,
    pub saved_items: Vec<Payload>,
    pub conflicts: Vec<SyncConflict>,
    pub sync_token: Option<String>,
    pub cursor_token: Option<String>,
    pub integrity_hash: Option<String>,
}

/// The network/server collaborator (§6). Kept synchronous deliberately — this
/// codebase's convention avoids pulling in `async_trait` for a single-method
/// request/response seam; callers that need async wrap their transport in a
/// blocking adapter.
pub trait SyncTransport: Send + Sync {
    fn sync(&self, request: SyncRequest) -> Result<SyncResponse, crate::error::SyncError>;
}

/// An in-memory transport for tests: a scripted sequence of responses handed
/// out one per call, in order.
pub struct ScriptedTransport {
    responses: std::sync::Mutex<std::collections::VecDeque<SyncResponse>>,
    pub requests_seen: std::sync::Mutex<Vec<SyncRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<SyncResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into_iter().collect()),
            requests_seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn empty_success() -> SyncResponse {
        SyncResponse {
            retrieved_items: Vec::new(),
            saved_items: Vec::new(),
            conflicts: Vec::new(),
            sync_token: Some("token-1".into()),
            cursor_token: None,
            integrity_hash: None,
        }
    }
}

impl SyncTransport for ScriptedTransport {
    fn sync(&self, request: SyncRequest) -> Result<SyncResponse, crate::error::SyncError> {
        self.requests_seen.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| crate::error::SyncError::Network("scripted transport exhausted".into()))
    }
}
