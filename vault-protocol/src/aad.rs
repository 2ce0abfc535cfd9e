//! Associated data for the version 004 AEAD frame.
//!
//! `aad = base64(json({"u": uuid, "v": "004"}))`. Field order is fixed by
//! struct declaration order so the encoding is deterministic across runs,
//! which matters because the AAD is itself authenticated: the sender and
//! receiver must serialize it identically.

use serde::{Deserialize, Serialize};

use crate::error::{DecryptError, EncodingError};
use crate::wire::{b64_decode, b64_encode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAad {
    pub u: String,
    pub v: String,
}

impl ItemAad {
    pub fn for_item(uuid: &str) -> Self {
        Self {
            u: uuid.to_string(),
            v: crate::wire::V004.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, EncodingError> {
        let json = serde_json::to_vec(self).map_err(|_| EncodingError)?;
        Ok(b64_encode(&json))
    }

    pub fn decode(encoded: &str) -> Result<Self, DecryptError> {
        let json = b64_decode(encoded)?;
        serde_json::from_slice(&json).map_err(|_| DecryptError)
    }

    pub fn as_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(self).map_err(|_| EncodingError)
    }
}
