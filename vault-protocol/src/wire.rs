//! Ciphertext framing shared by the versioned operators.
//!
//! - 001/002/003 use a colon-delimited string: `version:auth_hash:uuid:iv:ciphertext`.
//! - 004 drops the separate auth hash (the AEAD tag authenticates the frame)
//!   and instead carries the associated data: `004:nonce:ciphertext:aad`.
//!
//! All fields except the version prefix are base64-standard encoded.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::DecryptError;

pub const V001: &str = "001";
pub const V002: &str = "002";
pub const V003: &str = "003";
pub const V004: &str = "004";

pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, DecryptError> {
    STANDARD.decode(s).map_err(|_| DecryptError)
}

/// Colon-delimited frame used by 002/003: `version:auth_hash:uuid:iv:ciphertext`.
pub struct LegacyColonFrame {
    pub version: String,
    pub auth_hash: String,
    pub uuid: String,
    pub iv: String,
    pub ciphertext: String,
}

impl LegacyColonFrame {
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.version, self.auth_hash, self.uuid, self.iv, self.ciphertext
        )
    }

    pub fn decode(frame: &str) -> Result<Self, DecryptError> {
        let mut parts = frame.splitn(5, ':');
        let version = parts.next().ok_or(DecryptError)?.to_string();
        let auth_hash = parts.next().ok_or(DecryptError)?.to_string();
        let uuid = parts.next().ok_or(DecryptError)?.to_string();
        let iv = parts.next().ok_or(DecryptError)?.to_string();
        let ciphertext = parts.next().ok_or(DecryptError)?.to_string();
        Ok(Self {
            version,
            auth_hash,
            uuid,
            iv,
            ciphertext,
        })
    }
}

/// Frame used by 004: `004:nonce:ciphertext:aad`, all base64 after the prefix.
pub struct AeadFrame {
    pub nonce: String,
    pub ciphertext: String,
    pub aad: String,
}

impl AeadFrame {
    pub fn encode(&self) -> String {
        format!("{}:{}:{}:{}", V004, self.nonce, self.ciphertext, self.aad)
    }

    pub fn decode(frame: &str) -> Result<Self, DecryptError> {
        let mut parts = frame.splitn(4, ':');
        let version = parts.next().ok_or(DecryptError)?;
        if version != V004 {
            return Err(DecryptError);
        }
        let nonce = parts.next().ok_or(DecryptError)?.to_string();
        let ciphertext = parts.next().ok_or(DecryptError)?.to_string();
        let aad = parts.next().ok_or(DecryptError)?.to_string();
        Ok(Self {
            nonce,
            ciphertext,
            aad,
        })
    }
}

/// Returns the version prefix of a ciphertext string without fully parsing it.
pub fn peek_version(frame: &str) -> Option<&str> {
    frame.get(0..3)
}
