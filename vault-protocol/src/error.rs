//! Error types for the protocol layer.
//!
//! Decryption failures are deliberately uniform: wrong key, wrong AAD, and
//! tampered ciphertext all collapse to the same [`DecryptError`] so callers
//! can never distinguish "bad key" from "bad data" (oracle discipline).

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptError;

impl fmt::Display for DecryptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decryption failed")
    }
}

impl std::error::Error for DecryptError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingError;

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encoding error")
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for DecryptError {
    fn from(_: EncodingError) -> Self {
        DecryptError
    }
}

/// Crate-wide error surface for the protocol service and operators.
#[derive(Debug)]
pub enum VaultError {
    /// No operator is registered for this version string.
    VersionUnsupported(String),
    /// The payload is encrypted with a version newer than this library understands.
    VersionNewerThanLibrary(String),
    /// The payload's version predates the minimum version this library will
    /// encrypt new content with (still decryptable).
    VersionOutdated(String),
    /// No key was available to satisfy a required-key intent.
    NoKeyAvailable,
    /// Decryption failed (tampered ciphertext, wrong key, or malformed input).
    Decrypt(DecryptError),
    /// Encoding/serialization failed.
    Encode(EncodingError),
    /// An intent was given a format it cannot satisfy (e.g. Sync without a key).
    InvalidIntent(&'static str),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::VersionUnsupported(v) => write!(f, "unsupported protocol version: {v}"),
            VaultError::VersionNewerThanLibrary(v) => {
                write!(f, "payload version {v} is newer than this library supports")
            }
            VaultError::VersionOutdated(v) => write!(f, "protocol version {v} is outdated"),
            VaultError::NoKeyAvailable => write!(f, "no encryption key available"),
            VaultError::Decrypt(e) => write!(f, "{e}"),
            VaultError::Encode(e) => write!(f, "{e}"),
            VaultError::InvalidIntent(msg) => write!(f, "invalid intent: {msg}"),
        }
    }
}

impl std::error::Error for VaultError {}

impl From<DecryptError> for VaultError {
    fn from(e: DecryptError) -> Self {
        VaultError::Decrypt(e)
    }
}

impl From<EncodingError> for VaultError {
    fn from(e: EncodingError) -> Self {
        VaultError::Encode(e)
    }
}
