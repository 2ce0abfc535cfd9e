//! Error types for the item pipeline, items-key manager, and sync controller.

use std::fmt;

/// Crate-wide error surface (§7).
#[derive(Debug)]
pub enum SyncError {
    /// A mutator was asked to edit a payload whose content is still ciphertext.
    ContentNotDecrypted,
    /// A payload's content could not be (de)serialized into its item variant.
    MalformedContent,
    /// No items key is available to satisfy a key requirement.
    NoKeyAvailable,
    /// The underlying protocol layer failed.
    Protocol(vault_protocol::VaultError),
    /// The underlying key manager failed.
    Keystore(vault_keystore::KeystoreError),
    /// A sync was requested while the controller is locked (sign-in/register/password-change in progress).
    SyncLocked,
    /// The server reported an integrity mismatch; the controller entered out-of-sync mode.
    IntegrityMismatch,
    /// A network-level sync failure, retried on the next timer tick.
    Network(String),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentNotDecrypted => write!(f, "cannot mutate a payload whose content is still ciphertext"),
            Self::MalformedContent => write!(f, "item content did not match the expected variant shape"),
            Self::NoKeyAvailable => write!(f, "no items key available to satisfy this operation"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::Keystore(e) => write!(f, "{e}"),
            Self::SyncLocked => write!(f, "sync is locked (sign-in, register, or password change in progress)"),
            Self::IntegrityMismatch => write!(f, "server integrity hash disagreed with local state"),
            Self::Network(msg) => write!(f, "sync network error: {msg}"),
        }
    }
}

impl std::error::Error for SyncError {}

impl From<vault_protocol::VaultError> for SyncError {
    fn from(e: vault_protocol::VaultError) -> Self {
        Self::Protocol(e)
    }
}

impl From<vault_keystore::KeystoreError> for SyncError {
    fn from(e: vault_keystore::KeystoreError) -> Self {
        Self::Keystore(e)
    }
}

#[derive(Debug)]
pub struct MutateError(pub SyncError);
impl fmt::Display for MutateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for MutateError {}
impl From<SyncError> for MutateError {
    fn from(e: SyncError) -> Self {
        Self(e)
    }
}

#[derive(Debug)]
pub struct SyncRunError(pub SyncError);
impl fmt::Display for SyncRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for SyncRunError {}
impl From<SyncError> for SyncRunError {
    fn from(e: SyncError) -> Self {
        Self(e)
    }
}
