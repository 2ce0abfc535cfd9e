//! Error types for the key manager and storage facade.

use std::fmt;

/// Crate-wide error surface.
#[derive(Debug)]
pub enum KeystoreError {
    /// A key-mode precondition was violated (e.g. unwrapping with no wrapper present).
    InvalidKeyMode { mode: &'static str, op: &'static str },
    /// `validate_wrapping_key`/`unwrap_root_key` failed to decrypt with the candidate key.
    WrappingKeyInvalid,
    /// The storage backend reported a read failure.
    StorageRead(String),
    /// The storage backend reported a write failure.
    StorageWrite(String),
    /// A storage/keychain read or write was attempted before the `Launched` stage.
    NotLaunched,
    /// The underlying protocol layer failed (encoding, decrypt, etc).
    Protocol(vault_protocol::VaultError),
}

impl fmt::Display for KeystoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKeyMode { mode, op } => {
                write!(f, "operation '{op}' is not valid in key mode {mode}")
            }
            Self::WrappingKeyInvalid => write!(f, "wrapping key does not decrypt the stored root key"),
            Self::StorageRead(msg) => write!(f, "storage read error: {msg}"),
            Self::StorageWrite(msg) => write!(f, "storage write error: {msg}"),
            Self::NotLaunched => write!(f, "storage accessed before the Launched lifecycle stage"),
            Self::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for KeystoreError {}

impl From<vault_protocol::VaultError> for KeystoreError {
    fn from(e: vault_protocol::VaultError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Per-operation wrapper errors (mirrors vault-protocol's small-struct convention)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct UnwrapError(pub KeystoreError);
impl fmt::Display for UnwrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for UnwrapError {}
impl From<KeystoreError> for UnwrapError {
    fn from(e: KeystoreError) -> Self {
        Self(e)
    }
}

#[derive(Debug)]
pub struct SetRootKeyError(pub KeystoreError);
impl fmt::Display for SetRootKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::error::Error for SetRootKeyError {}
impl From<KeystoreError> for SetRootKeyError {
    fn from(e: KeystoreError) -> Self {
        Self(e)
    }
}
