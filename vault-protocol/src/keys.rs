//! Root key, key parameters, and the four-state key-mode machine.
//!
//! These are pure data types with no I/O; the stateful manager that wraps
//! them against a keychain and app storage lives in `vault-keystore`.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A password-derived root key. Lives in RAM only; never serialized whole.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    pub master_key: [u8; 32],
    /// Present for versions <= 003, which authenticate items with a detached
    /// HMAC rather than an AEAD tag.
    pub data_authentication_key: Option<[u8; 32]>,
    #[zeroize(skip)]
    pub version: String,
}

impl RootKey {
    pub fn new(master_key: [u8; 32], data_authentication_key: Option<[u8; 32]>, version: &str) -> Self {
        Self {
            master_key,
            data_authentication_key,
            version: version.to_string(),
        }
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey")
            .field("version", &self.version)
            .field("master_key", &"<redacted>")
            .finish()
    }
}

/// Portable descriptor needed to re-derive a key from a password.
/// Sent to the server for login key derivation and embedded in backup files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyParams {
    pub identifier: String,
    pub version: String,
    #[serde(with = "hex_salt")]
    pub salt: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pbkdf2_cost: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argon2_params: Option<Argon2Params>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

mod hex_salt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(salt: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(salt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// The four-state status of the device's key hierarchy (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyMode {
    /// No crypto state; storage in plaintext.
    None,
    /// Root key stored plaintext in the OS keychain; no wrapped form in app storage.
    RootKeyOnly,
    /// No account; the wrapping key IS the root key; storage is encrypted with it.
    WrapperOnly,
    /// Account root key lives in app storage wrapped by the passcode-derived
    /// wrapping key; the keychain is cleared.
    RootKeyPlusWrapper,
}

impl KeyMode {
    pub fn has_root_key(&self) -> bool {
        matches!(self, KeyMode::RootKeyOnly | KeyMode::RootKeyPlusWrapper)
    }

    pub fn has_wrapper(&self) -> bool {
        matches!(self, KeyMode::WrapperOnly | KeyMode::RootKeyPlusWrapper)
    }

    /// Whether `unwrap_root_key` may be called in this mode.
    pub fn supports_unwrap(&self) -> bool {
        matches!(self, KeyMode::WrapperOnly | KeyMode::RootKeyPlusWrapper)
    }

    /// Compute the resulting mode after adding/removing a passcode, given
    /// whether an account root key is currently present.
    pub fn transition(self, has_account: bool, wrapper_present: bool) -> KeyMode {
        match (has_account, wrapper_present) {
            (false, false) => KeyMode::None,
            (false, true) => KeyMode::WrapperOnly,
            (true, false) => KeyMode::RootKeyOnly,
            (true, true) => KeyMode::RootKeyPlusWrapper,
        }
    }
}
