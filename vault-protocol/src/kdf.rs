//! Key derivation for the legacy (001-003) and modern (004) protocol families.
//!
//! 001/002/003 all derive 768 bits of PBKDF2 output and split it into three
//! 32-byte parts `(pw, mk, ak)`: `pw` is sent to the server as the login
//! password hash and is not used for local crypto, `mk` becomes the root
//! key's master key, `ak` becomes its data authentication key. This mirrors
//! the split used by the legacy key derivation this protocol family is
//! interoperable with.

use argon2::{Algorithm, Argon2, Params, Version};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::Sha256;

use crate::error::EncodingError;

pub const MIN_PBKDF2_COST_001: u32 = 3_000;
pub const MIN_PBKDF2_COST_002: u32 = 3_000;
pub const MIN_PBKDF2_COST_003: u32 = 110_000;

/// Three 32-byte parts derived from PBKDF2(password, salt, cost) over 96 bytes.
pub struct LegacyKeySplit {
    pub password_verification_hash: [u8; 32],
    pub master_key: [u8; 32],
    pub data_authentication_key: [u8; 32],
}

pub fn derive_legacy_split_sha1(
    password: &str,
    salt: &[u8],
    cost: u32,
) -> Result<LegacyKeySplit, EncodingError> {
    let mut out = [0u8; 96];
    pbkdf2::<Hmac<Sha1>>(password.as_bytes(), salt, cost, &mut out);
    Ok(split_96(out))
}

pub fn derive_legacy_split_sha256(
    password: &str,
    salt: &[u8],
    cost: u32,
) -> Result<LegacyKeySplit, EncodingError> {
    let mut out = [0u8; 96];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, cost, &mut out);
    Ok(split_96(out))
}

fn split_96(out: [u8; 96]) -> LegacyKeySplit {
    let mut password_verification_hash = [0u8; 32];
    let mut master_key = [0u8; 32];
    let mut data_authentication_key = [0u8; 32];
    password_verification_hash.copy_from_slice(&out[0..32]);
    master_key.copy_from_slice(&out[32..64]);
    data_authentication_key.copy_from_slice(&out[64..96]);

    LegacyKeySplit {
        password_verification_hash,
        master_key,
        data_authentication_key,
    }
}

/// Default Argon2id cost for version 004 root key derivation.
/// (memory KiB, iterations, parallelism)
pub const ARGON2ID_DEFAULT_PARAMS: (u32, u32, u32) = (65536, 3, 4);

pub fn derive_root_key_004(
    password: &str,
    salt: &[u8],
    params: (u32, u32, u32),
) -> Result<[u8; 32], EncodingError> {
    let (memory_kib, iterations, parallelism) = params;
    let argon_params = Params::new(memory_kib, iterations, parallelism, Some(32))
        .map_err(|_| EncodingError)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut out = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out)
        .map_err(|_| EncodingError)?;
    Ok(out)
}
