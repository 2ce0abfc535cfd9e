//! Version 004: Argon2id root-key derivation, XChaCha20-Poly1305 item AEAD.
//!
//! Every non-root-encrypted item requires an items key; the root key only
//! ever wraps items keys, never item content directly (see SPEC_FULL.md §4.1).

use crate::aad::ItemAad;
use crate::aead::{random_key_32, random_nonce_24, xchacha20poly1305_open, xchacha20poly1305_seal};
use crate::error::{DecryptError, VaultError};
use crate::kdf::{derive_root_key_004, ARGON2ID_DEFAULT_PARAMS};
use crate::keys::{Argon2Params, KeyParams, RootKey};
use crate::wire::{b64_decode, b64_encode, AeadFrame, V004};

use super::{ProtocolOperator, SymmetricKey};

pub struct OperatorV004;

impl ProtocolOperator for OperatorV004 {
    fn version(&self) -> &'static str {
        V004
    }

    fn encryption_expired(&self) -> bool {
        false
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> Result<(RootKey, KeyParams), VaultError> {
        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt).map_err(|_| crate::error::EncodingError)?;
        let (memory_kib, iterations, parallelism) = ARGON2ID_DEFAULT_PARAMS;
        let master_key = derive_root_key_004(password, &salt, (memory_kib, iterations, parallelism))?;
        let root_key = RootKey::new(master_key, None, V004);
        let params = KeyParams {
            identifier: identifier.to_string(),
            version: V004.to_string(),
            salt: salt.to_vec(),
            pbkdf2_cost: None,
            argon2_params: Some(Argon2Params {
                memory_kib,
                iterations,
                parallelism,
            }),
        };
        Ok((root_key, params))
    }

    fn derive_root_key(
        &self,
        _identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> Result<RootKey, VaultError> {
        let argon = params.argon2_params.unwrap_or(Argon2Params {
            memory_kib: ARGON2ID_DEFAULT_PARAMS.0,
            iterations: ARGON2ID_DEFAULT_PARAMS.1,
            parallelism: ARGON2ID_DEFAULT_PARAMS.2,
        });
        let master_key = derive_root_key_004(
            password,
            &params.salt,
            (argon.memory_kib, argon.iterations, argon.parallelism),
        )?;
        Ok(RootKey::new(master_key, None, V004))
    }

    fn encrypt_string(&self, plaintext: &[u8], key: &SymmetricKey, uuid: &str) -> Result<String, VaultError> {
        let nonce = random_nonce_24()?;
        let aad = ItemAad::for_item(uuid);
        let aad_bytes = aad.as_bytes()?;
        let ciphertext = xchacha20poly1305_seal(&key.enc_key, &nonce, plaintext, &aad_bytes)?;

        Ok(AeadFrame {
            nonce: b64_encode(&nonce),
            ciphertext: b64_encode(&ciphertext),
            aad: aad.encode()?,
        }
        .encode())
    }

    fn decrypt_string(&self, ciphertext: &str, key: &SymmetricKey, uuid: &str) -> Result<Vec<u8>, VaultError> {
        let frame = AeadFrame::decode(ciphertext)?;
        let aad = ItemAad::decode(&frame.aad)?;
        if aad.u != uuid {
            return Err(DecryptError.into());
        }

        let nonce_raw = b64_decode(&frame.nonce)?;
        let nonce: [u8; 24] = nonce_raw.try_into().map_err(|_| DecryptError)?;
        let ct = b64_decode(&frame.ciphertext)?;
        let aad_bytes = aad.as_bytes()?;

        Ok(xchacha20poly1305_open(&key.enc_key, &nonce, &ct, &aad_bytes)?)
    }
}

/// Generate a fresh random items key material (version 004 only).
pub fn generate_items_key_material() -> Result<[u8; 32], VaultError> {
    Ok(random_key_32()?)
}
