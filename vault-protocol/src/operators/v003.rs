//! Version 003: PBKDF2-SHA256 at modern cost, same colon framing as 002.
//!
//! The last version with no separate items key: every item's `enc_item_key`
//! is wrapped directly by the root key (see `LAST_NONROOT_ITEMS_KEY_VERSION`
//! in `crate::service`).

use crate::aead::{aes_cbc_decrypt, aes_cbc_encrypt, hmac_sha256, random_iv_16};
use crate::error::{DecryptError, VaultError};
use crate::kdf::{derive_legacy_split_sha256, MIN_PBKDF2_COST_003};
use crate::keys::{Argon2Params, KeyParams, RootKey};
use crate::wire::{b64_decode, b64_encode, LegacyColonFrame, V003};

use super::{ProtocolOperator, SymmetricKey};

pub struct OperatorV003;

impl ProtocolOperator for OperatorV003 {
    fn version(&self) -> &'static str {
        V003
    }

    fn encryption_expired(&self) -> bool {
        false
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> Result<(RootKey, KeyParams), VaultError> {
        let mut salt = [0u8; 16];
        getrandom::getrandom(&mut salt).map_err(|_| crate::error::EncodingError)?;
        let cost = MIN_PBKDF2_COST_003;
        let split = derive_legacy_split_sha256(password, &salt, cost)?;
        let root_key = RootKey::new(split.master_key, Some(split.data_authentication_key), V003);
        let params = KeyParams {
            identifier: identifier.to_string(),
            version: V003.to_string(),
            salt: salt.to_vec(),
            pbkdf2_cost: Some(cost),
            argon2_params: None::<Argon2Params>,
        };
        Ok((root_key, params))
    }

    fn derive_root_key(
        &self,
        _identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> Result<RootKey, VaultError> {
        let cost = params.pbkdf2_cost.unwrap_or(MIN_PBKDF2_COST_003).max(MIN_PBKDF2_COST_003);
        let split = derive_legacy_split_sha256(password, &params.salt, cost)?;
        Ok(RootKey::new(split.master_key, Some(split.data_authentication_key), V003))
    }

    fn encrypt_string(&self, plaintext: &[u8], key: &SymmetricKey, uuid: &str) -> Result<String, VaultError> {
        let auth_key = key.auth_key.ok_or(DecryptError)?;
        let iv = random_iv_16()?;
        let ciphertext = aes_cbc_encrypt(&key.enc_key, &iv, plaintext);
        let iv_b64 = b64_encode(&iv);
        let ct_b64 = b64_encode(&ciphertext);
        let to_auth = format!("{V003}:{uuid}:{iv_b64}:{ct_b64}");
        let auth_hash = b64_encode(&hmac_sha256(&auth_key, to_auth.as_bytes()));

        Ok(LegacyColonFrame {
            version: V003.to_string(),
            auth_hash,
            uuid: uuid.to_string(),
            iv: iv_b64,
            ciphertext: ct_b64,
        }
        .encode())
    }

    fn decrypt_string(&self, ciphertext: &str, key: &SymmetricKey, uuid: &str) -> Result<Vec<u8>, VaultError> {
        let frame = LegacyColonFrame::decode(ciphertext)?;
        if frame.version != V003 {
            return Err(VaultError::VersionUnsupported(frame.version));
        }
        if frame.uuid != uuid {
            return Err(DecryptError.into());
        }

        let auth_key = key.auth_key.ok_or(DecryptError)?;
        let to_auth = format!("{}:{}:{}:{}", frame.version, frame.uuid, frame.iv, frame.ciphertext);
        let expected = b64_decode(&frame.auth_hash)?;
        if expected.len() != 32 {
            return Err(DecryptError.into());
        }
        let mut expected_arr = [0u8; 32];
        expected_arr.copy_from_slice(&expected);
        use subtle::ConstantTimeEq;
        let matches: bool = hmac_sha256(&auth_key, to_auth.as_bytes()).ct_eq(&expected_arr).into();
        if !matches {
            return Err(DecryptError.into());
        }

        let iv_raw = b64_decode(&frame.iv)?;
        let iv: [u8; 16] = iv_raw.try_into().map_err(|_| DecryptError)?;
        let raw_ct = b64_decode(&frame.ciphertext)?;
        Ok(aes_cbc_decrypt(&key.enc_key, &iv, &raw_ct)?)
    }
}
