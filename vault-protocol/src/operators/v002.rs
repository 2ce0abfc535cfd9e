//! Version 002: PBKDF2-SHA1, colon-delimited self-authenticated frame.
//!
//! Expired as of 2020-01-01: still decryptable, refused for new encryption.

use chrono::NaiveDate;

use crate::aead::{aes_cbc_decrypt, hmac_sha256, LEGACY_ZERO_IV};
use crate::error::VaultError;
use crate::kdf::{derive_legacy_split_sha1, MIN_PBKDF2_COST_002};
use crate::keys::{KeyParams, RootKey};
use crate::wire::{b64_decode, LegacyColonFrame, V002};

use super::{ProtocolOperator, SymmetricKey};

pub struct OperatorV002;

impl OperatorV002 {
    pub fn expiry_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date")
    }
}

impl ProtocolOperator for OperatorV002 {
    fn version(&self) -> &'static str {
        V002
    }

    fn encryption_expired(&self) -> bool {
        true
    }

    fn create_root_key(&self, identifier: &str, password: &str) -> Result<(RootKey, KeyParams), VaultError> {
        let _ = (identifier, password);
        Err(VaultError::VersionOutdated(V002.to_string()))
    }

    fn derive_root_key(
        &self,
        _identifier: &str,
        password: &str,
        params: &KeyParams,
    ) -> Result<RootKey, VaultError> {
        let cost = params.pbkdf2_cost.unwrap_or(MIN_PBKDF2_COST_002).max(MIN_PBKDF2_COST_002);
        let split = derive_legacy_split_sha1(password, &params.salt, cost)?;
        Ok(RootKey::new(split.master_key, Some(split.data_authentication_key), V002))
    }

    fn encrypt_string(&self, _plaintext: &[u8], _key: &SymmetricKey, _uuid: &str) -> Result<String, VaultError> {
        Err(VaultError::VersionOutdated(V002.to_string()))
    }

    fn decrypt_string(&self, ciphertext: &str, key: &SymmetricKey, uuid: &str) -> Result<Vec<u8>, VaultError> {
        let frame = LegacyColonFrame::decode(ciphertext)?;
        if frame.version != V002 {
            return Err(VaultError::VersionUnsupported(frame.version));
        }
        // The embedded uuid must match the outer payload's uuid; a mismatch
        // is treated as tamper, not a distinct error (oracle discipline).
        if frame.uuid != uuid {
            return Err(VaultError::Decrypt(crate::error::DecryptError));
        }

        let auth_key = key.auth_key.ok_or(crate::error::DecryptError)?;
        let to_auth = format!("{}:{}:{}:{}", frame.version, frame.uuid, frame.iv, frame.ciphertext);
        let expected = b64_decode(&frame.auth_hash)?;
        if expected.len() != 32 {
            return Err(VaultError::Decrypt(crate::error::DecryptError));
        }
        let mut expected_arr = [0u8; 32];
        expected_arr.copy_from_slice(&expected);
        use subtle::ConstantTimeEq;
        let matches: bool = hmac_sha256(&auth_key, to_auth.as_bytes()).ct_eq(&expected_arr).into();
        if !matches {
            return Err(VaultError::Decrypt(crate::error::DecryptError));
        }

        let iv = if frame.iv.is_empty() {
            LEGACY_ZERO_IV
        } else {
            let raw = b64_decode(&frame.iv)?;
            raw.try_into().map_err(|_| crate::error::DecryptError)?
        };

        let raw_ct = b64_decode(&frame.ciphertext)?;
        Ok(aes_cbc_decrypt(&key.enc_key, &iv, &raw_ct)?)
    }
}
