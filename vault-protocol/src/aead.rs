//! Symmetric primitives used by the operators.
//!
//! 001-003 use AES-256-CBC with a detached HMAC-SHA256 authentication tag.
//! 004 uses XChaCha20-Poly1305, whose larger nonce makes per-encryption
//! random nonces safe without a counter.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::{aead::Aead, KeyInit, XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{DecryptError, EncodingError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// A zero IV, substituted when a legacy payload was persisted without one.
/// Decrypt-only: new encryption under 001/002 is refused by the operators.
pub const LEGACY_ZERO_IV: [u8; 16] = [0u8; 16];

pub fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

pub fn aes_cbc_decrypt(
    key: &[u8; 32],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DecryptError)
}

pub fn hmac_sha256(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Constant-time comparison; use for all authentication tag checks.
pub fn verify_hmac_sha256(key: &[u8; 32], data: &[u8], expected: &[u8; 32]) -> bool {
    use subtle::ConstantTimeEq;
    hmac_sha256(key, data).ct_eq(expected).into()
}

pub fn xchacha20poly1305_seal(
    key: &[u8; 32],
    nonce: &[u8; 24],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncodingError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            chacha20poly1305::aead::Payload { msg: plaintext, aad },
        )
        .map_err(|_| EncodingError)
}

pub fn xchacha20poly1305_open(
    key: &[u8; 32],
    nonce: &[u8; 24],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            chacha20poly1305::aead::Payload { msg: ciphertext, aad },
        )
        .map_err(|_| DecryptError)
}

pub fn random_nonce_24() -> Result<[u8; 24], EncodingError> {
    let mut n = [0u8; 24];
    getrandom::getrandom(&mut n).map_err(|_| EncodingError)?;
    Ok(n)
}

pub fn random_iv_16() -> Result<[u8; 16], EncodingError> {
    let mut iv = [0u8; 16];
    getrandom::getrandom(&mut iv).map_err(|_| EncodingError)?;
    Ok(iv)
}

pub fn random_key_32() -> Result<[u8; 32], EncodingError> {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).map_err(|_| EncodingError)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_cbc_round_trips() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let ct = aes_cbc_encrypt(&key, &iv, b"hello world");
        let pt = aes_cbc_decrypt(&key, &iv, &ct).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn xchacha_round_trips_and_rejects_tamper() {
        let key = [1u8; 32];
        let nonce = [2u8; 24];
        let aad = b"aad";
        let ct = xchacha20poly1305_seal(&key, &nonce, b"secret", aad).unwrap();
        let pt = xchacha20poly1305_open(&key, &nonce, &ct, aad).unwrap();
        assert_eq!(pt, b"secret");

        let mut tampered = ct.clone();
        tampered[0] ^= 0xFF;
        assert!(xchacha20poly1305_open(&key, &nonce, &tampered, aad).is_err());
    }
}
