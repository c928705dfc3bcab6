//! Legacy symmetric decryption of agent output (AES-256-CBC, PKCS#7)
//!
//! Older agents encrypt their output with a pre-shared secret:
//! - `00` / `02`: unsalted OpenSSL-style key derivation over MD5 / SHA-256
//! - `03`: `Salted__` + 8 byte salt, PBKDF2-HMAC-SHA256 with 10 000 rounds
//!
//! The unsalted variants are weak and only kept for old agents.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::TransportProtocol;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const PBKDF2_ITERATIONS: u32 = 10_000;
const SALT_MARKER: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("no decryption defined for transport protocol {0:?}")]
    Unsupported(TransportProtocol),
    #[error("salted payload too short ({0} bytes)")]
    MissingSalt(usize),
    #[error("payload does not start with the Salted__ marker")]
    BadSaltMarker,
    #[error("ciphertext length {0} is not a positive multiple of the block size")]
    BlockLength(usize),
    #[error("invalid padding, wrong secret?")]
    Padding,
}

/// Decrypts `ciphertext` according to the legacy scheme named by `protocol`.
pub fn decrypt_by_agent_protocol(
    passphrase: &str,
    protocol: TransportProtocol,
    ciphertext: &[u8],
) -> Result<Vec<u8>, DecryptError> {
    match protocol {
        TransportProtocol::Pbkdf2 => {
            if ciphertext.len() < SALT_MARKER.len() + SALT_LEN {
                return Err(DecryptError::MissingSalt(ciphertext.len()));
            }
            let (marker, rest) = ciphertext.split_at(SALT_MARKER.len());
            if marker != SALT_MARKER {
                return Err(DecryptError::BadSaltMarker);
            }
            let (salt, encrypted) = rest.split_at(SALT_LEN);
            let (key, iv) = derive_key_pbkdf2(passphrase, salt);
            aes256_cbc_decrypt(&key, &iv, encrypted)
        }
        TransportProtocol::Sha256 => {
            let (key, iv) = derive_key_legacy::<Sha256>(passphrase);
            aes256_cbc_decrypt(&key, &iv, ciphertext)
        }
        TransportProtocol::Md5 => {
            let (key, iv) = derive_key_legacy::<Md5>(passphrase);
            aes256_cbc_decrypt(&key, &iv, ciphertext)
        }
        other => Err(DecryptError::Unsupported(other)),
    }
}

fn derive_key_pbkdf2(passphrase: &str, salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut material = [0u8; KEY_LEN + IV_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut material);
    split_key_iv(&material)
}

// d_i = H(d_{i-1} || passphrase), concatenated until key and iv are covered
fn derive_key_legacy<D: Digest>(passphrase: &str) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN + 64);
    let mut block: Vec<u8> = Vec::new();
    while material.len() < KEY_LEN + IV_LEN {
        let mut hasher = D::new();
        hasher.update(&block);
        hasher.update(passphrase.as_bytes());
        block = hasher.finalize().to_vec();
        material.extend_from_slice(&block);
    }
    split_key_iv(&material)
}

fn split_key_iv(material: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

fn aes256_cbc_decrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], data: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if data.is_empty() || data.len() % BLOCK_LEN != 0 {
        return Err(DecryptError::BlockLength(data.len()));
    }
    let mut buffer = data.to_vec();
    let plain = Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|_| DecryptError::Padding)?;
    Ok(plain.to_vec())
}
