//! Sealing and opening credential blobs
//!
//! Pure functions over explicit keys; the key lifecycle lives in `vault`.
//! The AES-256 key is the 16-byte passphrase zero-extended to 32 bytes,
//! which keeps blobs produced by earlier deployments readable.

use std::fmt;

use aes::Aes256;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngExt;
use sha3::Sha3_512;
use zeroize::Zeroize;

use crate::error::{Error, Result};

type HmacSha3_512 = Hmac<Sha3_512>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Passphrase length (the cipher's IV length)
pub const PASSPHRASE_LEN: usize = 16;

/// HMAC key length
pub const HMAC_KEY_LEN: usize = 64;

/// Integrity tag length (SHA3-512 output)
pub const TAG_LEN: usize = 64;

const IV_LEN: usize = 16;
const CIPHER_KEY_LEN: usize = 32;

/// Symmetric passphrase and HMAC key.
#[derive(Clone, PartialEq, Eq)]
pub struct VaultKeys {
    passphrase: [u8; PASSPHRASE_LEN],
    hmac_key: [u8; HMAC_KEY_LEN],
}

impl VaultKeys {
    pub fn new(passphrase: [u8; PASSPHRASE_LEN], hmac_key: [u8; HMAC_KEY_LEN]) -> Self {
        Self {
            passphrase,
            hmac_key,
        }
    }

    /// Fresh key material from the thread-local CSPRNG.
    pub fn generate() -> Self {
        let mut passphrase = [0u8; PASSPHRASE_LEN];
        let mut hmac_key = [0u8; HMAC_KEY_LEN];
        rand::rng().fill(&mut passphrase);
        rand::rng().fill(&mut hmac_key);
        Self::new(passphrase, hmac_key)
    }

    pub fn passphrase(&self) -> &[u8; PASSPHRASE_LEN] {
        &self.passphrase
    }

    pub fn hmac_key(&self) -> &[u8; HMAC_KEY_LEN] {
        &self.hmac_key
    }

    fn cipher_key(&self) -> [u8; CIPHER_KEY_LEN] {
        let mut key = [0u8; CIPHER_KEY_LEN];
        key[..PASSPHRASE_LEN].copy_from_slice(&self.passphrase);
        key
    }

    fn mac(&self) -> Result<HmacSha3_512> {
        HmacSha3_512::new_from_slice(&self.hmac_key).map_err(|e| Error::Cipher(e.to_string()))
    }
}

impl fmt::Debug for VaultKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultKeys([REDACTED])")
    }
}

impl Drop for VaultKeys {
    fn drop(&mut self) {
        self.passphrase.zeroize();
        self.hmac_key.zeroize();
    }
}

/// Encrypt `plaintext` under a fresh random IV and return the base64 blob.
pub fn seal(keys: &VaultKeys, plaintext: &str) -> Result<String> {
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill(&mut iv);

    let mut key = keys.cipher_key();
    let encryptor = Aes256CbcEnc::new_from_slices(&key, &iv);
    key.zeroize();
    let ciphertext = encryptor
        .map_err(|e| Error::Cipher(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut mac = keys.mac()?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut blob = Vec::with_capacity(TAG_LEN + IV_LEN + ciphertext.len());
    blob.extend_from_slice(&tag);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Verify and decrypt a blob produced by `seal`.
///
/// The tag is checked before the cipher ever sees the ciphertext. Any
/// failure (bad base64, short blob, tag mismatch, bad padding) is `None`.
pub fn open(keys: &VaultKeys, blob: &str) -> Option<Vec<u8>> {
    let raw = STANDARD.decode(blob.trim()).ok()?;
    if raw.len() < TAG_LEN + IV_LEN {
        return None;
    }
    let (tag, content) = raw.split_at(TAG_LEN);

    let mut mac = keys.mac().ok()?;
    mac.update(content);
    mac.verify_slice(tag).ok()?;

    let (iv, ciphertext) = content.split_at(IV_LEN);
    let mut key = keys.cipher_key();
    let decryptor = Aes256CbcDec::new_from_slices(&key, iv);
    key.zeroize();
    decryptor
        .ok()?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .ok()
}
