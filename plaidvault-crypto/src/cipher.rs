//! ChaCha20-Poly1305 authenticated encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// A sealed payload: random nonce plus ciphertext with the tag appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Encodes as base64 text (`nonce || ciphertext`) for storage in text files.
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.ciphertext);
        STANDARD.encode(raw)
    }

    /// Parses text produced by [`EncryptedData::encode`].
    ///
    /// Input shorter than a nonce plus a tag cannot be a valid record and is
    /// rejected as a decryption failure, so truncated files are never misread.
    pub fn decode(text: &str) -> CryptoResult<Self> {
        let raw = STANDARD
            .decode(text.trim())
            .map_err(|e| CryptoError::Encoding(format!("base64 decode: {e}")))?;

        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "sealed payload truncated ({} bytes)",
                raw.len()
            )));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

fn cipher_for(key: &DerivedKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher_for(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts and authenticates `data` under `key`.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption(
            "ciphertext shorter than authentication tag".to_string(),
        ));
    }

    cipher_for(key)
        .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<EncryptedData> {
    encrypt(key, plaintext.as_bytes())
}

pub fn decrypt_string(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<String> {
    let bytes = decrypt(key, data)?;
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::Decryption(format!("plaintext is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn roundtrip() {
        let key = generate_random_key();
        let sealed = encrypt(&key, b"access-sandbox-123").unwrap();
        assert_eq!(decrypt(&key, &sealed).unwrap(), b"access-sandbox-123");
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = generate_random_key();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn ciphertext_carries_tag() {
        let key = generate_random_key();
        let sealed = encrypt(&key, b"abc").unwrap();
        assert_eq!(sealed.ciphertext.len(), 3 + TAG_SIZE);
    }

    #[test]
    fn text_encoding_roundtrip() {
        let key = generate_random_key();
        let sealed = encrypt_string(&key, "tok_abc").unwrap();
        let text = sealed.encode();
        let decoded = EncryptedData::decode(&text).unwrap();
        assert_eq!(decoded, sealed);
        assert_eq!(decrypt_string(&key, &decoded).unwrap(), "tok_abc");
    }

    #[test]
    fn decode_tolerates_trailing_newline() {
        let key = generate_random_key();
        let text = format!("{}\n", encrypt(&key, b"x").unwrap().encode());
        assert!(EncryptedData::decode(&text).is_ok());
    }
}
