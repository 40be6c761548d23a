//! Encryption layer for plaidvault.
//!
//! Protects long-lived provider access tokens at rest using:
//! - Argon2id to derive the storage key from the configured secret
//! - ChaCha20-Poly1305 for authenticated encryption
//! - Key material that is zeroized on drop
//!
//! # Architecture
//!
//! The configured secret is never used as a cipher key directly. It is run
//! through Argon2id with a per-storage-root salt, producing a 256-bit
//! [`DerivedKey`]. Every record is then sealed with a fresh random nonce, so
//! identical plaintexts never produce identical ciphertexts.
//!
//! Sealed records are stored as text: [`EncryptedData::encode`] produces a
//! base64 string of `nonce || ciphertext || tag` that can be written to a
//! plain file and decoded again with [`EncryptedData::decode`].

mod cipher;
mod error;
mod key;

pub use cipher::{
    decrypt, decrypt_string, encrypt, encrypt_string, EncryptedData, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, MIN_SECRET_LEN,
    SALT_SIZE,
};
