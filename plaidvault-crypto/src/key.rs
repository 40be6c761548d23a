//! Key derivation and key material.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a derived symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a KDF salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Minimum accepted length of the configured encryption secret.
pub const MIN_SECRET_LEN: usize = 32;

/// A 256-bit symmetric key. Wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Builds a key from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Random salt bound to one storage root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism (lanes).
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024, // 19 MiB
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Smallest parameters Argon2 accepts. Only meant for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Derives a storage key from the configured secret.
///
/// The secret must be at least [`MIN_SECRET_LEN`] bytes. The same secret,
/// salt, and parameters always produce the same key.
pub fn derive_key(secret: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    if secret.len() < MIN_SECRET_LEN {
        return Err(CryptoError::SecretTooShort {
            min: MIN_SECRET_LEN,
            actual: secret.len(),
        });
    }

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(secret.as_bytes(), salt.as_bytes(), &mut bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = DerivedKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Generates a random key, bypassing derivation.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}
