//! Adversarial tests for credential encryption.
//!
//! Stored credentials are read back from plain files, so every form of
//! corruption (bit flips, truncation, wrong key, garbage text) must surface
//! as an error rather than as different plaintext.

use plaidvault_crypto::{
    decrypt, decrypt_string, derive_key, encrypt, encrypt_string, generate_random_key,
    CryptoError, EncryptedData, KdfParams, Salt, NONCE_SIZE, TAG_SIZE,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proptest::prelude::*;

const SECRET: &str = "correct-horse-battery-staple-0123456789";

// ── Wrong Key ──

#[test]
fn decrypt_with_wrong_key_returns_error() {
    let key_a = generate_random_key();
    let key_b = generate_random_key();

    let encrypted = encrypt(&key_a, b"access-production-aaaa-bbbb").unwrap();
    let err = decrypt(&key_b, &encrypted).unwrap_err();

    match err {
        CryptoError::Decryption(msg) => {
            assert!(msg.contains("wrong key") || msg.contains("tampered"), "got: {msg}");
        }
        other => panic!("expected CryptoError::Decryption, got: {other:?}"),
    }
}

#[test]
fn key_from_different_secret_cannot_decrypt() {
    let salt = Salt::random();
    let params = KdfParams::insecure_fast();
    let right = derive_key(SECRET, &salt, &params).unwrap();
    let wrong = derive_key("another-secret-that-is-long-enough-000", &salt, &params).unwrap();

    let sealed = encrypt_string(&right, "tok_abc").unwrap();
    assert!(decrypt_string(&wrong, &sealed).is_err());
}

// ── Tampering ──

#[test]
fn every_ciphertext_bit_flip_detected() {
    let key = generate_random_key();
    let encrypted = encrypt(&key, b"{\"access_token\":\"tok_abc\"}").unwrap();

    for i in 0..encrypted.ciphertext.len() {
        for bit in 0..8 {
            let mut tampered = encrypted.clone();
            tampered.ciphertext[i] ^= 1 << bit;
            assert!(
                decrypt(&key, &tampered).is_err(),
                "flip of bit {bit} in byte {i} should be detected"
            );
        }
    }
}

#[test]
fn every_nonce_bit_flip_detected() {
    let key = generate_random_key();
    let encrypted = encrypt(&key, b"nonce-bound data").unwrap();

    for i in 0..NONCE_SIZE {
        let mut tampered = encrypted.clone();
        tampered.nonce[i] ^= 0x01;
        assert!(decrypt(&key, &tampered).is_err(), "nonce byte {i}");
    }
}

#[test]
fn truncated_ciphertext_detected() {
    let key = generate_random_key();
    let mut encrypted = encrypt(&key, b"truncate me").unwrap();
    encrypted.ciphertext.pop();
    assert!(decrypt(&key, &encrypted).is_err());
}

#[test]
fn ciphertext_shorter_than_tag_rejected() {
    let key = generate_random_key();
    let data = EncryptedData {
        nonce: [0u8; NONCE_SIZE],
        ciphertext: vec![0u8; TAG_SIZE - 1],
    };
    assert!(matches!(decrypt(&key, &data), Err(CryptoError::Decryption(_))));
}

// ── Text Encoding ──

#[test]
fn flipped_bit_in_encoded_text_detected() {
    let key = generate_random_key();
    let text = encrypt_string(&key, "tok_abc").unwrap().encode();

    let mut raw = base64_decode(&text);
    let last = raw.len() - 1;
    raw[last] ^= 0x80;
    let tampered = base64_encode(&raw);

    let decoded = EncryptedData::decode(&tampered).unwrap();
    assert!(decrypt_string(&key, &decoded).is_err());
}

#[test]
fn truncated_text_rejected() {
    let key = generate_random_key();
    let text = encrypt_string(&key, "tok_abc").unwrap().encode();
    let raw = base64_decode(&text);
    let short = base64_encode(&raw[..NONCE_SIZE + 4]);

    assert!(matches!(
        EncryptedData::decode(&short),
        Err(CryptoError::Decryption(_))
    ));
}

#[test]
fn garbage_text_rejected() {
    assert!(matches!(
        EncryptedData::decode("not base64 at all!!"),
        Err(CryptoError::Encoding(_))
    ));
    assert!(EncryptedData::decode("").is_err());
}

#[test]
fn encrypted_data_serde_roundtrip() {
    let key = generate_random_key();
    let sealed = encrypt(&key, b"payload").unwrap();
    let json = serde_json::to_string(&sealed).unwrap();
    let back: EncryptedData = serde_json::from_str(&json).unwrap();
    assert_eq!(decrypt(&key, &back).unwrap(), b"payload");
}

fn base64_decode(text: &str) -> Vec<u8> {
    STANDARD.decode(text).unwrap()
}

fn base64_encode(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

// ── Properties ──

proptest! {
    #[test]
    fn encrypt_then_decrypt_is_identity(plaintext in proptest::collection::vec(any::<u8>(), 0..512)) {
        let key = generate_random_key();
        let sealed = encrypt(&key, &plaintext).unwrap();
        let text = sealed.encode();
        let reopened = EncryptedData::decode(&text).unwrap();
        prop_assert_eq!(decrypt(&key, &reopened).unwrap(), plaintext);
    }

    #[test]
    fn any_single_bit_flip_fails(
        plaintext in proptest::collection::vec(any::<u8>(), 1..128),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = generate_random_key();
        let mut sealed = encrypt(&key, &plaintext).unwrap();
        let i = position.index(sealed.ciphertext.len());
        sealed.ciphertext[i] ^= 1 << bit;
        prop_assert!(decrypt(&key, &sealed).is_err());
    }
}
