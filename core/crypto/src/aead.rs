//! Authenticated encryption using AES-256-GCM.
//!
//! AES-256-GCM provides both confidentiality and authenticity with a
//! 12-byte nonce. Every envelope uses a freshly derived key and a random
//! nonce, so nonce reuse under one key does not arise.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};

use crate::keys::DerivedKey;
use vaultkeeper_common::{Error, Result, SensitiveBytes};

/// Nonce size for AES-256-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a random nonce from the operating system RNG.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt plaintext with an explicit nonce and no associated data.
///
/// # Postconditions
/// - Returns ciphertext || tag, `plaintext.len() + TAG_SIZE` bytes
///
/// # Security
/// - Caller is responsible for never reusing a nonce under the same key
pub fn encrypt(key: &DerivedKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::Crypto("Encryption failed".to_string()))
}

/// Decrypt ciphertext || tag with an explicit nonce.
///
/// # Errors
/// - `AuthenticationFailure` if the tag does not verify, including input
///   too short to hold a tag
pub fn decrypt(
    key: &DerivedKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<SensitiveBytes> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::AuthenticationFailure);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(SensitiveBytes::new)
        .map_err(|_| Error::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        let nonce = generate_nonce();
        let plaintext = b"Hello, World!";

        let ciphertext = encrypt(&key, &nonce, plaintext).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();

        assert_eq!(decrypted.as_bytes(), plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Test message";

        let ciphertext = encrypt(&key, &generate_nonce(), plaintext).unwrap();

        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = DerivedKey::from_bytes([1u8; KEY_LENGTH]);
        let key2 = DerivedKey::from_bytes([2u8; KEY_LENGTH]);
        let nonce = generate_nonce();

        let ciphertext = encrypt(&key1, &nonce, b"Secret data").unwrap();
        let err = decrypt(&key2, &nonce, &ciphertext).unwrap_err();

        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        let nonce = generate_nonce();

        let mut ciphertext = encrypt(&key, &nonce, b"Important data").unwrap();
        ciphertext[5] ^= 0xFF;

        assert!(decrypt(&key, &nonce, &ciphertext)
            .unwrap_err()
            .is_authentication_failure());
    }

    #[test]
    fn test_truncated_tag_fails_as_authentication() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        let nonce = generate_nonce();

        let err = decrypt(&key, &nonce, &[0u8; TAG_SIZE - 1]).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = DerivedKey::from_bytes([42u8; KEY_LENGTH]);
        let nonce = generate_nonce();

        let ciphertext = encrypt(&key, &nonce, b"").unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert!(decrypt(&key, &nonce, &ciphertext).unwrap().is_empty());
    }

    #[test]
    fn test_nist_gcm_zero_vector() {
        // AES-256-GCM with all-zero key and nonce over an empty message
        // (McGrew & Viega test case 13): the output is the bare tag.
        let key = DerivedKey::from_bytes([0u8; KEY_LENGTH]);
        let nonce = [0u8; NONCE_SIZE];

        let tag = encrypt(&key, &nonce, b"").unwrap();
        let expected: [u8; TAG_SIZE] = [
            0x53, 0x0f, 0x8a, 0xfb, 0xc7, 0x45, 0x36, 0xb9, 0xa9, 0x63, 0xb4, 0xf1, 0xc4, 0xcb,
            0x73, 0x8b,
        ];
        assert_eq!(tag, expected);
    }
}
