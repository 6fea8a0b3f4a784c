//! Envelope cipher: passphrase in, self-describing blob out.
//!
//! Every seal draws a fresh salt and nonce, so no key derivation state has
//! to be stored outside the blob, and sealing the same plaintext twice
//! never yields equal blobs.

use tracing::debug;

use crate::aead::{self, generate_nonce};
use crate::codec::Envelope;
use crate::kdf::derive_key;
use crate::keys::{DerivedKey, Passphrase, Salt};
use vaultkeeper_common::{Result, SensitiveBytes};

/// Seal plaintext under a passphrase and return storage text.
///
/// # Errors
/// - `Validation` if the passphrase is empty
pub fn seal(plaintext: &[u8], passphrase: &Passphrase) -> Result<String> {
    Ok(seal_envelope(plaintext, passphrase)?.to_text())
}

/// Open storage text with a passphrase.
///
/// # Errors
/// - `MalformedEnvelope` if the text does not decode or is too short
/// - `AuthenticationFailure` on a wrong passphrase or any tampering
pub fn open(blob: &str, passphrase: &Passphrase) -> Result<SensitiveBytes> {
    open_envelope(&Envelope::from_text(blob)?, passphrase)
}

/// Seal plaintext under a passphrase with a fresh salt and nonce.
pub fn seal_envelope(plaintext: &[u8], passphrase: &Passphrase) -> Result<Envelope> {
    let salt = Salt::generate();
    let key = derive_key(passphrase, &salt)?;
    seal_with_key(&key, salt, plaintext)
}

/// Open an envelope, deriving the key from its embedded salt.
pub fn open_envelope(envelope: &Envelope, passphrase: &Passphrase) -> Result<SensitiveBytes> {
    let key = derive_key(passphrase, envelope.salt())?;
    open_with_key(&key, envelope)
}

/// Seal with a key already derived for `salt`, drawing a fresh nonce.
///
/// `key` must have been derived from `salt`; the envelope records the
/// salt so that it can be re-derived on open.
pub fn seal_with_key(key: &DerivedKey, salt: Salt, plaintext: &[u8]) -> Result<Envelope> {
    let nonce = generate_nonce();
    let ciphertext = aead::encrypt(key, &nonce, plaintext)?;

    debug!(len = plaintext.len(), "Sealed envelope");
    Ok(Envelope::new(salt, nonce, ciphertext))
}

/// Open with a key already derived for the envelope's salt.
pub fn open_with_key(key: &DerivedKey, envelope: &Envelope) -> Result<SensitiveBytes> {
    aead::decrypt(key, envelope.nonce(), envelope.ciphertext())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, HEADER_SIZE, MIN_SEALED_SIZE};
    use proptest::prelude::*;
    use vaultkeeper_common::Error;

    const SALT_BITS: usize = crate::keys::SALT_LENGTH * 8;

    #[test]
    fn test_known_scenario() {
        let passphrase = Passphrase::new("S0m3P@ss!");
        let plaintext = "correct horse battery staple";

        let blob = seal(plaintext.as_bytes(), &passphrase).unwrap();
        assert!(decode(&blob).unwrap().len() >= HEADER_SIZE + 16);

        let opened = open(&blob, &passphrase).unwrap();
        assert_eq!(opened.as_bytes(), plaintext.as_bytes());

        let err = open(&blob, &Passphrase::new("wrong")).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_seal_is_not_deterministic() {
        let passphrase = Passphrase::new("same-passphrase");

        let a = seal_envelope(b"same plaintext", &passphrase).unwrap();
        let b = seal_envelope(b"same plaintext", &passphrase).unwrap();

        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.to_text(), b.to_text());
    }

    #[test]
    fn test_empty_plaintext_has_minimum_size() {
        let blob = seal(b"", &Passphrase::new("pw")).unwrap();
        assert_eq!(decode(&blob).unwrap().len(), MIN_SEALED_SIZE);
        assert!(open(&blob, &Passphrase::new("pw")).unwrap().is_empty());
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            seal(b"data", &Passphrase::new("")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_short_blob_is_malformed() {
        let err = open(&encode(&[0u8; 27]), &Passphrase::new("pw")).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));

        let err = open("not base64!", &Passphrase::new("pw")).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let passphrase = Passphrase::new("flip-test");
        let bytes = seal_envelope(b"tamper me", &passphrase).unwrap().to_bytes();

        // One derivation per flipped salt bit, so sample the salt and check
        // nonce/ciphertext/tag exhaustively with the correct key.
        for bit in [0, 7, 64, 127] {
            let mut tampered = bytes.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            let err = open(&encode(&tampered), &passphrase).unwrap_err();
            assert!(err.is_authentication_failure());
        }

        let original = Envelope::from_bytes(&bytes).unwrap();
        let key = derive_key(&passphrase, original.salt()).unwrap();
        for bit in SALT_BITS..bytes.len() * 8 {
            let mut tampered = bytes.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            let envelope = Envelope::from_bytes(&tampered).unwrap();
            let err = open_with_key(&key, &envelope).unwrap_err();
            assert!(err.is_authentication_failure(), "bit {} not detected", bit);
        }
    }

    #[test]
    fn test_truncated_blob_fails() {
        let passphrase = Passphrase::new("truncate");
        let bytes = seal_envelope(b"payload", &passphrase).unwrap().to_bytes();

        let err = open(&encode(&bytes[..bytes.len() - 1]), &passphrase).unwrap_err();
        assert!(err.is_authentication_failure());

        let err = open(&encode(&bytes[..HEADER_SIZE - 1]), &passphrase).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_open_inverts_seal(
            plaintext in proptest::collection::vec(any::<u8>(), 0..512),
            passphrase in "[ -~]{1,32}",
        ) {
            let passphrase = Passphrase::new(passphrase);
            let blob = seal(&plaintext, &passphrase).unwrap();

            prop_assert!(decode(&blob).unwrap().len() >= MIN_SEALED_SIZE);
            let opened = open(&blob, &passphrase).unwrap();
            prop_assert_eq!(opened.as_bytes(), &plaintext[..]);
        }

        #[test]
        fn prop_wrong_passphrase_rejected(
            pass1 in "[a-z]{1,16}",
            pass2 in "[A-Z]{1,16}",
        ) {
            let blob = seal(b"secret", &Passphrase::new(pass1)).unwrap();
            let err = open(&blob, &Passphrase::new(pass2)).unwrap_err();
            prop_assert!(err.is_authentication_failure());
        }
    }
}
