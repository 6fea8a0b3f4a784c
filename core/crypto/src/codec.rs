//! Binary layout and text encoding of envelopes.
//!
//! Layout: `[16-byte salt][12-byte nonce][ciphertext || 16-byte tag]`,
//! stored as standard base64 with padding. Decoding is strict: no
//! whitespace, no missing padding, nothing outside the alphabet.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::keys::{Salt, SALT_LENGTH};
use vaultkeeper_common::{Error, Result};

/// Size of the fixed salt + nonce prefix.
pub const HEADER_SIZE: usize = SALT_LENGTH + NONCE_SIZE;

/// Smallest envelope a seal can produce: header plus the tag of an empty plaintext.
pub const MIN_SEALED_SIZE: usize = HEADER_SIZE + TAG_SIZE;

/// Encode raw envelope bytes as text.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode envelope text to bytes.
///
/// # Errors
/// - `MalformedEnvelope` on characters outside the alphabet or bad padding
/// - `MalformedEnvelope` if fewer than HEADER_SIZE bytes decode
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(text)
        .map_err(|_| Error::MalformedEnvelope("invalid base64 encoding".to_string()))?;
    check_length(&bytes)?;
    Ok(bytes)
}

fn check_length(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::MalformedEnvelope(format!(
            "envelope is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_SIZE
        )));
    }
    Ok(())
}

/// Parsed envelope: everything needed to re-derive the key and decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    salt: Salt,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope from its parts.
    pub fn new(salt: Salt, nonce: [u8; NONCE_SIZE], ciphertext: Vec<u8>) -> Self {
        Self {
            salt,
            nonce,
            ciphertext,
        }
    }

    /// Salt the key was derived with.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Nonce used for this encryption.
    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    /// Ciphertext followed by the authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to the canonical binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(self.salt.as_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse the canonical binary layout.
    ///
    /// Anything after the header is taken as ciphertext || tag; a tail
    /// too short for a tag is left for decryption to reject.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_length(bytes)?;

        let (salt, rest) = bytes.split_at(SALT_LENGTH);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| Error::MalformedEnvelope("invalid nonce".to_string()))?;

        Ok(Self {
            salt: Salt::from_slice(salt)?,
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Encode as storage text.
    pub fn to_text(&self) -> String {
        encode(&self.to_bytes())
    }

    /// Parse storage text.
    pub fn from_text(text: &str) -> Result<Self> {
        Self::from_bytes(&decode(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Envelope {
        Envelope::new(Salt::from_bytes([1u8; 16]), [2u8; 12], vec![3u8; 21])
    }

    #[test]
    fn test_layout_order() {
        let bytes = sample().to_bytes();

        assert_eq!(bytes.len(), HEADER_SIZE + 21);
        assert_eq!(&bytes[..16], &[1u8; 16]);
        assert_eq!(&bytes[16..28], &[2u8; 12]);
        assert_eq!(&bytes[28..], &[3u8; 21]);
    }

    #[test]
    fn test_text_roundtrip() {
        let envelope = sample();
        let restored = Envelope::from_text(&envelope.to_text()).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_decode_too_short() {
        let text = encode(&[0u8; HEADER_SIZE - 1]);
        let err = decode(&text).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
    }

    #[test]
    fn test_decode_header_only_is_accepted() {
        assert_eq!(decode(&encode(&[0u8; HEADER_SIZE])).unwrap().len(), HEADER_SIZE);
    }

    #[test]
    fn test_decode_rejects_invalid_characters() {
        let mut text = sample().to_text();
        text.replace_range(0..1, "*");
        assert!(matches!(decode(&text), Err(Error::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_rejects_whitespace_and_missing_padding() {
        let text = sample().to_text();
        assert!(text.ends_with('='));

        assert!(decode(&format!(" {}", text)).is_err());
        assert!(decode(&format!("{}\n", text)).is_err());
        assert!(decode(text.trim_end_matches('=')).is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            bytes in proptest::collection::vec(any::<u8>(), HEADER_SIZE..256)
        ) {
            let text = encode(&bytes);
            prop_assert_eq!(decode(&text).unwrap(), bytes.clone());
            prop_assert_eq!(encode(&decode(&text).unwrap()), text);
        }
    }
}
