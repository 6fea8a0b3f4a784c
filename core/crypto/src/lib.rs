//! Envelope cryptography for VaultKeeper.
//!
//! This module provides:
//! - Key derivation using scrypt with fixed, versioned cost parameters
//! - Authenticated encryption using AES-256-GCM
//! - The envelope blob layout and its base64 text form
//! - A session-scoped derived-key cache
//! - An Argon2id master passphrase verifier
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption failures never distinguish a wrong passphrase from tampering

pub mod aead;
pub mod cache;
pub mod codec;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod verifier;

pub use cache::{KeyCache, PassphraseId};
pub use codec::{decode, encode, Envelope, HEADER_SIZE, MIN_SEALED_SIZE};
pub use envelope::{open, open_envelope, open_with_key, seal, seal_envelope, seal_with_key};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DerivedKey, Passphrase, Salt, KEY_LENGTH, SALT_LENGTH};
