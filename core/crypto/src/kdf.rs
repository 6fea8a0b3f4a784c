//! Key derivation using scrypt.
//!
//! scrypt is memory-hard: every derivation fills `128 * N * r` bytes of
//! working memory, which is what makes offline guessing expensive. The cost
//! parameters are a fixed, versioned constant of the system and are never
//! stored alongside an envelope.

use tracing::trace;

use crate::keys::{DerivedKey, Passphrase, Salt, KEY_LENGTH};
use vaultkeeper_common::{Error, Result};

/// scrypt cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// log2 of the CPU/memory cost N.
    pub log_n: u8,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
}

impl KdfParams {
    /// First parameter set: N = 2^14, r = 8, p = 1 (16 MiB per derivation).
    pub const V1: Self = Self {
        log_n: 14,
        r: 8,
        p: 1,
    };

    /// Parameter set used for every seal and open.
    ///
    /// Changing this is a data migration: existing envelopes only open
    /// under the set they were sealed with.
    pub const CURRENT: Self = Self::V1;

    /// Working memory one derivation needs, in bytes.
    pub fn memory_bytes(&self) -> usize {
        128 * (1usize << self.log_n) * self.r as usize
    }
}

/// Derive a key from a passphrase and salt with the current parameters.
///
/// # Errors
/// - `Validation` if the passphrase is empty; no derivation is attempted
pub fn derive_key(passphrase: &Passphrase, salt: &Salt) -> Result<DerivedKey> {
    derive_key_with(passphrase, salt, &KdfParams::CURRENT)
}

/// Derive a key with explicit parameters.
///
/// The same (passphrase, salt, params) always yields the same key.
pub fn derive_key_with(
    passphrase: &Passphrase,
    salt: &Salt,
    params: &KdfParams,
) -> Result<DerivedKey> {
    if passphrase.is_empty() {
        return Err(Error::Validation("Passphrase cannot be empty".to_string()));
    }

    let mut key = DerivedKey::zeroed();
    scrypt_into(
        passphrase.as_bytes(),
        salt.as_bytes(),
        params,
        key.as_mut_bytes(),
    )?;

    trace!(log_n = params.log_n, r = params.r, p = params.p, "Key derived");
    Ok(key)
}

fn scrypt_into(password: &[u8], salt: &[u8], params: &KdfParams, out: &mut [u8]) -> Result<()> {
    let scrypt_params = scrypt::Params::new(params.log_n, params.r, params.p, KEY_LENGTH)
        .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;

    scrypt::scrypt(password, salt, &scrypt_params, out)
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))
}
