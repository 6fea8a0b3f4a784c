//! Master passphrase verifier and policy.
//!
//! The verifier is an Argon2id hash in PHC string format. It lets a vault
//! check the master passphrase without opening any envelope.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use tracing::debug;

use crate::keys::Passphrase;
use vaultkeeper_common::{Error, Result};

/// Memory cost in KiB (64 MiB).
pub const MEMORY_COST: u32 = 65536;

/// Number of iterations.
pub const TIME_COST: u32 = 3;

/// Degree of parallelism.
pub const PARALLELISM: u32 = 4;

/// Hash output length in bytes.
pub const HASH_LENGTH: usize = 32;

/// Minimum length of a new master passphrase, in characters.
pub const MIN_PASSPHRASE_CHARS: usize = 8;

fn hasher() -> Result<Argon2<'static>> {
    let params = Params::new(MEMORY_COST, TIME_COST, PARALLELISM, Some(HASH_LENGTH))
        .map_err(|e| Error::Crypto(format!("Invalid verifier parameters: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a master passphrase into a PHC string.
///
/// # Errors
/// - `Validation` if the passphrase is empty
pub fn hash_passphrase(passphrase: &Passphrase) -> Result<String> {
    if passphrase.is_empty() {
        return Err(Error::Validation("Passphrase cannot be empty".to_string()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Crypto(format!("Verifier hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Check a passphrase against a PHC verifier.
///
/// # Errors
/// - `Validation` if the passphrase is empty
/// - `MalformedEnvelope` if the verifier string does not parse
/// - `AuthenticationFailure` if the passphrase does not match
pub fn verify_passphrase(verifier: &str, passphrase: &Passphrase) -> Result<()> {
    if passphrase.is_empty() {
        return Err(Error::Validation("Passphrase cannot be empty".to_string()));
    }

    let parsed = PasswordHash::new(verifier)
        .map_err(|_| Error::MalformedEnvelope("invalid verifier format".to_string()))?;

    hasher()?
        .verify_password(passphrase.as_bytes(), &parsed)
        .map_err(|_| Error::AuthenticationFailure)
}

/// Whether a verifier was produced with weaker or different parameters
/// than the current ones and should be recomputed after a successful check.
pub fn needs_rehash(verifier: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(verifier) else {
        return true;
    };
    if parsed.algorithm != Algorithm::Argon2id.ident() {
        return true;
    }
    match Params::try_from(&parsed) {
        Ok(params) => {
            let stale = params.m_cost() != MEMORY_COST
                || params.t_cost() != TIME_COST
                || params.p_cost() != PARALLELISM;
            if stale {
                debug!("Verifier parameters are out of date");
            }
            stale
        }
        Err(_) => true,
    }
}

/// Check a new master passphrase against the strength policy.
///
/// At least MIN_PASSPHRASE_CHARS characters with an uppercase letter, a
/// lowercase letter and a digit.
pub fn validate_new_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.chars().count() < MIN_PASSPHRASE_CHARS {
        return Err(Error::Validation(format!(
            "Passphrase must be at least {} characters long",
            MIN_PASSPHRASE_CHARS
        )));
    }

    let has_upper = passphrase.chars().any(char::is_uppercase);
    let has_lower = passphrase.chars().any(char::is_lowercase);
    let has_digit = passphrase.chars().any(|c| c.is_ascii_digit());

    if !(has_upper && has_lower && has_digit) {
        return Err(Error::Validation(
            "Passphrase must contain an uppercase letter, a lowercase letter and a digit"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let passphrase = Passphrase::new("Correct-Horse-1");
        let verifier = hash_passphrase(&passphrase).unwrap();

        assert!(verifier.starts_with("$argon2id$"));
        assert!(verify_passphrase(&verifier, &passphrase).is_ok());
        assert!(!needs_rehash(&verifier));
    }

    #[test]
    fn test_wrong_passphrase_is_authentication_failure() {
        let verifier = hash_passphrase(&Passphrase::new("Correct-Horse-1")).unwrap();

        let err = verify_passphrase(&verifier, &Passphrase::new("wrong")).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_malformed_verifier() {
        let err = verify_passphrase("not-a-phc-string", &Passphrase::new("pw")).unwrap_err();
        assert!(matches!(err, Error::MalformedEnvelope(_)));
        assert!(needs_rehash("not-a-phc-string"));
    }

    #[test]
    fn test_weaker_parameters_need_rehash() {
        let weak = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            Params::new(8192, 1, 1, Some(HASH_LENGTH)).unwrap(),
        );
        let salt = SaltString::generate(&mut OsRng);
        let verifier = weak.hash_password(b"Passw0rdX", &salt).unwrap().to_string();

        assert!(needs_rehash(&verifier));
        // Verification follows the parameters embedded in the hash.
        assert!(verify_passphrase(&verifier, &Passphrase::new("Passw0rdX")).is_ok());
    }

    #[test]
    fn test_passphrase_policy() {
        assert!(validate_new_passphrase("Abcdefg1").is_ok());
        assert!(validate_new_passphrase("Abc1").is_err());
        assert!(validate_new_passphrase("abcdefg1").is_err());
        assert!(validate_new_passphrase("ABCDEFG1").is_err());
        assert!(validate_new_passphrase("Abcdefgh").is_err());
    }
}
