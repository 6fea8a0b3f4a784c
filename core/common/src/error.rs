//! Common error types for VaultKeeper.
//!
//! No variant ever carries plaintext, passphrases, key material or blob
//! bytes. Messages are safe to log.

use thiserror::Error;

/// Top-level error type for VaultKeeper operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any cryptographic work was attempted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Tag verification failed.
    ///
    /// Deliberately does not say whether the passphrase was wrong or the
    /// envelope was modified.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Envelope is too short or not valid text encoding.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// A cryptographic primitive rejected its parameters.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The session holds no key material.
    #[error("Vault is locked")]
    Locked,

    /// Too many failed unlock attempts.
    #[error("Too many failed attempts, retry in {retry_after_secs} seconds")]
    LockedOut {
        /// Seconds until the next attempt is accepted.
        retry_after_secs: u64,
    },

    /// The session locked while the operation was pending.
    #[error("Operation cancelled: session locked")]
    Cancelled,

    /// Record not found in the persistence collaborator.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether retrying the same call could succeed.
    ///
    /// Nothing in the core is retried automatically: authentication and
    /// corruption errors are final, validation errors need new input.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether this error means "wrong passphrase or tampered data".
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Error::AuthenticationFailure)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
