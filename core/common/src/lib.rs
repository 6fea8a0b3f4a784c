//! Common utilities and types shared across VaultKeeper modules.
//!
//! This module provides the shared error type, opaque identifiers and the
//! zeroizing wrappers used for plaintext held in memory.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EntityId, SecretText, SensitiveBytes};
