//! Vault engine for VaultKeeper.
//!
//! This module provides:
//! - The entity model with its plaintext and stored views
//! - Session handling: unlock, lock, idle timeout and throttling
//! - Sealing and revealing of sensitive fields through a per-session key cache
//! - The persistence collaborator interface and an in-memory store
//! - TOTP codes from a revealed credential seed
//!
//! # Architecture
//! The vault module sits between the user interface and persistence. It
//! performs all encryption and decryption itself; persistence only ever
//! sees stored views.

pub mod config;
pub mod memory;
pub mod model;
pub mod probe;
pub mod session;
pub mod store;
pub mod throttle;
pub mod totp;

pub use config::SessionConfig;
pub use memory::MemoryStore;
pub use model::{
    CreditCard, Credential, EntityKind, FieldValue, Folder, Item, PlainCreditCard,
    PlainCredential, PlainItem, PlainSecureNote, Record, SealedField, SecureNote,
    StoredCreditCard, StoredCredential, StoredItem, StoredSecureNote, VaultType,
};
pub use probe::{create_canary, UnlockProbe, CANARY_PLAINTEXT};
pub use session::{Rekeyed, SessionHandle, SessionState, VaultSession};
pub use store::EntityStore;
pub use throttle::UnlockThrottle;
pub use totp::{OtpAuthUri, Totp, TotpAlgorithm, TotpCode, TotpParams};
