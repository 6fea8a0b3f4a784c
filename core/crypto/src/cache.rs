//! Session-scoped cache of derived keys.
//!
//! Entries are keyed by (passphrase identity, salt), never by passphrase
//! alone, so a key is only reused for the exact salt it was derived from.
//! The passphrase identity is a BLAKE2b digest under a random per-cache
//! key; it is meaningless outside the cache that produced it.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashMap;
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::keys::{DerivedKey, Passphrase, Salt, KEY_LENGTH};

/// Cache-local fingerprint of a passphrase.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassphraseId([u8; 32]);

impl PassphraseId {
    /// Constant-time equality.
    pub fn ct_matches(&self, other: &PassphraseId) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for PassphraseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PassphraseId([REDACTED])")
    }
}

/// Derived-key cache owned by exactly one session.
///
/// Mutation is limited to insert after a successful open and clear on
/// lock. All keys are zeroized when cleared or dropped.
pub struct KeyCache {
    id_key: Zeroizing<[u8; KEY_LENGTH]>,
    entries: HashMap<(PassphraseId, Salt), DerivedKey>,
}

impl KeyCache {
    /// Create an empty cache with a fresh identity key.
    pub fn new() -> Self {
        let mut id_key = Zeroizing::new([0u8; KEY_LENGTH]);
        OsRng.fill_bytes(id_key.as_mut());
        Self {
            id_key,
            entries: HashMap::new(),
        }
    }

    /// Fingerprint a passphrase for use as a cache key.
    pub fn identify(&self, passphrase: &Passphrase) -> PassphraseId {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.id_key.as_ref());
        hasher.update(passphrase.as_bytes());
        hasher.update(b"passphrase-id");

        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        PassphraseId(id)
    }

    /// Look up the key for a salt under a passphrase identity.
    pub fn get(&self, id: &PassphraseId, salt: &Salt) -> Option<DerivedKey> {
        self.entries.get(&(*id, *salt)).cloned()
    }

    /// Remember a key that has just opened or sealed an envelope.
    pub fn insert(&mut self, id: PassphraseId, salt: Salt, key: DerivedKey) {
        self.entries.insert((id, salt), key);
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached key, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        // DerivedKey zeroizes itself on drop.
        self.entries.clear();
        count
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl Drop for KeyCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_stable_within_cache() {
        let cache = KeyCache::new();
        let a = cache.identify(&Passphrase::new("one"));
        let b = cache.identify(&Passphrase::new("one"));
        let c = cache.identify(&Passphrase::new("two"));

        assert!(a.ct_matches(&b));
        assert!(!a.ct_matches(&c));
    }

    #[test]
    fn test_identity_differs_across_caches() {
        let passphrase = Passphrase::new("one");
        let a = KeyCache::new().identify(&passphrase);
        let b = KeyCache::new().identify(&passphrase);

        assert_ne!(a, b);
    }

    #[test]
    fn test_lookup_requires_matching_salt() {
        let mut cache = KeyCache::new();
        let id = cache.identify(&Passphrase::new("pw"));
        let salt = Salt::from_bytes([1u8; 16]);

        cache.insert(id, salt, DerivedKey::from_bytes([9u8; KEY_LENGTH]));

        assert!(cache.get(&id, &salt).is_some());
        assert!(cache.get(&id, &Salt::from_bytes([2u8; 16])).is_none());

        let other = cache.identify(&Passphrase::new("other"));
        assert!(cache.get(&other, &salt).is_none());
    }

    #[test]
    fn test_clear_empties_cache() {
        let mut cache = KeyCache::new();
        let id = cache.identify(&Passphrase::new("pw"));
        cache.insert(id, Salt::generate(), DerivedKey::from_bytes([1u8; KEY_LENGTH]));
        cache.insert(id, Salt::generate(), DerivedKey::from_bytes([2u8; KEY_LENGTH]));

        assert_eq!(cache.clear(), 2);
        assert!(cache.is_empty());
    }
}
