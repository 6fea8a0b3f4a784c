//! Passphrase probes used to confirm an unlock.
//!
//! A vault keeps no stored key. The passphrase is confirmed by opening
//! something that was sealed under it, or by an Argon2id verifier.

use subtle::ConstantTimeEq;

use vaultkeeper_common::{Error, Result};
use vaultkeeper_crypto::verifier::verify_passphrase;
use vaultkeeper_crypto::{derive_key, open_with_key, seal, DerivedKey, Passphrase, Salt};

use crate::model::{Item, Record, SealedField};

/// Plaintext sealed into a canary.
pub const CANARY_PLAINTEXT: &[u8] = b"vaultkeeper-canary-v1";

/// What an unlock is checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockProbe {
    /// A canary from [`create_canary`]; its content is checked too.
    Canary(SealedField),
    /// Any sealed field of the vault.
    Field(SealedField),
    /// Argon2id PHC verifier string.
    Verifier(String),
}

impl UnlockProbe {
    /// Probe on the first sealed field of the first item that has one.
    pub fn first_field<'a, I>(items: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Item<SealedField>>,
    {
        items.into_iter().find_map(|item| {
            item.sensitive_values()
                .first()
                .map(|(_, field)| UnlockProbe::Field((*field).clone()))
        })
    }
}

/// Seal a fresh canary under `passphrase`.
///
/// Blocks on key derivation.
pub fn create_canary(passphrase: &Passphrase) -> Result<SealedField> {
    Ok(SealedField::new(seal(CANARY_PLAINTEXT, passphrase)?))
}

/// Check `passphrase` against `probe`.
///
/// Returns the derived key and its salt when the probe was an envelope,
/// so that the caller can cache it. Blocks on key derivation.
///
/// # Errors
/// - `AuthenticationFailure` if the passphrase is wrong
/// - `MalformedEnvelope` if the probe itself is damaged
pub fn check(probe: &UnlockProbe, passphrase: &Passphrase) -> Result<Option<(Salt, DerivedKey)>> {
    match probe {
        UnlockProbe::Canary(field) | UnlockProbe::Field(field) => {
            let envelope = field.envelope()?;
            let key = derive_key(passphrase, envelope.salt())?;
            let opened = open_with_key(&key, &envelope)?;
            if matches!(probe, UnlockProbe::Canary(_))
                && !bool::from(opened.as_bytes().ct_eq(CANARY_PLAINTEXT))
            {
                return Err(Error::AuthenticationFailure);
            }
            Ok(Some((*envelope.salt(), key)))
        }
        UnlockProbe::Verifier(phc) => {
            verify_passphrase(phc, passphrase)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultkeeper_crypto::verifier::hash_passphrase;

    use crate::model::{Credential, SecureNote};

    #[test]
    fn test_canary_accepts_right_passphrase() {
        let passphrase = Passphrase::from("canary pass");
        let canary = create_canary(&passphrase).unwrap();

        let (salt, _key) = check(&UnlockProbe::Canary(canary.clone()), &passphrase)
            .unwrap()
            .unwrap();
        assert_eq!(&salt, canary.envelope().unwrap().salt());

        let wrong = Passphrase::from("other pass");
        let err = check(&UnlockProbe::Canary(canary), &wrong).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_canary_content_is_checked() {
        let passphrase = Passphrase::from("canary pass");
        let field = SealedField::new(seal(b"some password", &passphrase).unwrap());

        assert!(check(&UnlockProbe::Field(field.clone()), &passphrase).is_ok());
        let err = check(&UnlockProbe::Canary(field), &passphrase).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_verifier_probe() {
        let passphrase = Passphrase::from("Verifier1");
        let phc = hash_passphrase(&passphrase).unwrap();

        assert!(check(&UnlockProbe::Verifier(phc.clone()), &passphrase)
            .unwrap()
            .is_none());
        assert!(check(&UnlockProbe::Verifier(phc), &Passphrase::from("nope"))
            .unwrap_err()
            .is_authentication_failure());
    }

    #[test]
    fn test_malformed_probe() {
        let probe = UnlockProbe::Field(SealedField::new("too short"));
        assert!(matches!(
            check(&probe, &Passphrase::from("x")),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_first_field() {
        assert_eq!(UnlockProbe::first_field(&Vec::<Item<SealedField>>::new()), None);

        let note = Item::SecureNote(SecureNote::new("n", SealedField::new("note-blob")));
        let login = Item::Credential(Credential::new("a.com", "u", SealedField::new("pw-blob")));
        let items = vec![note, login];

        assert_eq!(
            UnlockProbe::first_field(&items),
            Some(UnlockProbe::Field(SealedField::new("note-blob")))
        );
    }
}
