//! Entity model: the four record kinds and their field sensitivity.
//!
//! Every record kind that has sensitive fields is generic over how those
//! fields are represented:
//! - `S = SecretText` is the plaintext view held by an unlocked session
//! - `S = SealedField` is the stored view handed to persistence
//!
//! Only the stored view implements `Serialize`/`Deserialize`, because
//! `SecretText` implements neither. Converting between the views goes
//! through [`Record::try_map_sensitive`], which copies identifiers,
//! timestamps and folder references unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use vaultkeeper_common::{EntityId, Error, Result, SecretText};
use vaultkeeper_crypto::Envelope;

/// Stored form of a sensitive field: envelope text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedField(String);

impl SealedField {
    /// Wrap envelope text without checking it.
    ///
    /// Rows read from persistence are taken as-is; a malformed value
    /// surfaces as `MalformedEnvelope` when it is opened.
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Wrap envelope text, checking encoding and minimum length.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let field = Self(text.into());
        field.envelope()?;
        Ok(field)
    }

    /// Decode the envelope.
    pub fn envelope(&self) -> Result<Envelope> {
        Envelope::from_text(&self.0)
    }

    /// Get the envelope text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Envelope> for SealedField {
    fn from(envelope: &Envelope) -> Self {
        Self(envelope.to_text())
    }
}

/// Emptiness check shared by both field representations.
pub trait FieldValue {
    /// Whether the value carries no content.
    fn is_blank(&self) -> bool;
}

impl FieldValue for SecretText {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl FieldValue for SealedField {
    fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

/// Kinds of records in a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Folder,
    Credential,
    SecureNote,
    CreditCard,
}

impl EntityKind {
    /// Fields stored as-is, in declaration order.
    pub fn plain_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Folder => &["id", "name", "vault_type", "icon", "created_at"],
            EntityKind::Credential => &[
                "id",
                "domain",
                "username",
                "is_favorite",
                "folder_id",
                "created_at",
                "updated_at",
                "leaked_count",
            ],
            EntityKind::SecureNote => &[
                "id",
                "title",
                "is_favorite",
                "folder_id",
                "created_at",
                "updated_at",
            ],
            EntityKind::CreditCard => &[
                "id",
                "title",
                "cardholder_name",
                "expiry_date",
                "is_favorite",
                "folder_id",
                "created_at",
                "updated_at",
            ],
        }
    }

    /// Fields that are only ever persisted sealed, in declaration order.
    pub fn sensitive_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Folder => &[],
            EntityKind::Credential => &["password", "notes", "totp_secret", "backup_codes"],
            EntityKind::SecureNote => &["content"],
            EntityKind::CreditCard => &["card_number", "cvv", "notes"],
        }
    }

    /// Whether `field` is sensitive for this kind.
    pub fn is_sensitive(&self, field: &str) -> bool {
        self.sensitive_fields().contains(&field)
    }

    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Folder => "folder",
            EntityKind::Credential => "credential",
            EntityKind::SecureNote => "secure_note",
            EntityKind::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record kind with sensitive fields of type `Self::Field`.
pub trait Record: Sized {
    /// Representation of the sensitive fields.
    type Field: FieldValue;

    /// The same record kind with sensitive fields of type `U`.
    type WithField<U>;

    /// Kind of this record.
    fn kind(&self) -> EntityKind;

    /// Identifier assigned by persistence, if saved.
    fn id(&self) -> Option<&EntityId>;

    /// Present sensitive values, in `sensitive_fields()` order.
    ///
    /// Absent optional fields are skipped.
    fn sensitive_values(&self) -> Vec<(&'static str, &Self::Field)>;

    /// Convert every present sensitive value with `f`, in the same order
    /// as `sensitive_values`, leaving all plain fields untouched.
    fn try_map_sensitive<U, F>(self, f: F) -> Result<Self::WithField<U>>
    where
        F: FnMut(&'static str, Self::Field) -> Result<U>;

    /// Turn optional sensitive values with no content into absent ones.
    fn prune_blank_optionals(&mut self);

    /// Check required fields are non-empty.
    fn validate(&self) -> Result<()>;
}

fn require(kind: EntityKind, field: &str, blank: bool) -> Result<()> {
    if blank {
        return Err(Error::Validation(format!(
            "{} {} cannot be empty",
            kind, field
        )));
    }
    Ok(())
}

fn prune<S: FieldValue>(value: &mut Option<S>) {
    if value.as_ref().is_some_and(FieldValue::is_blank) {
        *value = None;
    }
}

/// Sharing scope of a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultType {
    #[default]
    Personal,
    Shared,
}

fn default_icon() -> String {
    "folder".to_string()
}

/// A folder. Has no sensitive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: Option<EntityId>,
    pub name: String,
    #[serde(default)]
    pub vault_type: VaultType,
    #[serde(default = "default_icon")]
    pub icon: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl Folder {
    /// New unsaved personal folder with the default icon.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            vault_type: VaultType::Personal,
            icon: default_icon(),
            created_at: None,
        }
    }

    /// Check the name is non-empty.
    pub fn validate(&self) -> Result<()> {
        require(EntityKind::Folder, "name", self.name.trim().is_empty())
    }
}

/// A website or service login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential<S> {
    pub id: Option<EntityId>,
    pub domain: String,
    pub username: String,
    pub password: S,
    pub notes: Option<S>,
    pub totp_secret: Option<S>,
    pub backup_codes: Option<S>,
    #[serde(default)]
    pub is_favorite: bool,
    /// Weak link; a folder that no longer exists means "unfiled".
    pub folder_id: Option<EntityId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Breach count written by an external service; round-tripped only.
    #[serde(default)]
    pub leaked_count: u32,
}

impl<S> Credential<S> {
    /// New unsaved credential with no optional fields.
    pub fn new(domain: impl Into<String>, username: impl Into<String>, password: S) -> Self {
        Self {
            id: None,
            domain: domain.into(),
            username: username.into(),
            password,
            notes: None,
            totp_secret: None,
            backup_codes: None,
            is_favorite: false,
            folder_id: None,
            created_at: None,
            updated_at: None,
            leaked_count: 0,
        }
    }

    /// Whether this credential belongs to `domain` or one of its subdomains.
    ///
    /// Case-insensitive; `mail.example.com` matches `example.com` but
    /// `badexample.com` does not.
    pub fn matches_domain(&self, domain: &str) -> bool {
        let own = self.domain.trim().to_ascii_lowercase();
        let query = domain.trim().to_ascii_lowercase();
        if query.is_empty() {
            return false;
        }
        own == query || own.ends_with(&format!(".{}", query))
    }

    /// Whether `query` occurs in the domain or the username.
    ///
    /// Case-insensitive substring match on plain fields only; nothing is
    /// opened. An empty query matches every credential.
    pub fn matches_query(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        self.domain.to_lowercase().contains(&query)
            || self.username.to_lowercase().contains(&query)
    }
}

impl<S: FieldValue> Record for Credential<S> {
    type Field = S;
    type WithField<U> = Credential<U>;

    fn kind(&self) -> EntityKind {
        EntityKind::Credential
    }

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn sensitive_values(&self) -> Vec<(&'static str, &S)> {
        let mut values = vec![("password", &self.password)];
        values.extend(self.notes.as_ref().map(|v| ("notes", v)));
        values.extend(self.totp_secret.as_ref().map(|v| ("totp_secret", v)));
        values.extend(self.backup_codes.as_ref().map(|v| ("backup_codes", v)));
        values
    }

    fn try_map_sensitive<U, F>(self, mut f: F) -> Result<Credential<U>>
    where
        F: FnMut(&'static str, S) -> Result<U>,
    {
        let password = f("password", self.password)?;
        let notes = self.notes.map(|v| f("notes", v)).transpose()?;
        let totp_secret = self.totp_secret.map(|v| f("totp_secret", v)).transpose()?;
        let backup_codes = self
            .backup_codes
            .map(|v| f("backup_codes", v))
            .transpose()?;

        Ok(Credential {
            id: self.id,
            domain: self.domain,
            username: self.username,
            password,
            notes,
            totp_secret,
            backup_codes,
            is_favorite: self.is_favorite,
            folder_id: self.folder_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            leaked_count: self.leaked_count,
        })
    }

    fn prune_blank_optionals(&mut self) {
        prune(&mut self.notes);
        prune(&mut self.totp_secret);
        prune(&mut self.backup_codes);
    }

    fn validate(&self) -> Result<()> {
        require(self.kind(), "domain", self.domain.trim().is_empty())?;
        require(self.kind(), "password", self.password.is_blank())
    }
}

/// Free-form encrypted note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecureNote<S> {
    pub id: Option<EntityId>,
    pub title: String,
    pub content: S,
    #[serde(default)]
    pub is_favorite: bool,
    pub folder_id: Option<EntityId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<S> SecureNote<S> {
    /// New unsaved note.
    pub fn new(title: impl Into<String>, content: S) -> Self {
        Self {
            id: None,
            title: title.into(),
            content,
            is_favorite: false,
            folder_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}

impl<S: FieldValue> Record for SecureNote<S> {
    type Field = S;
    type WithField<U> = SecureNote<U>;

    fn kind(&self) -> EntityKind {
        EntityKind::SecureNote
    }

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn sensitive_values(&self) -> Vec<(&'static str, &S)> {
        vec![("content", &self.content)]
    }

    fn try_map_sensitive<U, F>(self, mut f: F) -> Result<SecureNote<U>>
    where
        F: FnMut(&'static str, S) -> Result<U>,
    {
        Ok(SecureNote {
            id: self.id,
            title: self.title,
            content: f("content", self.content)?,
            is_favorite: self.is_favorite,
            folder_id: self.folder_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn prune_blank_optionals(&mut self) {}

    // An empty note body is allowed.
    fn validate(&self) -> Result<()> {
        require(self.kind(), "title", self.title.trim().is_empty())
    }
}

/// Payment card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditCard<S> {
    pub id: Option<EntityId>,
    pub title: String,
    pub cardholder_name: String,
    pub card_number: S,
    /// Free text, usually `MM/YY`. See [`CreditCard::expiry_is_well_formed`].
    pub expiry_date: String,
    pub cvv: S,
    pub notes: Option<S>,
    #[serde(default)]
    pub is_favorite: bool,
    pub folder_id: Option<EntityId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<S> CreditCard<S> {
    /// New unsaved card without notes.
    pub fn new(
        title: impl Into<String>,
        cardholder_name: impl Into<String>,
        card_number: S,
        expiry_date: impl Into<String>,
        cvv: S,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            cardholder_name: cardholder_name.into(),
            card_number,
            expiry_date: expiry_date.into(),
            cvv,
            notes: None,
            is_favorite: false,
            folder_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Advisory check that the expiry reads `MM/YY` or `MM/YYYY`.
    ///
    /// Not enforced by `validate`.
    pub fn expiry_is_well_formed(&self) -> bool {
        let Some((month, year)) = self.expiry_date.trim().split_once('/') else {
            return false;
        };
        let month_ok = month.len() == 2
            && month.bytes().all(|b| b.is_ascii_digit())
            && month
                .parse::<u8>()
                .is_ok_and(|m| (1..=12).contains(&m));
        let year_ok =
            matches!(year.len(), 2 | 4) && year.chars().all(|c| c.is_ascii_digit());
        month_ok && year_ok
    }
}

impl<S: FieldValue> Record for CreditCard<S> {
    type Field = S;
    type WithField<U> = CreditCard<U>;

    fn kind(&self) -> EntityKind {
        EntityKind::CreditCard
    }

    fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    fn sensitive_values(&self) -> Vec<(&'static str, &S)> {
        let mut values = vec![("card_number", &self.card_number), ("cvv", &self.cvv)];
        values.extend(self.notes.as_ref().map(|v| ("notes", v)));
        values
    }

    fn try_map_sensitive<U, F>(self, mut f: F) -> Result<CreditCard<U>>
    where
        F: FnMut(&'static str, S) -> Result<U>,
    {
        let card_number = f("card_number", self.card_number)?;
        let cvv = f("cvv", self.cvv)?;
        let notes = self.notes.map(|v| f("notes", v)).transpose()?;

        Ok(CreditCard {
            id: self.id,
            title: self.title,
            cardholder_name: self.cardholder_name,
            card_number,
            expiry_date: self.expiry_date,
            cvv,
            notes,
            is_favorite: self.is_favorite,
            folder_id: self.folder_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    fn prune_blank_optionals(&mut self) {
        prune(&mut self.notes);
    }

    fn validate(&self) -> Result<()> {
        require(self.kind(), "title", self.title.trim().is_empty())?;
        require(self.kind(), "card_number", self.card_number.is_blank())?;
        require(self.kind(), "cvv", self.cvv.is_blank())
    }
}

/// Any record kind that carries sensitive fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item<S> {
    Credential(Credential<S>),
    SecureNote(SecureNote<S>),
    CreditCard(CreditCard<S>),
}

impl<S> Item<S> {
    /// Folder reference, if any.
    pub fn folder_id(&self) -> Option<&EntityId> {
        match self {
            Item::Credential(c) => c.folder_id.as_ref(),
            Item::SecureNote(n) => n.folder_id.as_ref(),
            Item::CreditCard(c) => c.folder_id.as_ref(),
        }
    }

    /// Creation time assigned by the store.
    pub fn created_at(&self) -> Option<&DateTime<Utc>> {
        match self {
            Item::Credential(c) => c.created_at.as_ref(),
            Item::SecureNote(n) => n.created_at.as_ref(),
            Item::CreditCard(c) => c.created_at.as_ref(),
        }
    }

    /// Whether the item is marked favorite.
    pub fn is_favorite(&self) -> bool {
        match self {
            Item::Credential(c) => c.is_favorite,
            Item::SecureNote(n) => n.is_favorite,
            Item::CreditCard(c) => c.is_favorite,
        }
    }
}

impl<S: FieldValue> Record for Item<S> {
    type Field = S;
    type WithField<U> = Item<U>;

    fn kind(&self) -> EntityKind {
        match self {
            Item::Credential(c) => c.kind(),
            Item::SecureNote(n) => n.kind(),
            Item::CreditCard(c) => c.kind(),
        }
    }

    fn id(&self) -> Option<&EntityId> {
        match self {
            Item::Credential(c) => c.id(),
            Item::SecureNote(n) => n.id(),
            Item::CreditCard(c) => c.id(),
        }
    }

    fn sensitive_values(&self) -> Vec<(&'static str, &S)> {
        match self {
            Item::Credential(c) => c.sensitive_values(),
            Item::SecureNote(n) => n.sensitive_values(),
            Item::CreditCard(c) => c.sensitive_values(),
        }
    }

    fn try_map_sensitive<U, F>(self, f: F) -> Result<Item<U>>
    where
        F: FnMut(&'static str, S) -> Result<U>,
    {
        Ok(match self {
            Item::Credential(c) => Item::Credential(c.try_map_sensitive(f)?),
            Item::SecureNote(n) => Item::SecureNote(n.try_map_sensitive(f)?),
            Item::CreditCard(c) => Item::CreditCard(c.try_map_sensitive(f)?),
        })
    }

    fn prune_blank_optionals(&mut self) {
        match self {
            Item::Credential(c) => c.prune_blank_optionals(),
            Item::SecureNote(n) => n.prune_blank_optionals(),
            Item::CreditCard(c) => c.prune_blank_optionals(),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Item::Credential(c) => c.validate(),
            Item::SecureNote(n) => n.validate(),
            Item::CreditCard(c) => c.validate(),
        }
    }
}

/// Plaintext views, held only by an unlocked session.
pub type PlainCredential = Credential<SecretText>;
pub type PlainSecureNote = SecureNote<SecretText>;
pub type PlainCreditCard = CreditCard<SecretText>;
pub type PlainItem = Item<SecretText>;

/// Stored views, safe to persist.
pub type StoredCredential = Credential<SealedField>;
pub type StoredSecureNote = SecureNote<SealedField>;
pub type StoredCreditCard = CreditCard<SealedField>;
pub type StoredItem = Item<SealedField>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sealed(tag: &str) -> SealedField {
        SealedField::new(format!("sealed-{}", tag))
    }

    #[test]
    fn test_field_classification_is_disjoint() {
        for kind in [
            EntityKind::Folder,
            EntityKind::Credential,
            EntityKind::SecureNote,
            EntityKind::CreditCard,
        ] {
            for field in kind.sensitive_fields() {
                assert!(!kind.plain_fields().contains(field), "{} {}", kind, field);
            }
        }
        assert!(EntityKind::Credential.is_sensitive("totp_secret"));
        assert!(!EntityKind::Credential.is_sensitive("username"));
        assert!(EntityKind::Folder.sensitive_fields().is_empty());
    }

    #[test]
    fn test_sensitive_values_follow_declared_order() {
        let mut credential = Credential::new("example.com", "alice", sealed("pw"));
        credential.backup_codes = Some(sealed("codes"));

        let names: Vec<_> = credential
            .sensitive_values()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["password", "backup_codes"]);

        let declared = EntityKind::Credential.sensitive_fields();
        let positions: Vec<_> = names
            .iter()
            .map(|n| declared.iter().position(|d| d == n).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_map_preserves_plain_fields() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let mut card = CreditCard::new("Visa", "Alice", sealed("num"), "04/27", sealed("cvv"));
        card.id = Some(EntityId::from(11));
        card.folder_id = Some(EntityId::from(999));
        card.created_at = Some(created);
        card.is_favorite = true;

        let mapped = card
            .clone()
            .try_map_sensitive(|name, value| Ok(format!("{}={}", name, value.as_str())))
            .unwrap();

        assert_eq!(mapped.id, card.id);
        assert_eq!(mapped.folder_id, card.folder_id);
        assert_eq!(mapped.created_at, Some(created));
        assert!(mapped.is_favorite);
        assert_eq!(mapped.card_number, "card_number=sealed-num");
        assert_eq!(mapped.cvv, "cvv=sealed-cvv");
        assert_eq!(mapped.notes, None);
    }

    #[test]
    fn test_map_error_aborts() {
        let note = SecureNote::new("title", sealed("body"));
        let result: Result<SecureNote<String>> =
            note.try_map_sensitive(|_, _| Err(Error::AuthenticationFailure));
        assert!(result.unwrap_err().is_authentication_failure());
    }

    #[test]
    fn test_prune_blank_optionals() {
        let mut credential = Credential::new("example.com", "bob", SecretText::new("pw"));
        credential.notes = Some(SecretText::new(""));
        credential.totp_secret = Some(SecretText::new("JBSWY3DPEHPK3PXP"));

        credential.prune_blank_optionals();

        assert!(credential.notes.is_none());
        assert!(credential.totp_secret.is_some());
    }

    #[test]
    fn test_validation() {
        assert!(Folder::new("Work").validate().is_ok());
        assert!(Folder::new("  ").validate().is_err());

        let credential = Credential::new("", "bob", SecretText::new("pw"));
        assert!(matches!(credential.validate(), Err(Error::Validation(_))));

        let credential = Credential::new("example.com", "", SecretText::new(""));
        assert!(credential.validate().is_err());

        let credential = Credential::new("example.com", "", SecretText::new("pw"));
        assert!(credential.validate().is_ok());

        let note = SecureNote::new("Empty", SecretText::new(""));
        assert!(note.validate().is_ok());

        let card = CreditCard::new(
            "Card",
            "",
            SecretText::new("4111"),
            "",
            SecretText::new(""),
        );
        assert!(card.validate().is_err());
    }

    #[test]
    fn test_expiry_is_advisory() {
        let mut card = CreditCard::new(
            "Card",
            "A",
            SecretText::new("4111"),
            "13/27",
            SecretText::new("123"),
        );
        assert!(!card.expiry_is_well_formed());
        assert!(card.validate().is_ok());

        card.expiry_date = "09/27".to_string();
        assert!(card.expiry_is_well_formed());
        card.expiry_date = "09/2027".to_string();
        assert!(card.expiry_is_well_formed());
        card.expiry_date = "9/27".to_string();
        assert!(!card.expiry_is_well_formed());
        card.expiry_date = "+1/27".to_string();
        assert!(!card.expiry_is_well_formed());
    }

    #[test]
    fn test_matches_query() {
        let credential = Credential::new("Mail.Example.com", "Alice.Smith", sealed("pw"));

        assert!(credential.matches_query("example"));
        assert!(credential.matches_query("MAIL."));
        assert!(credential.matches_query("smith"));
        assert!(credential.matches_query(""));
        assert!(!credential.matches_query("bob"));
        // The sealed password is never searched.
        assert!(!credential.matches_query("pw"));
    }

    #[test]
    fn test_matches_domain() {
        let credential = Credential::new("Mail.Example.com", "u", sealed("pw"));

        assert!(credential.matches_domain("example.com"));
        assert!(credential.matches_domain("mail.example.com"));
        assert!(!credential.matches_domain("ample.com"));
        assert!(!credential.matches_domain(""));
    }

    #[test]
    fn test_stored_view_json_shape() {
        let mut credential = Credential::new("example.com", "alice", sealed("pw"));
        credential.id = Some(EntityId::from(3));
        credential.leaked_count = 2;

        let json = serde_json::to_value(Item::Credential(credential.clone())).unwrap();
        assert_eq!(json["kind"], "credential");
        assert_eq!(json["password"], "sealed-pw");
        assert_eq!(json["id"], "3");
        assert_eq!(json["leaked_count"], 2);

        let restored: StoredItem = serde_json::from_value(json).unwrap();
        assert_eq!(restored, Item::Credential(credential));
    }

    #[test]
    fn test_stored_row_defaults() {
        let row = serde_json::json!({
            "id": "5",
            "domain": "example.com",
            "username": "carol",
            "password": "sealed",
            "folder_id": "404",
            "created_at": null,
            "updated_at": null
        });

        let credential: StoredCredential = serde_json::from_value(row).unwrap();
        assert_eq!(credential.leaked_count, 0);
        assert!(!credential.is_favorite);
        assert!(credential.notes.is_none());
        assert_eq!(credential.folder_id, Some(EntityId::from(404)));

        let folder: Folder = serde_json::from_value(serde_json::json!({
            "id": null,
            "name": "Inbox",
            "created_at": null
        }))
        .unwrap();
        assert_eq!(folder.vault_type, VaultType::Personal);
        assert_eq!(folder.icon, "folder");
    }

    proptest! {
        #[test]
        fn prop_subdomains_match_parent(
            sub in "[a-z][a-z0-9]{0,9}",
            base in "[a-z][a-z0-9]{1,9}\\.(com|org|net)",
        ) {
            let credential = Credential::new(format!("{}.{}", sub, base), "u", sealed("pw"));
            prop_assert!(credential.matches_domain(&base));
            prop_assert!(credential.matches_domain(&base.to_ascii_uppercase()));
            let glued = Credential::new(format!("{}{}", sub, base), "u", sealed("pw"));
            prop_assert!(!glued.matches_domain(&base));
        }
    }
}
