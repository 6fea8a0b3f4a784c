//! Persistence collaborator.
//!
//! Only stored views cross this boundary; plaintext views cannot be
//! handed to a store because `SecretText` has no serialization.

use async_trait::async_trait;

use vaultkeeper_common::{EntityId, Result};

use crate::model::{EntityKind, Folder, SealedField, StoredItem};

/// Storage backend for vault records.
///
/// Implementations assign identifiers and maintain `created_at` and
/// `updated_at`. Folder references are weak: deleting a folder leaves
/// items pointing at it untouched.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// All folders, in insertion order.
    async fn list_folders(&self) -> Result<Vec<Folder>>;

    /// Insert or update a folder.
    ///
    /// # Postconditions
    /// - A folder without an id is assigned one
    /// - Returns the folder as stored
    ///
    /// # Errors
    /// - `Validation` if the folder name is empty
    /// - `NotFound` when updating an id that does not exist
    async fn save_folder(&self, folder: Folder) -> Result<Folder>;

    /// Delete a folder.
    async fn delete_folder(&self, id: &EntityId) -> Result<()>;

    /// All items of every kind, in insertion order.
    async fn list_items(&self) -> Result<Vec<StoredItem>>;

    /// Fetch one item.
    async fn get_item(&self, kind: EntityKind, id: &EntityId) -> Result<StoredItem>;

    /// Insert or update an item.
    ///
    /// # Postconditions
    /// - An item without an id is assigned one
    /// - `updated_at` is set to now; `created_at` is kept if present
    ///
    /// # Errors
    /// - `NotFound` when updating an id that does not exist
    async fn save_item(&self, item: StoredItem) -> Result<StoredItem>;

    /// Delete an item.
    async fn delete_item(&self, kind: EntityKind, id: &EntityId) -> Result<()>;

    /// The unlock canary, if one has been saved.
    async fn load_canary(&self) -> Result<Option<SealedField>>;

    /// Replace the unlock canary.
    async fn save_canary(&self, canary: SealedField) -> Result<()>;

    /// Update a batch of items and the canary as one unit.
    ///
    /// Used by a passphrase change: either every row and the canary are
    /// replaced, or nothing is.
    ///
    /// # Postconditions
    /// - On success, returns the items as stored, in input order
    /// - On error, the store is unchanged
    ///
    /// # Errors
    /// - `NotFound` when an item carries an id that does not exist
    async fn replace_items_and_canary(
        &self,
        items: Vec<StoredItem>,
        canary: SealedField,
    ) -> Result<Vec<StoredItem>>;
}
