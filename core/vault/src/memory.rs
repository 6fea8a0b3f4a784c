//! In-memory entity store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use vaultkeeper_common::{EntityId, Error, Result};

use crate::model::{EntityKind, Folder, Item, Record, SealedField, StoredItem};
use crate::store::EntityStore;

/// Stored item row. Items are kept as JSON, the way a database row
/// would hold them.
#[derive(Debug, Clone)]
struct ItemRow {
    kind: EntityKind,
    id: EntityId,
    created_at: DateTime<Utc>,
    data: serde_json::Value,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    folders: Vec<Folder>,
    items: Vec<ItemRow>,
    canary: Option<SealedField>,
}

impl Tables {
    fn allocate_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::from(self.next_id)
    }

    /// Insert or update one item row. An update keeps the row's original
    /// `created_at` whatever the caller sent.
    fn upsert_item(&mut self, mut item: StoredItem, now: DateTime<Utc>) -> Result<StoredItem> {
        let kind = item.kind();

        match item.id().cloned() {
            Some(id) => {
                let position = self
                    .items
                    .iter()
                    .position(|r| r.kind == kind && r.id == id)
                    .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;
                let created_at = self.items[position].created_at;
                stamp(&mut item, id.clone(), created_at, now);
                self.items[position] = to_row(kind, id, created_at, &item)?;
            }
            None => {
                let id = self.allocate_id();
                stamp(&mut item, id.clone(), now, now);
                self.items.push(to_row(kind, id, now, &item)?);
            }
        }

        Ok(item)
    }
}

/// In-memory entity store.
///
/// All data is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stamp(item: &mut StoredItem, id: EntityId, created: DateTime<Utc>, now: DateTime<Utc>) {
    let (slot, created_at, updated_at) = match item {
        Item::Credential(c) => (&mut c.id, &mut c.created_at, &mut c.updated_at),
        Item::SecureNote(n) => (&mut n.id, &mut n.created_at, &mut n.updated_at),
        Item::CreditCard(c) => (&mut c.id, &mut c.created_at, &mut c.updated_at),
    };
    *slot = Some(id);
    *created_at = Some(created);
    *updated_at = Some(now);
}

fn to_row(
    kind: EntityKind,
    id: EntityId,
    created_at: DateTime<Utc>,
    item: &StoredItem,
) -> Result<ItemRow> {
    let data = serde_json::to_value(item).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(ItemRow {
        kind,
        id,
        created_at,
        data,
    })
}

fn from_row(row: &ItemRow) -> Result<StoredItem> {
    serde_json::from_value(row.data.clone()).map_err(|e| Error::Serialization(e.to_string()))
}

#[async_trait]
impl EntityStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_folders(&self) -> Result<Vec<Folder>> {
        Ok(self.read().folders.clone())
    }

    async fn save_folder(&self, mut folder: Folder) -> Result<Folder> {
        folder.validate()?;
        let mut tables = self.write();

        match folder.id.clone() {
            Some(id) => {
                let existing = tables
                    .folders
                    .iter_mut()
                    .find(|f| f.id.as_ref() == Some(&id))
                    .ok_or_else(|| Error::NotFound(format!("folder {}", id)))?;
                folder.created_at = existing.created_at;
                *existing = folder.clone();
            }
            None => {
                folder.id = Some(tables.allocate_id());
                folder.created_at.get_or_insert_with(Utc::now);
                tables.folders.push(folder.clone());
            }
        }

        Ok(folder)
    }

    async fn delete_folder(&self, id: &EntityId) -> Result<()> {
        let mut tables = self.write();
        let before = tables.folders.len();
        tables.folders.retain(|f| f.id.as_ref() != Some(id));
        if tables.folders.len() == before {
            return Err(Error::NotFound(format!("folder {}", id)));
        }
        Ok(())
    }

    async fn list_items(&self) -> Result<Vec<StoredItem>> {
        self.read().items.iter().map(from_row).collect()
    }

    async fn get_item(&self, kind: EntityKind, id: &EntityId) -> Result<StoredItem> {
        let tables = self.read();
        let row = tables
            .items
            .iter()
            .find(|r| r.kind == kind && &r.id == id)
            .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;
        from_row(row)
    }

    async fn save_item(&self, item: StoredItem) -> Result<StoredItem> {
        self.write().upsert_item(item, Utc::now())
    }

    async fn delete_item(&self, kind: EntityKind, id: &EntityId) -> Result<()> {
        let mut tables = self.write();
        let before = tables.items.len();
        tables.items.retain(|r| !(r.kind == kind && &r.id == id));
        if tables.items.len() == before {
            return Err(Error::NotFound(format!("{} {}", kind, id)));
        }
        Ok(())
    }

    async fn load_canary(&self) -> Result<Option<SealedField>> {
        Ok(self.read().canary.clone())
    }

    async fn save_canary(&self, canary: SealedField) -> Result<()> {
        self.write().canary = Some(canary);
        Ok(())
    }

    async fn replace_items_and_canary(
        &self,
        items: Vec<StoredItem>,
        canary: SealedField,
    ) -> Result<Vec<StoredItem>> {
        let now = Utc::now();
        let mut tables = self.write();

        // Stage against a copy; the live tables change only if every row lands.
        let mut staged = Tables {
            next_id: tables.next_id,
            folders: Vec::new(),
            items: tables.items.clone(),
            canary: None,
        };
        let saved = items
            .into_iter()
            .map(|item| staged.upsert_item(item, now))
            .collect::<Result<Vec<_>>>()?;

        tables.next_id = staged.next_id;
        tables.items = staged.items;
        tables.canary = Some(canary);
        Ok(saved)
    }
}
