//! Redb-backed dataset store
//!
//! Records are stored as JSON (labels are free-form JSON values). Feedback
//! is indexed by user and by item in multimap tables so per-user lookups and
//! cascading deletes do not scan the whole feedback table.

use super::{
    DataStore, Page, check_limit, decode_cursor, feedback_key, finish_page, type_matches,
    validate_feedback_key, validate_id, within_time_limit,
};
use crate::kv::{self, StoreError, StoreResult};
use crate::tables::{DATA_FEEDBACK, DATA_ITEM_FEEDBACK, DATA_ITEMS, DATA_USER_FEEDBACK, DATA_USERS};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recserve_common::{Error, Feedback, FeedbackInsertOptions, Item, ItemPatch, Result, User};
use redb::{
    Database, MultimapTableDefinition, ReadableMultimapTable, ReadableTable, TableDefinition,
    WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Persistent dataset store
pub struct RedbDataStore {
    db: Arc<Database>,
}

impl RedbDataStore {
    /// Open or create the dataset database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = kv::open_database(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        info!("Dataset store opened at {}", path.display());
        Ok(store)
    }

    fn init_tables(&self) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(DATA_USERS)?;
            let _ = write_txn.open_table(DATA_ITEMS)?;
            let _ = write_txn.open_table(DATA_FEEDBACK)?;
            let _ = write_txn.open_multimap_table(DATA_USER_FEEDBACK)?;
            let _ = write_txn.open_multimap_table(DATA_ITEM_FEEDBACK)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &str>,
        key: &str,
    ) -> StoreResult<T> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        match table.get(key)? {
            Some(raw) => Ok(serde_json::from_str(raw.value())?),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    fn put_json_batch<T: Serialize>(
        &self,
        table_def: TableDefinition<&str, &str>,
        rows: &[(&str, &T)],
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            for (key, row) in rows {
                let json = serde_json::to_string(row)?;
                table.insert(*key, json.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read-modify-write of one item in a single transaction.
    fn patch_item(&self, item_id: &str, patch: ItemPatch) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DATA_ITEMS)?;
            let mut item: Item = match table.get(item_id)? {
                Some(raw) => serde_json::from_str(raw.value())?,
                None => return Err(StoreError::NotFound(item_id.to_string())),
            };
            patch.apply(&mut item);
            let json = serde_json::to_string(&item)?;
            table.insert(item_id, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn hidden_among(&self, item_ids: &[String]) -> StoreResult<HashSet<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DATA_ITEMS)?;
        let mut hidden = HashSet::new();
        for id in item_ids {
            if let Some(raw) = table.get(id.as_str())? {
                let item: Item = serde_json::from_str(raw.value())?;
                if item.is_hidden {
                    hidden.insert(id.clone());
                }
            }
        }
        Ok(hidden)
    }

    /// Rows after the cursor key that pass `keep`, at most `limit`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        table_def: TableDefinition<&str, &str>,
        after: Option<&str>,
        limit: usize,
        keep: impl Fn(&T) -> bool,
    ) -> StoreResult<Vec<(String, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(table_def)?;
        let start = after.map_or(Bound::Unbounded, Bound::Excluded);
        let mut rows = Vec::new();
        for entry in table.range::<&str>((start, Bound::Unbounded))? {
            let entry = entry?;
            let row: T = serde_json::from_str(entry.1.value())?;
            if keep(&row) {
                rows.push((entry.0.value().to_string(), row));
                if rows.len() == limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// Feedback keys indexed under one user or item.
    fn indexed_keys(
        &self,
        index: MultimapTableDefinition<&str, &str>,
        id: &str,
    ) -> StoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(index)?;
        let mut keys = Vec::new();
        for key in table.get(id)? {
            keys.push(key?.value().to_string());
        }
        Ok(keys)
    }

    fn feedback_by_keys(&self, keys: &[String]) -> StoreResult<Vec<Feedback>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DATA_FEEDBACK)?;
        let mut feedback = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = table.get(key.as_str())? {
                feedback.push(serde_json::from_str(raw.value())?);
            }
        }
        Ok(feedback)
    }

    /// Remove an entity and cascade its feedback in one transaction.
    ///
    /// `own_index` maps the entity to its feedback keys; `other_index` is the
    /// index on the opposite side, whose entries must be unlinked too.
    fn delete_with_feedback(
        &self,
        entity: TableDefinition<&str, &str>,
        own_index: MultimapTableDefinition<&str, &str>,
        other_index: MultimapTableDefinition<&str, &str>,
        other_id: fn(&Feedback) -> &str,
        id: &str,
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.open_table(entity)?.remove(id)?;

            let mut own = write_txn.open_multimap_table(own_index)?;
            let mut keys = Vec::new();
            for key in own.remove_all(id)? {
                keys.push(key?.value().to_string());
            }

            let mut feedback = write_txn.open_table(DATA_FEEDBACK)?;
            let mut other = write_txn.open_multimap_table(other_index)?;
            for key in &keys {
                let removed: Option<Feedback> = match feedback.remove(key.as_str())? {
                    Some(raw) => Some(serde_json::from_str(raw.value())?),
                    None => None,
                };
                if let Some(f) = removed {
                    other.remove(other_id(&f), key.as_str())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn insert_feedback(
        &self,
        feedback: &[Feedback],
        options: FeedbackInsertOptions,
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            if options.insert_user {
                insert_missing(&write_txn, DATA_USERS, feedback, |f| {
                    let id = &f.key.user_id;
                    (id.clone(), serde_json::to_string(&User::new(id)))
                })?;
            }
            if options.insert_item {
                insert_missing(&write_txn, DATA_ITEMS, feedback, |f| {
                    let id = &f.key.item_id;
                    (id.clone(), serde_json::to_string(&Item::new(id)))
                })?;
            }

            let mut table = write_txn.open_table(DATA_FEEDBACK)?;
            let mut by_user = write_txn.open_multimap_table(DATA_USER_FEEDBACK)?;
            let mut by_item = write_txn.open_multimap_table(DATA_ITEM_FEEDBACK)?;
            for f in feedback {
                let key = feedback_key(&f.key);
                if !options.overwrite && table.get(key.as_str())?.is_some() {
                    continue;
                }
                let json = serde_json::to_string(f)?;
                table.insert(key.as_str(), json.as_str())?;
                by_user.insert(f.key.user_id.as_str(), key.as_str())?;
                by_item.insert(f.key.item_id.as_str(), key.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn reset(&self, tables: &[TableDefinition<&str, &str>]) -> StoreResult<()> {
        for table in tables {
            kv::reset_table(&self.db, *table)?;
        }
        Ok(())
    }
}

/// Create default records for ids referenced by feedback but not yet stored.
fn insert_missing(
    write_txn: &WriteTransaction,
    table_def: TableDefinition<&str, &str>,
    feedback: &[Feedback],
    make: impl Fn(&Feedback) -> (String, serde_json::Result<String>),
) -> StoreResult<()> {
    let mut table = write_txn.open_table(table_def)?;
    for f in feedback {
        let (id, json) = make(f);
        if table.get(id.as_str())?.is_none() {
            table.insert(id.as_str(), json?.as_str())?;
        }
    }
    Ok(())
}

#[async_trait]
impl DataStore for RedbDataStore {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn batch_insert_users(&self, users: &[User]) -> Result<()> {
        for user in users {
            validate_id("user", &user.user_id)?;
        }
        let rows: Vec<(&str, &User)> = users.iter().map(|u| (u.user_id.as_str(), u)).collect();
        self.put_json_batch(DATA_USERS, &rows)?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<User> {
        match self.get_json(DATA_USERS, user_id) {
            Err(StoreError::NotFound(_)) => Err(Error::not_found(format!("user {user_id}"))),
            other => Ok(other?),
        }
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        self.delete_with_feedback(
            DATA_USERS,
            DATA_USER_FEEDBACK,
            DATA_ITEM_FEEDBACK,
            |f| f.key.item_id.as_str(),
            user_id,
        )?;
        Ok(())
    }

    async fn get_users(&self, cursor: &str, limit: usize) -> Result<Page<User>> {
        check_limit(limit)?;
        let after = decode_cursor(cursor)?;
        let rows = self.scan_json(DATA_USERS, after.as_deref(), limit, |_: &User| true)?;
        Ok(finish_page(rows, limit))
    }

    async fn batch_insert_items(&self, items: &[Item]) -> Result<()> {
        for item in items {
            validate_id("item", &item.item_id)?;
        }
        let rows: Vec<(&str, &Item)> = items.iter().map(|i| (i.item_id.as_str(), i)).collect();
        self.put_json_batch(DATA_ITEMS, &rows)?;
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Item> {
        match self.get_json(DATA_ITEMS, item_id) {
            Err(StoreError::NotFound(_)) => Err(Error::not_found(format!("item {item_id}"))),
            other => Ok(other?),
        }
    }

    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> Result<()> {
        match self.patch_item(item_id, patch) {
            Err(StoreError::NotFound(_)) => Err(Error::not_found(format!("item {item_id}"))),
            other => Ok(other?),
        }
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.delete_with_feedback(
            DATA_ITEMS,
            DATA_ITEM_FEEDBACK,
            DATA_USER_FEEDBACK,
            |f| f.key.user_id.as_str(),
            item_id,
        )?;
        Ok(())
    }

    async fn get_items(
        &self,
        cursor: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Page<Item>> {
        check_limit(limit)?;
        let after = decode_cursor(cursor)?;
        let rows = self.scan_json(DATA_ITEMS, after.as_deref(), limit, |item: &Item| {
            since.is_none_or(|since| item.timestamp >= since)
        })?;
        Ok(finish_page(rows, limit))
    }

    async fn hidden_items(&self, item_ids: &[String]) -> Result<HashSet<String>> {
        Ok(self.hidden_among(item_ids)?)
    }

    async fn batch_insert_feedback(
        &self,
        feedback: &[Feedback],
        options: FeedbackInsertOptions,
    ) -> Result<()> {
        for f in feedback {
            validate_feedback_key(&f.key)?;
        }
        self.insert_feedback(feedback, options)?;
        Ok(())
    }

    async fn get_feedback(
        &self,
        cursor: &str,
        limit: usize,
        feedback_types: &[String],
        time_limit: Option<DateTime<Utc>>,
    ) -> Result<Page<Feedback>> {
        check_limit(limit)?;
        let after = decode_cursor(cursor)?;
        let rows = self.scan_json(DATA_FEEDBACK, after.as_deref(), limit, |f: &Feedback| {
            type_matches(feedback_types, &f.key.feedback_type) && within_time_limit(f, time_limit)
        })?;
        Ok(finish_page(rows, limit))
    }

    async fn get_user_feedback(
        &self,
        user_id: &str,
        feedback_types: &[String],
    ) -> Result<Vec<Feedback>> {
        let keys = self.indexed_keys(DATA_USER_FEEDBACK, user_id)?;
        let mut feedback = self.feedback_by_keys(&keys)?;
        feedback.retain(|f| type_matches(feedback_types, &f.key.feedback_type));
        Ok(feedback)
    }

    async fn get_user_item_feedback(&self, user_id: &str, item_id: &str) -> Result<Vec<Feedback>> {
        let mut keys = self.indexed_keys(DATA_USER_FEEDBACK, user_id)?;
        // key layout is type\0user\0item
        let suffix = format!("\x00{user_id}\x00{item_id}");
        keys.retain(|k| k.ends_with(&suffix));
        Ok(self.feedback_by_keys(&keys)?)
    }

    async fn purge_users(&self) -> Result<()> {
        self.reset(&[DATA_USERS])?;
        Ok(())
    }

    async fn purge_items(&self) -> Result<()> {
        self.reset(&[DATA_ITEMS])?;
        Ok(())
    }

    async fn purge_feedback(&self) -> Result<()> {
        self.reset(&[DATA_FEEDBACK])?;
        kv::reset_multimap_table(&self.db, DATA_USER_FEEDBACK)?;
        kv::reset_multimap_table(&self.db, DATA_ITEM_FEEDBACK)?;
        Ok(())
    }
}
