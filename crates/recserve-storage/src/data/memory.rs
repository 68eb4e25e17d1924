//! Process-local dataset backend

use super::{
    DataStore, Page, check_limit, decode_cursor, feedback_key, finish_page, type_matches,
    validate_feedback_key, validate_id, within_time_limit,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use recserve_common::{Error, Feedback, FeedbackInsertOptions, Item, ItemPatch, Result, User};
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

#[derive(Default)]
struct Tables {
    users: BTreeMap<String, User>,
    items: BTreeMap<String, Item>,
    /// Keyed by `type\x00user\x00item`
    feedback: BTreeMap<String, Feedback>,
}

/// In-memory dataset store
///
/// A single lock covers all three collections so a cascading delete is
/// never observed half-applied.
pub struct MemoryDataStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

/// Rows after the cursor key, filtered, at most `limit`.
fn scan<T: Clone>(
    map: &BTreeMap<String, T>,
    after: Option<&str>,
    limit: usize,
    keep: impl Fn(&T) -> bool,
) -> Vec<(String, T)> {
    let start = after.map_or(Bound::Unbounded, Bound::Excluded);
    map.range::<str, _>((start, Bound::Unbounded))
        .filter(|(_, row)| keep(row))
        .take(limit)
        .map(|(key, row)| (key.clone(), row.clone()))
        .collect()
}

#[async_trait]
impl DataStore for MemoryDataStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn batch_insert_users(&self, users: &[User]) -> Result<()> {
        for user in users {
            validate_id("user", &user.user_id)?;
        }
        let mut tables = self.tables.write();
        for user in users {
            tables.users.insert(user.user_id.clone(), user.clone());
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> Result<User> {
        self.tables
            .read()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("user {user_id}")))
    }

    async fn delete_user(&self, user_id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        tables.users.remove(user_id);
        tables.feedback.retain(|_, f| f.key.user_id != user_id);
        Ok(())
    }

    async fn get_users(&self, cursor: &str, limit: usize) -> Result<Page<User>> {
        check_limit(limit)?;
        let after = decode_cursor(cursor)?;
        let rows = scan(&self.tables.read().users, after.as_deref(), limit, |_| true);
        Ok(finish_page(rows, limit))
    }

    async fn batch_insert_items(&self, items: &[Item]) -> Result<()> {
        for item in items {
            validate_id("item", &item.item_id)?;
        }
        let mut tables = self.tables.write();
        for item in items {
            tables.items.insert(item.item_id.clone(), item.clone());
        }
        Ok(())
    }

    async fn get_item(&self, item_id: &str) -> Result<Item> {
        self.tables
            .read()
            .items
            .get(item_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("item {item_id}")))
    }

    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> Result<()> {
        let mut tables = self.tables.write();
        let item = tables
            .items
            .get_mut(item_id)
            .ok_or_else(|| Error::not_found(format!("item {item_id}")))?;
        patch.apply(item);
        Ok(())
    }

    async fn delete_item(&self, item_id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        tables.items.remove(item_id);
        tables.feedback.retain(|_, f| f.key.item_id != item_id);
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
        let rows = scan(&self.tables.read().items, after.as_deref(), limit, |item| {
            since.is_none_or(|since| item.timestamp >= since)
        });
        Ok(finish_page(rows, limit))
    }

    async fn hidden_items(&self, item_ids: &[String]) -> Result<HashSet<String>> {
        let tables = self.tables.read();
        Ok(item_ids
            .iter()
            .filter(|id| tables.items.get(*id).is_some_and(|item| item.is_hidden))
            .cloned()
            .collect())
    }

    async fn batch_insert_feedback(
        &self,
        feedback: &[Feedback],
        options: FeedbackInsertOptions,
    ) -> Result<()> {
        for f in feedback {
            validate_feedback_key(&f.key)?;
        }
        let mut tables = self.tables.write();
        for f in feedback {
            if options.insert_user && !tables.users.contains_key(&f.key.user_id) {
                tables
                    .users
                    .insert(f.key.user_id.clone(), User::new(&f.key.user_id));
            }
            if options.insert_item && !tables.items.contains_key(&f.key.item_id) {
                tables
                    .items
                    .insert(f.key.item_id.clone(), Item::new(&f.key.item_id));
            }
            let key = feedback_key(&f.key);
            if options.overwrite || !tables.feedback.contains_key(&key) {
                tables.feedback.insert(key, f.clone());
            }
        }
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
        let rows = scan(&self.tables.read().feedback, after.as_deref(), limit, |f| {
            type_matches(feedback_types, &f.key.feedback_type) && within_time_limit(f, time_limit)
        });
        Ok(finish_page(rows, limit))
    }

    async fn get_user_feedback(
        &self,
        user_id: &str,
        feedback_types: &[String],
    ) -> Result<Vec<Feedback>> {
        Ok(self
            .tables
            .read()
            .feedback
            .values()
            .filter(|f| {
                f.key.user_id == user_id && type_matches(feedback_types, &f.key.feedback_type)
            })
            .cloned()
            .collect())
    }

    async fn get_user_item_feedback(&self, user_id: &str, item_id: &str) -> Result<Vec<Feedback>> {
        Ok(self
            .tables
            .read()
            .feedback
            .values()
            .filter(|f| f.key.user_id == user_id && f.key.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn purge_users(&self) -> Result<()> {
        self.tables.write().users.clear();
        Ok(())
    }

    async fn purge_items(&self) -> Result<()> {
        self.tables.write().items.clear();
        Ok(())
    }

    async fn purge_feedback(&self) -> Result<()> {
        self.tables.write().feedback.clear();
        Ok(())
    }
}
