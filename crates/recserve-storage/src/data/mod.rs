//! Dataset store: users, items and feedback.
//!
//! Paged reads return `(next_cursor, page)`. A cursor is the base64 encoding
//! of the last key returned; an empty cursor starts from the beginning when
//! passed in and means "exhausted" when handed back.

mod memory;
mod redb_store;

pub use memory::MemoryDataStore;
pub use redb_store::RedbDataStore;

use crate::url::StoreUrl;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use recserve_common::{
    Error, Feedback, FeedbackInsertOptions, FeedbackKey, Item, ItemPatch, Result, User,
};
use std::collections::HashSet;
use std::sync::Arc;

/// One page of a cursor scan.
pub type Page<T> = (String, Vec<T>);

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Backend name for logs ("memory", "redb")
    fn name(&self) -> &'static str;

    // ---- Users ----

    /// Insert users, replacing existing ones with the same id.
    async fn batch_insert_users(&self, users: &[User]) -> Result<()>;

    async fn get_user(&self, user_id: &str) -> Result<User>;

    /// Delete a user and every feedback record it made.
    async fn delete_user(&self, user_id: &str) -> Result<()>;

    /// Users in id order.
    async fn get_users(&self, cursor: &str, limit: usize) -> Result<Page<User>>;

    // ---- Items ----

    /// Insert items, replacing existing ones with the same id.
    async fn batch_insert_items(&self, items: &[Item]) -> Result<()>;

    async fn get_item(&self, item_id: &str) -> Result<Item>;

    /// Apply a partial update. Missing items fail with `NotFound`.
    async fn modify_item(&self, item_id: &str, patch: ItemPatch) -> Result<()>;

    /// Delete an item and every feedback record about it.
    async fn delete_item(&self, item_id: &str) -> Result<()>;

    /// Items in id order, optionally only those stamped at or after `since`.
    async fn get_items(
        &self,
        cursor: &str,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Page<Item>>;

    /// Which of `item_ids` are flagged hidden. Unknown ids are not hidden.
    async fn hidden_items(&self, item_ids: &[String]) -> Result<HashSet<String>>;

    // ---- Feedback ----

    /// Insert feedback. Referenced users and items are created when the
    /// options ask for it; otherwise orphaned feedback is stored as-is.
    async fn batch_insert_feedback(
        &self,
        feedback: &[Feedback],
        options: FeedbackInsertOptions,
    ) -> Result<()>;

    /// Feedback in key order, filtered by type (empty = any) and, when
    /// given, skipping records stamped after `time_limit`.
    async fn get_feedback(
        &self,
        cursor: &str,
        limit: usize,
        feedback_types: &[String],
        time_limit: Option<DateTime<Utc>>,
    ) -> Result<Page<Feedback>>;

    /// All feedback a user made, filtered by type (empty = any).
    async fn get_user_feedback(
        &self,
        user_id: &str,
        feedback_types: &[String],
    ) -> Result<Vec<Feedback>>;

    /// Feedback of any type between one user and one item.
    async fn get_user_item_feedback(&self, user_id: &str, item_id: &str) -> Result<Vec<Feedback>>;

    // ---- Administration ----

    async fn purge_users(&self) -> Result<()>;

    async fn purge_items(&self) -> Result<()>;

    async fn purge_feedback(&self) -> Result<()>;

    /// Remove every user, item and feedback record.
    async fn purge(&self) -> Result<()> {
        self.purge_feedback().await?;
        self.purge_items().await?;
        self.purge_users().await
    }
}

/// Open the dataset store named by a connection string.
pub fn open(url: &str) -> Result<Arc<dyn DataStore>> {
    match url.parse::<StoreUrl>()? {
        StoreUrl::Memory => Ok(Arc::new(MemoryDataStore::new())),
        StoreUrl::Redb(path) => Ok(Arc::new(RedbDataStore::open(&path)?)),
    }
}

pub(crate) fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid_argument(format!("{kind} id must not be empty")));
    }
    if id.contains('\0') {
        return Err(Error::invalid_argument(format!(
            "{kind} id {id:?} contains a NUL byte"
        )));
    }
    Ok(())
}

pub(crate) fn validate_feedback_key(key: &FeedbackKey) -> Result<()> {
    validate_id("user", &key.user_id)?;
    validate_id("item", &key.item_id)?;
    if key.feedback_type.contains('\0') {
        return Err(Error::invalid_argument("feedback type contains a NUL byte"));
    }
    Ok(())
}

/// Storage key of a feedback record: `type\x00user\x00item`.
pub(crate) fn feedback_key(key: &FeedbackKey) -> String {
    format!("{}\x00{}\x00{}", key.feedback_type, key.user_id, key.item_id)
}

pub(crate) fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(Error::invalid_argument("page limit must be positive"));
    }
    Ok(())
}

pub(crate) fn encode_cursor(key: &str) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Last key of the previous page, `None` for an empty cursor.
pub(crate) fn decode_cursor(cursor: &str) -> Result<Option<String>> {
    if cursor.is_empty() {
        return Ok(None);
    }
    let bytes = STANDARD
        .decode(cursor)
        .map_err(|e| Error::invalid_argument(format!("malformed cursor: {e}")))?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| Error::invalid_argument(format!("malformed cursor: {e}")))
}

/// Turn up to `limit` keyed rows into a page. A short page is the last one.
pub(crate) fn finish_page<T>(rows: Vec<(String, T)>, limit: usize) -> Page<T> {
    let next = match rows.last() {
        Some((key, _)) if rows.len() >= limit => encode_cursor(key),
        _ => String::new(),
    };
    (next, rows.into_iter().map(|(_, row)| row).collect())
}

pub(crate) fn type_matches(feedback_types: &[String], feedback_type: &str) -> bool {
    feedback_types.is_empty() || feedback_types.iter().any(|t| t == feedback_type)
}

pub(crate) fn within_time_limit(feedback: &Feedback, time_limit: Option<DateTime<Utc>>) -> bool {
    time_limit.is_none_or(|limit| feedback.timestamp <= limit)
}

#[cfg(test)]
mod contract;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trip() {
        assert_eq!(decode_cursor("").unwrap(), None);
        let cursor = encode_cursor("like\x00u1\x00i1");
        assert_eq!(
            decode_cursor(&cursor).unwrap().as_deref(),
            Some("like\x00u1\x00i1")
        );
        assert!(matches!(
            decode_cursor("!!not base64"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_finish_page() {
        let rows = vec![("a".to_string(), 1), ("b".to_string(), 2)];
        let (next, page) = finish_page(rows.clone(), 2);
        assert_eq!(page, vec![1, 2]);
        assert_eq!(decode_cursor(&next).unwrap().as_deref(), Some("b"));

        let (next, page) = finish_page(rows, 3);
        assert_eq!(page.len(), 2);
        assert!(next.is_empty());
    }

    #[test]
    fn test_validate_ids() {
        assert!(validate_id("user", "u1").is_ok());
        assert!(validate_id("user", "").is_err());
        assert!(validate_feedback_key(&FeedbackKey::new("like", "u", "i\0")).is_err());
        assert_eq!(
            feedback_key(&FeedbackKey::new("like", "u", "i")),
            "like\x00u\x00i"
        );
    }
}
