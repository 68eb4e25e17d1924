//! Dataset entities: users, items and feedback.
//!
//! These are the records owned by the dataset store. Labels are free-form
//! JSON so they are persisted and dumped as JSON rather than bincode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user of the recommender.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub labels: serde_json::Value,
    #[serde(default)]
    pub comment: String,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// A recommendable item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    /// Hidden items are never returned as candidates or recommendations
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: serde_json::Value,
    #[serde(default)]
    pub comment: String,
}

impl Item {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            ..Self::default()
        }
    }
}

/// Partial update for an item; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemPatch {
    pub is_hidden: Option<bool>,
    pub categories: Option<Vec<String>>,
    pub timestamp: Option<DateTime<Utc>>,
    pub labels: Option<serde_json::Value>,
    pub comment: Option<String>,
}

impl ItemPatch {
    /// Patch that only flips the hidden flag.
    #[must_use]
    pub fn hidden(is_hidden: bool) -> Self {
        Self {
            is_hidden: Some(is_hidden),
            ..Self::default()
        }
    }

    pub fn apply(self, item: &mut Item) {
        if let Some(is_hidden) = self.is_hidden {
            item.is_hidden = is_hidden;
        }
        if let Some(categories) = self.categories {
            item.categories = categories;
        }
        if let Some(timestamp) = self.timestamp {
            item.timestamp = timestamp;
        }
        if let Some(labels) = self.labels {
            item.labels = labels;
        }
        if let Some(comment) = self.comment {
            item.comment = comment;
        }
    }
}

/// Identity of a feedback record. Ordered by type, then user, then item.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackKey {
    pub feedback_type: String,
    pub user_id: String,
    pub item_id: String,
}

impl FeedbackKey {
    pub fn new(
        feedback_type: impl Into<String>,
        user_id: impl Into<String>,
        item_id: impl Into<String>,
    ) -> Self {
        Self {
            feedback_type: feedback_type.into(),
            user_id: user_id.into(),
            item_id: item_id.into(),
        }
    }
}

/// A user's interaction with an item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(flatten)]
    pub key: FeedbackKey,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub comment: String,
}

impl Feedback {
    pub fn new(key: FeedbackKey) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }
}

/// Flags for `batch_insert_feedback`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackInsertOptions {
    /// Create missing users referenced by the feedback
    pub insert_user: bool,
    /// Create missing items referenced by the feedback
    pub insert_item: bool,
    /// Replace feedback whose key already exists
    pub overwrite: bool,
}

impl Default for FeedbackInsertOptions {
    fn default() -> Self {
        Self {
            insert_user: true,
            insert_item: true,
            overwrite: true,
        }
    }
}
