//! Redb table definitions for the persistent backends.
//!
//! Each store opens its own database file, so only the tables for that
//! store are created in it.

use redb::{MultimapTableDefinition, TableDefinition};

// Cache
// Key: scalar key, Value: bincode-encoded Value
pub const CACHE_VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_values");
// Key: set key, Values: members
pub const CACHE_SETS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("cache_sets");
// Key: "collection\x00subset", Value: bincode-encoded Vec<ScoredItem> in insertion order
pub const CACHE_SCORES: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_scores");
// Key: series name, Value: bincode-encoded BTreeMap<timestamp, value>
pub const CACHE_TIME_SERIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("cache_time_series");

// Dataset
// Key: user_id, Value: JSON(User)
pub const DATA_USERS: TableDefinition<&str, &str> = TableDefinition::new("data_users");
// Key: item_id, Value: JSON(Item)
pub const DATA_ITEMS: TableDefinition<&str, &str> = TableDefinition::new("data_items");
// Key: "type\x00user\x00item", Value: JSON(Feedback)
pub const DATA_FEEDBACK: TableDefinition<&str, &str> = TableDefinition::new("data_feedback");
// Key: user_id, Values: feedback keys
pub const DATA_USER_FEEDBACK: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("data_user_feedback");
// Key: item_id, Values: feedback keys
pub const DATA_ITEM_FEEDBACK: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("data_item_feedback");

// Cluster
// Key: node id, Value: bincode-encoded NodeRecord
pub const META_NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("meta_nodes");
