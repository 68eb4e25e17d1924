//! Configuration types for recserve
//!
//! This module defines configuration structures used across components.
//! Every section has defaults so a partial TOML file is enough.

use serde::{Deserialize, Serialize};

/// Root configuration for recserve
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage endpoints
    pub database: DatabaseConfig,
    /// Recommendation retrieval
    pub recommend: RecommendConfig,
    /// Dump / restore
    pub snapshot: SnapshotConfig,
    /// Cluster view
    pub cluster: ClusterConfig,
    /// Logging
    pub logging: LoggingConfig,
}

/// Connection strings for the three storage endpoints.
///
/// Supported schemes: `memory://` and `redb://<path>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Node registry
    pub meta_store: String,
    /// Users, items and feedback
    pub data_store: String,
    /// Scalars, sets, ranked lists and time series
    pub cache_store: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            meta_store: "redb:///var/lib/recserve/meta.redb".to_string(),
            data_store: "redb:///var/lib/recserve/data.redb".to_string(),
            cache_store: "redb:///var/lib/recserve/cache.redb".to_string(),
        }
    }
}

/// Recommendation retrieval configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    /// Sources consulted, in order, by the fallback scenario
    pub fallback: Vec<String>,
    /// Feedback types counted as positive (drives the rates view)
    pub positive_feedback_types: Vec<String>,
    /// Entries read from a ranked list per round trip while filtering
    pub fetch_chunk: usize,
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            fallback: vec!["latest".to_string()],
            positive_feedback_types: Vec::new(),
            fetch_chunk: 100,
        }
    }
}

/// Dump / restore configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Records per page when reading, and per batch insert when restoring
    pub batch_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { batch_size: 10_000 }
    }
}

/// Cluster view configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// A node is considered gone after this long without a heartbeat
    pub heartbeat_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
