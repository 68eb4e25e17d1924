//! Cache store: scalars, sets, ranked score lists and time series.
//!
//! One trait with shape-specific operations rather than a generic get/set,
//! so each shape keeps its own invariants:
//! - ranked lists are ordered by score descending at read time, ties in
//!   insertion order; re-adding an id overwrites it in place
//! - time-series points are upserted by `(name, timestamp)`
//!
//! Writes to different keys or buckets never touch each other's entries.

mod memory;
mod redb_store;
mod shapes;

pub use memory::MemoryCache;
pub use redb_store::RedbCache;
pub use shapes::{RankedList, Series};

use crate::url::StoreUrl;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recserve_common::{
    Bucket, Error, Pagination, Result, ScorePatch, ScoredItem, TargetFailure, TimeSeriesPoint,
    Value,
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A family of cache state that can be purged on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheShape {
    Values,
    Sets,
    Scores,
    TimeSeries,
}

impl CacheShape {
    pub const ALL: [Self; 4] = [Self::Values, Self::Sets, Self::Scores, Self::TimeSeries];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Sets => "sets",
            Self::Scores => "scores",
            Self::TimeSeries => "time_series",
        }
    }
}

impl fmt::Display for CacheShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-shape cache backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs ("memory", "redb")
    fn name(&self) -> &'static str;

    // ---- Scalars ----

    /// Overwrite a scalar.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Read a scalar. Missing keys fail with `NotFound`.
    async fn get(&self, key: &str) -> Result<Value>;

    /// Remove a scalar. Missing keys are a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    // ---- Sets ----

    /// Union `members` into the set; duplicates are no-ops.
    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<()>;

    /// Replace the set with exactly `members`.
    async fn set_set(&self, key: &str, members: &[String]) -> Result<()>;

    async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<()>;

    /// Members in lexical order. A missing set is empty.
    async fn get_set(&self, key: &str) -> Result<Vec<String>>;

    async fn clear_set(&self, key: &str) -> Result<()>;

    // ---- Ranked lists ----

    /// Insert or overwrite entries of one bucket. Ids must be unique within
    /// the call.
    async fn add_scores(&self, bucket: &Bucket, items: &[ScoredItem]) -> Result<()>;

    /// Entries of `bucket` carrying any of `categories` (empty = all), by
    /// score descending, then windowed by `page`. A missing bucket is empty.
    async fn search_scores(
        &self,
        bucket: &Bucket,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<ScoredItem>>;

    /// Patch entry `id` in every bucket of the given collections.
    async fn update_scores(&self, collections: &[String], id: &str, patch: &ScorePatch)
    -> Result<()>;

    /// Remove entries from one bucket.
    async fn delete_scores(&self, bucket: &Bucket, ids: &[String]) -> Result<()>;

    // ---- Time series ----

    /// Upsert points; for a repeated `(name, timestamp)` the last one applied
    /// wins.
    async fn add_time_series_points(&self, points: &[TimeSeriesPoint]) -> Result<()>;

    /// Points of `name` at or after `since`, ascending by timestamp.
    async fn query_time_series(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesPoint>>;

    /// Drop points of `name` older than `before`.
    async fn prune_time_series(&self, name: &str, before: DateTime<Utc>) -> Result<()>;

    // ---- Administration ----

    /// Delete every entry of one shape.
    async fn purge_shape(&self, shape: CacheShape) -> Result<()>;

    /// Purge each selected shape independently.
    ///
    /// Not atomic across shapes: a failing shape does not stop the others,
    /// and the failures come back as a `PartialFailure`.
    async fn purge(&self, shapes: &[CacheShape]) -> Result<()> {
        let mut failures = Vec::new();
        for &shape in shapes {
            match self.purge_shape(shape).await {
                Ok(()) => info!("Purged cache {} ({})", shape, self.name()),
                Err(e) => {
                    warn!("Failed to purge cache {}: {}", shape, e);
                    failures.push(TargetFailure::new(shape.as_str(), e.to_string()));
                }
            }
        }
        Error::from_failures(failures)
    }
}

/// Open the cache store named by a connection string.
pub fn open(url: &str) -> Result<Arc<dyn CacheStore>> {
    match url.parse::<StoreUrl>()? {
        StoreUrl::Memory => Ok(Arc::new(MemoryCache::new())),
        StoreUrl::Redb(path) => Ok(Arc::new(RedbCache::open(&path)?)),
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument("cache key must not be empty"));
    }
    Ok(())
}

/// Storage key for a bucket: `collection\x00subset`.
pub(crate) fn bucket_key(bucket: &Bucket) -> String {
    format!("{}\x00{}", bucket.collection, bucket.subset)
}

/// Prefix shared by every bucket of a collection.
pub(crate) fn collection_prefix(collection: &str) -> String {
    format!("{collection}\x00")
}

#[cfg(test)]
mod contract;
