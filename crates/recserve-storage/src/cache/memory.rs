//! Process-local cache backend

use super::shapes::{RankedList, Series};
use super::{CacheShape, CacheStore, bucket_key, collection_prefix, validate_key};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use recserve_common::{
    Bucket, Error, Pagination, Result, ScorePatch, ScoredItem, TimeSeriesPoint, Value,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// In-memory cache, one lock per shape
pub struct MemoryCache {
    values: RwLock<HashMap<String, Value>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
    /// Keyed by `collection\x00subset` so a collection's buckets are contiguous
    scores: RwLock<BTreeMap<String, RankedList>>,
    series: RwLock<HashMap<String, Series>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            scores: RwLock::new(BTreeMap::new()),
            series: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Value> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("cache value {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<()> {
        validate_key(key)?;
        if members.is_empty() {
            return Ok(());
        }
        self.sets
            .write()
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn set_set(&self, key: &str, members: &[String]) -> Result<()> {
        validate_key(key)?;
        let mut sets = self.sets.write();
        if members.is_empty() {
            sets.remove(key);
        } else {
            sets.insert(key.to_string(), members.iter().cloned().collect());
        }
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<()> {
        let mut sets = self.sets.write();
        if let Some(set) = sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn get_set(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .read()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_set(&self, key: &str) -> Result<()> {
        self.sets.write().remove(key);
        Ok(())
    }

    async fn add_scores(&self, bucket: &Bucket, items: &[ScoredItem]) -> Result<()> {
        bucket.validate()?;
        RankedList::check_batch(items)?;
        if items.is_empty() {
            return Ok(());
        }
        self.scores
            .write()
            .entry(bucket_key(bucket))
            .or_default()
            .upsert(items);
        Ok(())
    }

    async fn search_scores(
        &self,
        bucket: &Bucket,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<ScoredItem>> {
        bucket.validate()?;
        Ok(self
            .scores
            .read()
            .get(&bucket_key(bucket))
            .map(|list| list.search(categories, page))
            .unwrap_or_default())
    }

    async fn update_scores(
        &self,
        collections: &[String],
        id: &str,
        patch: &ScorePatch,
    ) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let mut scores = self.scores.write();
        for collection in collections {
            let prefix = collection_prefix(collection);
            for (_, list) in scores
                .range_mut(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
            {
                list.patch(id, patch);
            }
        }
        Ok(())
    }

    async fn delete_scores(&self, bucket: &Bucket, ids: &[String]) -> Result<()> {
        bucket.validate()?;
        let key = bucket_key(bucket);
        let mut scores = self.scores.write();
        if let Some(list) = scores.get_mut(&key) {
            list.remove(ids);
            if list.is_empty() {
                scores.remove(&key);
            }
        }
        Ok(())
    }

    async fn add_time_series_points(&self, points: &[TimeSeriesPoint]) -> Result<()> {
        for point in points {
            validate_key(&point.name)?;
        }
        let mut series = self.series.write();
        for point in points {
            series
                .entry(point.name.clone())
                .or_default()
                .upsert(point.timestamp, point.value);
        }
        Ok(())
    }

    async fn query_time_series(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        Ok(self
            .series
            .read()
            .get(name)
            .map(|s| s.since(name, since))
            .unwrap_or_default())
    }

    async fn prune_time_series(&self, name: &str, before: DateTime<Utc>) -> Result<()> {
        let mut series = self.series.write();
        if let Some(s) = series.get_mut(name) {
            s.prune(before);
            if s.is_empty() {
                series.remove(name);
            }
        }
        Ok(())
    }

    async fn purge_shape(&self, shape: CacheShape) -> Result<()> {
        match shape {
            CacheShape::Values => self.values.write().clear(),
            CacheShape::Sets => self.sets.write().clear(),
            CacheShape::Scores => self.scores.write().clear(),
            CacheShape::TimeSeries => self.series.write().clear(),
        }
        Ok(())
    }
}
