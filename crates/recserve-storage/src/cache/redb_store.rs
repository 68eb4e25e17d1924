//! Redb-backed cache
//!
//! Scalars, ranked lists and series are bincode values; sets are a multimap
//! table. Every mutation is one write transaction, so a read-modify-write on
//! a bucket or series is atomic with respect to other writers.

use super::shapes::{RankedList, Series};
use super::{CacheShape, CacheStore, bucket_key, collection_prefix, validate_key};
use crate::kv::{self, StoreResult};
use crate::tables::{CACHE_SCORES, CACHE_SETS, CACHE_TIME_SERIES, CACHE_VALUES};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recserve_common::{
    Bucket, Error, Pagination, Result, ScorePatch, ScoredItem, TimeSeriesPoint, Value,
};
use redb::{Database, ReadableMultimapTable, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Persistent cache
pub struct RedbCache {
    db: Arc<Database>,
}

impl RedbCache {
    /// Open or create the cache database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = kv::open_database(path)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        info!("Cache store opened at {}", path.display());
        Ok(store)
    }

    fn init_tables(&self) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(CACHE_VALUES)?;
            let _ = write_txn.open_multimap_table(CACHE_SETS)?;
            let _ = write_txn.open_table(CACHE_SCORES)?;
            let _ = write_txn.open_table(CACHE_TIME_SERIES)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Decode, mutate and re-encode one bincode entry in a single transaction.
    /// Entries left empty by `f` are removed.
    fn modify<T, F>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
        f: F,
    ) -> StoreResult<()>
    where
        T: Default + serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce(&mut T) -> bool,
    {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(table_def)?;
            let mut value: T = match table.get(key)? {
                Some(raw) => bincode::deserialize(raw.value())?,
                None => T::default(),
            };
            if f(&mut value) {
                let bytes = bincode::serialize(&value)?;
                table.insert(key, bytes.as_slice())?;
            } else {
                table.remove(key)?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn set_members(&self, key: &str, members: &[String], replace: bool) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_multimap_table(CACHE_SETS)?;
            if replace {
                table.remove_all(key)?;
            }
            for member in members {
                table.insert(key, member.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove_members(&self, key: &str, members: &[String]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_multimap_table(CACHE_SETS)?;
            for member in members {
                table.remove(key, member.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(CACHE_SETS)?;
        let mut members = Vec::new();
        for member in table.get(key)? {
            members.push(member?.value().to_string());
        }
        members.sort();
        Ok(members)
    }

    /// All points land in one transaction.
    fn put_points(&self, points: &[TimeSeriesPoint]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TIME_SERIES)?;
            for point in points {
                let mut series: Series = match table.get(point.name.as_str())? {
                    Some(raw) => bincode::deserialize(raw.value())?,
                    None => Series::default(),
                };
                series.upsert(point.timestamp, point.value);
                let bytes = bincode::serialize(&series)?;
                table.insert(point.name.as_str(), bytes.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn patch_collections(
        &self,
        collections: &[String],
        id: &str,
        patch: &ScorePatch,
    ) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_SCORES)?;
            for collection in collections {
                let prefix = collection_prefix(collection);
                // Collect first; the table cannot be written while a range is open
                let mut changed = Vec::new();
                for entry in table.range(prefix.as_str()..)? {
                    let entry = entry?;
                    let key = entry.0.value();
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    let mut list: RankedList = bincode::deserialize(entry.1.value())?;
                    if list.patch(id, patch) {
                        changed.push((key.to_string(), bincode::serialize(&list)?));
                    }
                }
                for (key, bytes) in changed {
                    table.insert(key.as_str(), bytes.as_slice())?;
                }
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn purge_shape_sync(&self, shape: CacheShape) -> StoreResult<()> {
        match shape {
            CacheShape::Values => kv::reset_table(&self.db, CACHE_VALUES),
            CacheShape::Sets => kv::reset_multimap_table(&self.db, CACHE_SETS),
            CacheShape::Scores => kv::reset_table(&self.db, CACHE_SCORES),
            CacheShape::TimeSeries => kv::reset_table(&self.db, CACHE_TIME_SERIES),
        }
    }
}

#[async_trait]
impl CacheStore for RedbCache {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        kv::put_bincode(&self.db, CACHE_VALUES, key, &value)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Value> {
        kv::get_bincode(&self.db, CACHE_VALUES, key)?
            .ok_or_else(|| Error::not_found(format!("cache value {key}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        kv::delete_key(&self.db, CACHE_VALUES, key)?;
        Ok(())
    }

    async fn add_to_set(&self, key: &str, members: &[String]) -> Result<()> {
        validate_key(key)?;
        if members.is_empty() {
            return Ok(());
        }
        self.set_members(key, members, false)?;
        Ok(())
    }

    async fn set_set(&self, key: &str, members: &[String]) -> Result<()> {
        validate_key(key)?;
        self.set_members(key, members, true)?;
        Ok(())
    }

    async fn remove_from_set(&self, key: &str, members: &[String]) -> Result<()> {
        self.remove_members(key, members)?;
        Ok(())
    }

    async fn get_set(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.read_members(key)?)
    }

    async fn clear_set(&self, key: &str) -> Result<()> {
        self.set_members(key, &[], true)?;
        Ok(())
    }

    async fn add_scores(&self, bucket: &Bucket, items: &[ScoredItem]) -> Result<()> {
        bucket.validate()?;
        RankedList::check_batch(items)?;
        if items.is_empty() {
            return Ok(());
        }
        self.modify(CACHE_SCORES, &bucket_key(bucket), |list: &mut RankedList| {
            list.upsert(items);
            true
        })?;
        Ok(())
    }

    async fn search_scores(
        &self,
        bucket: &Bucket,
        categories: &[String],
        page: Pagination,
    ) -> Result<Vec<ScoredItem>> {
        bucket.validate()?;
        let list: Option<RankedList> =
            kv::get_bincode(&self.db, CACHE_SCORES, &bucket_key(bucket))?;
        Ok(list
            .map(|l| l.search(categories, page))
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
        self.patch_collections(collections, id, patch)?;
        Ok(())
    }

    async fn delete_scores(&self, bucket: &Bucket, ids: &[String]) -> Result<()> {
        bucket.validate()?;
        self.modify(CACHE_SCORES, &bucket_key(bucket), |list: &mut RankedList| {
            list.remove(ids);
            !list.is_empty()
        })?;
        Ok(())
    }

    async fn add_time_series_points(&self, points: &[TimeSeriesPoint]) -> Result<()> {
        for point in points {
            validate_key(&point.name)?;
        }
        self.put_points(points)?;
        Ok(())
    }

    async fn query_time_series(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let series: Option<Series> = kv::get_bincode(&self.db, CACHE_TIME_SERIES, name)?;
        Ok(series.map(|s| s.since(name, since)).unwrap_or_default())
    }

    async fn prune_time_series(&self, name: &str, before: DateTime<Utc>) -> Result<()> {
        self.modify(CACHE_TIME_SERIES, name, |series: &mut Series| {
            series.prune(before);
            !series.is_empty()
        })?;
        Ok(())
    }

    async fn purge_shape(&self, shape: CacheShape) -> Result<()> {
        self.purge_shape_sync(shape)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::contract;

    #[tokio::test]
    async fn test_redb_cache_contract() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RedbCache::open(&dir.path().join("cache.redb")).unwrap();
        contract::run_all(&cache).await;
    }

    #[tokio::test]
    async fn test_redb_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        {
            let cache = RedbCache::open(&path).unwrap();
            cache.set("k", Value::from(5)).await.unwrap();
            cache
                .add_scores(&Bucket::new("c", "s"), &[ScoredItem::new("a", 1.0)])
                .await
                .unwrap();
        }
        let cache = RedbCache::open(&path).unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Value::Integer(5));
        let items = cache
            .search_scores(&Bucket::new("c", "s"), &[], Pagination::all())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }
}
