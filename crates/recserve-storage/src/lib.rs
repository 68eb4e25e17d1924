//! Recserve Storage - the three independently addressable stores
//!
//! - [`cache`]: scalars, sets, ranked score lists and time series
//! - [`data`]: users, items and feedback
//! - [`meta`]: cluster node registry
//!
//! Each store is a trait with an in-memory backend and a redb-backed one,
//! chosen by connection string (`memory://` or `redb://<path>`).

pub mod cache;
pub mod data;
pub mod kv;
pub mod meta;
pub mod tables;
pub mod url;

pub use cache::{CacheShape, CacheStore};
pub use data::DataStore;
pub use meta::NodeRegistry;
pub use url::StoreUrl;

use recserve_common::Result;
use recserve_common::config::DatabaseConfig;
use std::sync::Arc;

/// Handles to all three stores.
#[derive(Clone)]
pub struct Stores {
    pub meta: Arc<dyn NodeRegistry>,
    pub data: Arc<dyn DataStore>,
    pub cache: Arc<dyn CacheStore>,
}

impl Stores {
    /// Open every endpoint named in the configuration.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        Ok(Self {
            meta: meta::open(&config.meta_store)?,
            data: data::open(&config.data_store)?,
            cache: cache::open(&config.cache_store)?,
        })
    }

    /// Process-local stores, used by tests and single-node tooling.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            meta: Arc::new(meta::MemoryNodeRegistry::new()),
            data: Arc::new(data::MemoryDataStore::new()),
            cache: Arc::new(cache::MemoryCache::new()),
        }
    }
}
