//! Redb-backed node registry

use super::{NodeRegistry, validate_node};
use crate::kv::{self, StoreResult};
use crate::tables::META_NODES;
use async_trait::async_trait;
use recserve_common::{Error, NodeRecord, Result};
use redb::{Database, ReadableTable};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Persistent node registry, one bincode record per node id
pub struct RedbNodeRegistry {
    db: Arc<Database>,
}

impl RedbNodeRegistry {
    /// Open or create the registry database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = kv::open_database(path)?;
        let registry = Self { db: Arc::new(db) };
        registry.init_tables()?;
        info!("Node registry opened at {}", path.display());
        Ok(registry)
    }

    fn init_tables(&self) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(META_NODES)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Merge with the stored record inside one write transaction.
    fn merge_node(&self, node: NodeRecord) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META_NODES)?;
            let merged = match table.get(node.id.as_str())? {
                Some(raw) => {
                    let mut existing: NodeRecord = bincode::deserialize(raw.value())?;
                    existing.merge(node);
                    existing
                }
                None => node,
            };
            let bytes = bincode::serialize(&merged)?;
            table.insert(merged.id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl NodeRegistry for RedbNodeRegistry {
    fn name(&self) -> &'static str {
        "redb"
    }

    async fn upsert_node(&self, node: NodeRecord) -> Result<()> {
        validate_node(&node)?;
        self.merge_node(node)?;
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<NodeRecord> {
        kv::get_bincode(&self.db, META_NODES, id)?
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        // redb iterates in key order
        let rows = kv::load_bincode_table::<NodeRecord>(&self.db, META_NODES)?;
        Ok(rows.into_iter().map(|(_, node)| node).collect())
    }

    async fn purge(&self) -> Result<()> {
        kv::reset_table(&self.db, META_NODES)?;
        Ok(())
    }
}
