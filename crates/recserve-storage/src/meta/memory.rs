//! Process-local node registry

use super::{NodeRegistry, validate_node};
use async_trait::async_trait;
use parking_lot::RwLock;
use recserve_common::{Error, NodeRecord, Result};
use std::collections::BTreeMap;

/// In-memory node registry
pub struct MemoryNodeRegistry {
    nodes: RwLock<BTreeMap<String, NodeRecord>>,
}

impl Default for MemoryNodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl NodeRegistry for MemoryNodeRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert_node(&self, node: NodeRecord) -> Result<()> {
        validate_node(&node)?;
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&node.id) {
            Some(existing) => existing.merge(node),
            None => {
                nodes.insert(node.id.clone(), node);
            }
        }
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<NodeRecord> {
        self.nodes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes.read().values().cloned().collect())
    }

    async fn purge(&self) -> Result<()> {
        self.nodes.write().clear();
        Ok(())
    }
}
