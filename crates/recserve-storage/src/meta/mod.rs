//! Node registry: one record per cluster member, refreshed by heartbeats.

mod memory;
mod redb_store;

pub use memory::MemoryNodeRegistry;
pub use redb_store::RedbNodeRegistry;

use crate::url::StoreUrl;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use recserve_common::{Error, NodeRecord, NodeRole, Result};
use std::sync::Arc;

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert or refresh a node. `last_seen` never moves backwards.
    async fn upsert_node(&self, node: NodeRecord) -> Result<()>;

    async fn get_node(&self, id: &str) -> Result<NodeRecord>;

    /// Every node, ordered by id.
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>>;

    /// Forget every node.
    async fn purge(&self) -> Result<()>;
}

/// Open the node registry named by a connection string.
pub fn open(url: &str) -> Result<Arc<dyn NodeRegistry>> {
    match url.parse::<StoreUrl>()? {
        StoreUrl::Memory => Ok(Arc::new(MemoryNodeRegistry::new())),
        StoreUrl::Redb(path) => Ok(Arc::new(RedbNodeRegistry::open(&path)?)),
    }
}

pub(crate) fn validate_node(node: &NodeRecord) -> Result<()> {
    if node.id.is_empty() {
        return Err(Error::invalid_argument("node id must not be empty"));
    }
    Ok(())
}

/// Cluster membership split by heartbeat freshness.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterView {
    pub live: Vec<NodeRecord>,
    pub stale: Vec<NodeRecord>,
}

impl ClusterView {
    /// Nodes seen within `timeout` of `now` are live.
    #[must_use]
    pub fn new(nodes: Vec<NodeRecord>, now: DateTime<Utc>, timeout: Duration) -> Self {
        let (live, stale) = nodes
            .into_iter()
            .partition(|node| now - node.last_seen <= timeout);
        Self { live, stale }
    }

    /// Live nodes with the given role.
    pub fn live_with_role(&self, role: NodeRole) -> impl Iterator<Item = &NodeRecord> {
        self.live.iter().filter(move |node| node.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn node(id: &str, role: NodeRole, last_seen: DateTime<Utc>) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            hostname: format!("{id}.local"),
            role,
            version: "v1".to_string(),
            last_seen,
        }
    }

    pub(crate) async fn registry_contract(registry: &dyn NodeRegistry) {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = t1 + Duration::minutes(5);

        assert!(registry.get_node("w2").await.unwrap_err().is_not_found());
        registry.upsert_node(node("w2", NodeRole::Worker, t2)).await.unwrap();
        registry.upsert_node(node("s1", NodeRole::Server, t1)).await.unwrap();
        registry.upsert_node(node("w1", NodeRole::Worker, t1)).await.unwrap();

        // stale heartbeat updates fields but not last_seen
        let mut late = node("w2", NodeRole::Worker, t1);
        late.version = "v2".to_string();
        registry.upsert_node(late).await.unwrap();
        let w2 = registry.get_node("w2").await.unwrap();
        assert_eq!(w2.version, "v2");
        assert_eq!(w2.last_seen, t2);

        let ids: Vec<String> = registry
            .list_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["s1", "w1", "w2"]);

        assert!(matches!(
            registry.upsert_node(node("", NodeRole::Server, t1)).await,
            Err(Error::InvalidArgument(_))
        ));

        registry.purge().await.unwrap();
        assert!(registry.list_nodes().await.unwrap().is_empty());
    }

    #[test]
    fn test_cluster_view_split() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let view = ClusterView::new(
            vec![
                node("a", NodeRole::Server, now - Duration::seconds(10)),
                node("b", NodeRole::Worker, now - Duration::seconds(30)),
                node("c", NodeRole::Worker, now - Duration::minutes(5)),
            ],
            now,
            Duration::seconds(60),
        );
        assert_eq!(view.live.len(), 2);
        assert_eq!(view.stale[0].id, "c");
        assert_eq!(view.live_with_role(NodeRole::Worker).count(), 1);
    }
}
