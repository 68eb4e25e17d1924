//! Snapshot & purge coordinator
//!
//! Dump, restore and purge span the node registry, the dataset store and
//! the cache store. None of them is atomic across stores: a cancelled
//! restore leaves what it already wrote, and purge reports each target's
//! outcome separately.

use crate::codec::{DumpReader, DumpWriter, Record};
use derive_more::Display;
use recserve_common::config::SnapshotConfig;
use recserve_common::{Error, Feedback, FeedbackInsertOptions, Item, Result, TargetFailure, User};
use recserve_storage::{CacheShape, Stores};
use serde::Serialize;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-kind record counts of a dump or restore.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    pub nodes: usize,
    pub users: usize,
    pub items: usize,
    pub feedback: usize,
}

/// Something a purge can delete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum PurgeTarget {
    #[display("delete_users")]
    Users,
    #[display("delete_items")]
    Items,
    #[display("delete_feedback")]
    Feedback,
    #[display("delete_cache")]
    Cache,
    #[display("delete_meta")]
    Meta,
}

impl FromStr for PurgeTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "delete_users" => Ok(Self::Users),
            "delete_items" => Ok(Self::Items),
            "delete_feedback" => Ok(Self::Feedback),
            "delete_cache" => Ok(Self::Cache),
            "delete_meta" => Ok(Self::Meta),
            other => Err(Error::invalid_argument(format!(
                "unknown purge target {other:?}"
            ))),
        }
    }
}

impl PurgeTarget {
    /// Parse a comma-separated check list such as
    /// `delete_users,delete_items`. Repeated names collapse to one target.
    pub fn parse_list(check_list: &str) -> Result<Vec<Self>> {
        let mut targets = Vec::new();
        for name in check_list.split(',').filter(|s| !s.trim().is_empty()) {
            let target: Self = name.parse()?;
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
        if targets.is_empty() {
            return Err(Error::invalid_argument("no purge target selected"));
        }
        Ok(targets)
    }
}

/// Buffered restore batch; flushed when full or when the record kind changes.
enum Batch {
    Empty,
    Users(Vec<User>),
    Items(Vec<Item>),
    Feedback(Vec<Feedback>),
}

impl Batch {
    fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Users(v) => v.len(),
            Self::Items(v) => v.len(),
            Self::Feedback(v) => v.len(),
        }
    }
}

/// Runs administrative operations across all three stores
pub struct Coordinator {
    stores: Stores,
    batch_size: usize,
}

impl Coordinator {
    pub fn new(stores: Stores, config: &SnapshotConfig) -> Self {
        Self {
            stores,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Stream every node, user, item and feedback record into `sink`.
    ///
    /// Only restartable from the beginning. Returns the sink after the end
    /// frame has been written.
    pub async fn dump<W: AsyncWrite + Unpin + Send>(
        &self,
        sink: W,
        cancel: &CancellationToken,
    ) -> Result<(W, RecordCounts)> {
        let mut writer = DumpWriter::start(sink).await?;
        let mut counts = RecordCounts::default();

        for node in self.stores.meta.list_nodes().await? {
            writer.write(&Record::Node(node)).await?;
            counts.nodes += 1;
        }
        info!("Dumped {} nodes", counts.nodes);

        let data = &self.stores.data;
        let mut cursor = String::new();
        loop {
            check_cancelled(cancel)?;
            let (next, users) = data.get_users(&cursor, self.batch_size).await?;
            counts.users += users.len();
            for user in users {
                writer.write(&Record::User(user)).await?;
            }
            if next.is_empty() {
                break;
            }
            cursor = next;
        }
        info!("Dumped {} users", counts.users);

        cursor.clear();
        loop {
            check_cancelled(cancel)?;
            let (next, items) = data.get_items(&cursor, self.batch_size, None).await?;
            counts.items += items.len();
            for item in items {
                writer.write(&Record::Item(item)).await?;
            }
            if next.is_empty() {
                break;
            }
            cursor = next;
        }
        info!("Dumped {} items", counts.items);

        cursor.clear();
        loop {
            check_cancelled(cancel)?;
            let (next, feedback) = data
                .get_feedback(&cursor, self.batch_size, &[], None)
                .await?;
            counts.feedback += feedback.len();
            for f in feedback {
                writer.write(&Record::Feedback(f)).await?;
            }
            if next.is_empty() {
                break;
            }
            cursor = next;
        }
        info!("Dumped {} feedback", counts.feedback);

        let sink = writer.finish().await?;
        Ok((sink, counts))
    }

    /// Insert every record of a dump stream.
    ///
    /// Additive: existing state is kept and records with the same identity
    /// are overwritten. Feedback is inserted without creating users or
    /// items, since the stream carries those itself.
    pub async fn restore<R: AsyncRead + Unpin + Send>(
        &self,
        source: R,
        cancel: &CancellationToken,
    ) -> Result<RecordCounts> {
        let mut reader = DumpReader::open(source).await?;
        let mut counts = RecordCounts::default();
        let mut batch = Batch::Empty;

        while let Some(record) = reader.next().await? {
            check_cancelled(cancel)?;
            batch = match (batch, record) {
                (batch, Record::Node(node)) => {
                    self.flush(batch, &mut counts).await?;
                    self.stores.meta.upsert_node(node).await?;
                    counts.nodes += 1;
                    Batch::Empty
                }
                (Batch::Users(mut users), Record::User(user)) => {
                    users.push(user);
                    Batch::Users(users)
                }
                (Batch::Items(mut items), Record::Item(item)) => {
                    items.push(item);
                    Batch::Items(items)
                }
                (Batch::Feedback(mut feedback), Record::Feedback(f)) => {
                    feedback.push(f);
                    Batch::Feedback(feedback)
                }
                (batch, record) => {
                    self.flush(batch, &mut counts).await?;
                    match record {
                        Record::User(user) => Batch::Users(vec![user]),
                        Record::Item(item) => Batch::Items(vec![item]),
                        Record::Feedback(f) => Batch::Feedback(vec![f]),
                        Record::Node(_) => Batch::Empty,
                    }
                }
            };
            if batch.len() >= self.batch_size {
                self.flush(batch, &mut counts).await?;
                batch = Batch::Empty;
            }
        }
        self.flush(batch, &mut counts).await?;

        info!(
            "Restored {} nodes, {} users, {} items, {} feedback",
            counts.nodes, counts.users, counts.items, counts.feedback
        );
        Ok(counts)
    }

    async fn flush(&self, batch: Batch, counts: &mut RecordCounts) -> Result<()> {
        let data = &self.stores.data;
        match batch {
            Batch::Empty => {}
            Batch::Users(users) => {
                data.batch_insert_users(&users).await?;
                counts.users += users.len();
            }
            Batch::Items(items) => {
                data.batch_insert_items(&items).await?;
                counts.items += items.len();
            }
            Batch::Feedback(feedback) => {
                let options = FeedbackInsertOptions {
                    insert_user: false,
                    insert_item: false,
                    overwrite: true,
                };
                data.batch_insert_feedback(&feedback, options).await?;
                counts.feedback += feedback.len();
            }
        }
        Ok(())
    }

    /// Delete the selected targets one after another.
    ///
    /// A failing target does not stop the rest. Once `cancel` fires, the
    /// targets not yet attempted are reported as cancelled. Succeeds only if
    /// every target succeeded; otherwise returns a `PartialFailure` naming
    /// each failed target.
    pub async fn purge(&self, targets: &[PurgeTarget], cancel: &CancellationToken) -> Result<()> {
        let mut failures = Vec::new();
        for &target in targets {
            if cancel.is_cancelled() {
                failures.push(TargetFailure::new(target.to_string(), "cancelled"));
                continue;
            }
            match self.purge_target(target).await {
                Ok(()) => info!("Purge target {} done", target),
                Err(e) => {
                    warn!("Purge target {} failed: {}", target, e);
                    failures.push(TargetFailure::new(target.to_string(), e.to_string()));
                }
            }
        }
        Error::from_failures(failures)
    }

    async fn purge_target(&self, target: PurgeTarget) -> Result<()> {
        match target {
            PurgeTarget::Users => self.stores.data.purge_users().await,
            PurgeTarget::Items => self.stores.data.purge_items().await,
            PurgeTarget::Feedback => self.stores.data.purge_feedback().await,
            PurgeTarget::Cache => self.stores.cache.purge(&CacheShape::ALL).await,
            PurgeTarget::Meta => self.stores.meta.purge().await,
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
