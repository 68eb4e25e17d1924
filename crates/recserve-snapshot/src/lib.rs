//! Recserve Snapshot - administrative operations across all three stores
//!
//! - [`codec`]: the self-describing dump stream
//! - [`coordinator`]: dump, restore and purge

pub mod codec;
pub mod coordinator;

pub use codec::{DumpReader, DumpWriter, Record};
pub use coordinator::{Coordinator, PurgeTarget, RecordCounts};
