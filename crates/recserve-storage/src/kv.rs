//! Shared plumbing for the redb-backed stores.
//!
//! Backends do their work in `StoreResult` and convert to the common error
//! at the trait boundary: redb and io failures surface as
//! `BackendUnavailable`, codec failures as (de)serialization errors.

use recserve_common::Error;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::debug;

/// Error type for persistent store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    NotFound(String),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Bincode(e) => Self::Deserialization(e.to_string()),
            StoreError::Json(e) if e.is_data() || e.is_syntax() || e.is_eof() => {
                Self::Deserialization(e.to_string())
            }
            StoreError::Json(e) => Self::Serialization(e.to_string()),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Open (or create) the redb database at the given path.
pub fn open_database(path: &Path) -> StoreResult<Database> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    debug!("Opening redb database at {}", path.display());
    Ok(Database::create(path)?)
}

/// Read and bincode-decode one entry.
pub fn get_bincode<T: serde::de::DeserializeOwned>(
    db: &Database,
    table_def: TableDefinition<&str, &[u8]>,
    key: &str,
) -> StoreResult<Option<T>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table_def)?;
    match table.get(key)? {
        Some(val) => Ok(Some(bincode::deserialize(val.value())?)),
        None => Ok(None),
    }
}

/// Bincode-encode and write one entry in its own transaction.
pub fn put_bincode<T: serde::Serialize>(
    db: &Database,
    table_def: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    let bytes = bincode::serialize(value)?;
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(table_def)?;
        table.insert(key, bytes.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Remove one entry. Missing keys are not an error.
pub fn delete_key<V: redb::Value + 'static>(
    db: &Database,
    table_def: TableDefinition<&str, V>,
    key: &str,
) -> StoreResult<()> {
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(table_def)?;
        table.remove(key)?;
    }
    write_txn.commit()?;
    Ok(())
}

/// Decode every entry of a bincode table. One undecodable entry fails the
/// whole load.
pub fn load_bincode_table<T: serde::de::DeserializeOwned>(
    db: &Database,
    table_def: TableDefinition<&str, &[u8]>,
) -> StoreResult<Vec<(String, T)>> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(table_def)?;
    let mut result = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        let key = entry.0.value().to_string();
        match bincode::deserialize::<T>(entry.1.value()) {
            Ok(val) => result.push((key, val)),
            Err(e) => {
                tracing::error!("Failed to decode entry '{}': {}", key, e);
                return Err(e.into());
            }
        }
    }
    Ok(result)
}

/// Drop a table and recreate it empty inside one transaction.
pub fn reset_table<K: redb::Key + 'static, V: redb::Value + 'static>(
    db: &Database,
    table_def: TableDefinition<K, V>,
) -> StoreResult<()> {
    let write_txn = db.begin_write()?;
    write_txn.delete_table(table_def)?;
    write_txn.open_table(table_def)?;
    write_txn.commit()?;
    Ok(())
}

/// Multimap counterpart of [`reset_table`].
pub fn reset_multimap_table<K: redb::Key + 'static, V: redb::Key + 'static>(
    db: &Database,
    table_def: redb::MultimapTableDefinition<K, V>,
) -> StoreResult<()> {
    let write_txn = db.begin_write()?;
    write_txn.delete_multimap_table(table_def)?;
    write_txn.open_multimap_table(table_def)?;
    write_txn.commit()?;
    Ok(())
}
