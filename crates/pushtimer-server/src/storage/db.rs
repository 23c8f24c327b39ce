//! Per-partition `SQLite` cell.

use std::path::{Path, PathBuf};

use sqlx::{Pool, Sqlite};
use tracing::debug;

use pushtimer_core::db::{DatabaseError, open_pool, open_pool_in_memory};

use crate::partition::PartitionKey;

/// Subdirectory of the data dir that holds one database file per partition.
const PARTITIONS_DIR: &str = "partitions";
const DB_EXTENSION: &str = "db";

/// Durable storage owned by exactly one partition actor.
///
/// Opening a `PartitionDb` does not touch the schema; the owning actor calls
/// [`PartitionDb::ensure_schema`] once per activation before any read or
/// write.
#[derive(Clone)]
pub struct PartitionDb {
    pool: Pool<Sqlite>,
}

impl PartitionDb {
    /// Open (or create) the database file for `key` under `data_dir`.
    pub async fn open(data_dir: &Path, key: &PartitionKey) -> Result<Self, DatabaseError> {
        let path = partition_path(data_dir, key);
        let pool = open_pool(&path).await?;
        debug!(key = %key, path = %path.display(), "Partition database opened");
        Ok(Self { pool })
    }

    /// Open a private in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let pool = open_pool_in_memory().await?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool, waiting for the connection to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Location of the database file for `key`.
pub fn partition_path(data_dir: &Path, key: &PartitionKey) -> PathBuf {
    data_dir
        .join(PARTITIONS_DIR)
        .join(key.file_stem())
        .with_extension(DB_EXTENSION)
}

/// Delete the database file for `key` along with its WAL sidecars. The
/// partition must be closed. Missing files are not an error.
pub fn remove_partition(data_dir: &Path, key: &PartitionKey) -> Result<(), DatabaseError> {
    let path = partition_path(data_dir, key);
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.clone().into_os_string();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DatabaseError::Io(e.to_string())),
        }
    }
    Ok(())
}

/// Keys of every partition that has a database file under `data_dir`.
///
/// Files whose names do not decode to a valid key are skipped.
pub fn list_partitions(data_dir: &Path) -> Result<Vec<PartitionKey>, DatabaseError> {
    let dir = data_dir.join(PARTITIONS_DIR);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DatabaseError::Io(e.to_string())),
    };

    let mut keys = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DatabaseError::Io(e.to_string()))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match PartitionKey::from_file_stem(stem) {
            Ok(key) => keys.push(key),
            Err(e) => debug!(file = %path.display(), error = %e, "Skipping unrecognised file"),
        }
    }
    keys.sort();
    Ok(keys)
}
