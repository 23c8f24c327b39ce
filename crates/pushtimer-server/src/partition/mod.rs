//! Keyed partition actors.
//!
//! Every partition key is served by exactly one live actor task at a time.
//! The actor owns the partition's database and processes its mailbox one
//! command at a time, interleaved with its own alarm firings. The
//! [`PartitionRouter`] creates actors on first use, retires idle ones and
//! re-creates them on demand.

mod actor;
mod key;
mod router;

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::storage::{ArmOutcome, DatabaseError};

pub use key::{InvalidKey, MAX_KEY_BYTES, PartitionKey};
pub use router::PartitionRouter;

/// Where partition databases live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// One `SQLite` file per partition under this data directory.
    Disk(PathBuf),
    /// A private in-memory database per actor. State is lost when the actor
    /// stops, so idle eviction is disabled.
    Memory,
}

/// Runtime settings shared by all partition actors.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub storage: StorageLocation,
    /// Delay between the first registration and the delivery attempt.
    pub delay: Duration,
    /// How long an actor without a pending alarm may sit idle.
    pub idle_timeout: Option<Duration>,
    pub mailbox_capacity: usize,
}

impl RouterSettings {
    pub const fn new(storage: StorageLocation, delay: Duration) -> Self {
        Self {
            storage,
            delay,
            idle_timeout: None,
            mailbox_capacity: 64,
        }
    }

    /// Idle timeout actually applied to actors.
    pub const fn effective_idle_timeout(&self) -> Option<Duration> {
        match self.storage {
            StorageLocation::Memory => None,
            StorageLocation::Disk(_) => self.idle_timeout,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("invalid partition key: {0}")]
    InvalidKey(#[from] InvalidKey),

    #[error("failed to activate partition: {0}")]
    Activation(DatabaseError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// The actor stopped before handling the command; callers retry on a
    /// fresh actor.
    #[error("partition actor retired")]
    Retired,

    #[error("partition router is shut down")]
    ShutDown,
}

/// Result of registering a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub alarm: ArmOutcome,
}

/// Snapshot of a partition's durable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionStatus {
    pub subscribed: bool,
    pub alarm_at_ms: Option<i64>,
}
