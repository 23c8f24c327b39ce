//! `SQLite` storage for pushtimer partitions.
//!
//! Each partition key owns one database file holding its subscription
//! record and its wake-up slot. Query methods are grouped by concern:
//! schema upkeep, subscriptions and the alarm.

mod db;
mod models;
mod queries_alarm;
mod queries_subscriptions;
mod schema;


pub use db::{PartitionDb, list_partitions, partition_path, remove_partition};
pub use models::{ColumnInfo, SubscriptionRecord};
pub use pushtimer_core::db::DatabaseError;
pub use queries_alarm::{ArmOutcome, delay_millis};
pub use schema::{EXPECTED_COLUMNS, SchemaOutcome, SchemaPlan, plan};
