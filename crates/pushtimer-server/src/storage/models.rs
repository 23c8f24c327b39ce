//! Data models for partition storage.

use serde::{Deserialize, Serialize};

/// The single push subscription stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    /// Push service URL; primary key of the record table.
    pub endpoint: String,
    /// Client public key (base64url P-256 point).
    pub keys_p256dh: String,
    /// Client auth secret (base64url).
    pub keys_auth: String,
}

/// One row of `pragma_table_info`, reduced to what the migrator needs.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ColumnInfo {
    pub name: String,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk: i64,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, pk: i64) -> Self {
        Self {
            name: name.into(),
            pk,
        }
    }
}
