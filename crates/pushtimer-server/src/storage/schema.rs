//! Idempotent schema check and rebuild for the subscription table.
//!
//! Every activation of a partition reads the physical column set of the
//! `subscriptions` table and brings it to the expected shape:
//! `endpoint` (primary key), `keys_p256dh`, `keys_auth`. Older layouts are
//! rebuilt through a shadow table inside a single transaction, so a failed
//! rebuild leaves the previous layout untouched.

use tracing::{info, warn};

use pushtimer_core::db::DatabaseError;

use super::db::PartitionDb;
use super::models::ColumnInfo;

pub const SUBSCRIPTIONS_TABLE: &str = "subscriptions";
pub const ALARM_TABLE: &str = "alarm";
const REBUILD_TABLE: &str = "subscriptions_rebuild";

/// Column set of the current record layout, primary key first.
pub const EXPECTED_COLUMNS: [&str; 3] = ["endpoint", "keys_p256dh", "keys_auth"];
const KEY_COLUMN: &str = "endpoint";

/// What has to happen to the subscription table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaPlan {
    /// The table does not exist.
    Create,
    /// Columns and primary key already match.
    Current,
    /// The table exists with the wrong shape.
    Rebuild {
        /// Expected columns absent from the old table.
        missing: Vec<&'static str>,
        /// Whether the old table has an `endpoint` column at all.
        has_endpoint: bool,
    },
}

/// Result of [`PartitionDb::ensure_schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOutcome {
    Created,
    Current,
    Migrated { rows: u64 },
}

/// Decide what to do with a table whose columns are `columns`.
///
/// An empty column list means the table does not exist.
pub fn plan(columns: &[ColumnInfo]) -> SchemaPlan {
    if columns.is_empty() {
        return SchemaPlan::Create;
    }

    let has = |name: &str| columns.iter().any(|c| c.name.eq_ignore_ascii_case(name));
    let missing: Vec<&'static str> = EXPECTED_COLUMNS
        .iter()
        .copied()
        .filter(|name| !has(name))
        .collect();
    let has_endpoint = has(KEY_COLUMN);

    // Exactly `endpoint` forms the primary key; composite keys do not count.
    let keyed_on_endpoint = has_endpoint
        && columns.iter().all(|c| {
            if c.name.eq_ignore_ascii_case(KEY_COLUMN) {
                c.pk == 1
            } else {
                c.pk == 0
            }
        });

    if missing.is_empty() && keyed_on_endpoint {
        SchemaPlan::Current
    } else {
        SchemaPlan::Rebuild {
            missing,
            has_endpoint,
        }
    }
}

fn create_subscriptions_sql(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (\
         endpoint TEXT PRIMARY KEY NOT NULL, \
         keys_p256dh TEXT NOT NULL, \
         keys_auth TEXT NOT NULL)"
    )
}

fn create_alarm_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {ALARM_TABLE} (\
         slot INTEGER PRIMARY KEY CHECK (slot = 0), \
         wake_at_ms INTEGER NOT NULL)"
    )
}

/// `INSERT ... SELECT` copying the old table into the shadow table.
///
/// Absent columns are filled with `''`. With an `endpoint` column, rows are
/// grouped by endpoint and `MAX` picks one value per duplicate; without it
/// every row maps to the same empty endpoint and only the first survives.
fn copy_rows_sql(missing: &[&str], has_endpoint: bool) -> String {
    let value = |column: &str| {
        if missing.contains(&column) {
            "''".to_string()
        } else if has_endpoint {
            format!("COALESCE(MAX(\"{column}\"), '')")
        } else {
            format!("COALESCE(\"{column}\", '')")
        }
    };
    let p256dh = value("keys_p256dh");
    let auth = value("keys_auth");

    if has_endpoint {
        format!(
            "INSERT INTO {REBUILD_TABLE} (endpoint, keys_p256dh, keys_auth) \
             SELECT \"endpoint\", {p256dh}, {auth} FROM {SUBSCRIPTIONS_TABLE} \
             WHERE \"endpoint\" IS NOT NULL GROUP BY \"endpoint\""
        )
    } else {
        format!(
            "INSERT OR IGNORE INTO {REBUILD_TABLE} (endpoint, keys_p256dh, keys_auth) \
             SELECT '', {p256dh}, {auth} FROM {SUBSCRIPTIONS_TABLE}"
        )
    }
}

impl PartitionDb {
    /// Columns of `table`, empty when the table does not exist.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, DatabaseError> {
        let columns =
            sqlx::query_as::<_, ColumnInfo>("SELECT name, pk FROM pragma_table_info(?)")
                .bind(table)
                .fetch_all(self.pool())
                .await?;
        Ok(columns)
    }

    /// Bring the partition's tables to the current layout.
    ///
    /// Safe to call any number of times; when everything already matches,
    /// nothing is written.
    pub async fn ensure_schema(&self) -> Result<SchemaOutcome, DatabaseError> {
        let columns = self.table_columns(SUBSCRIPTIONS_TABLE).await?;
        let alarm_exists = !self.table_columns(ALARM_TABLE).await?.is_empty();
        let plan = plan(&columns);

        if plan == SchemaPlan::Current && alarm_exists {
            return Ok(SchemaOutcome::Current);
        }

        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        let mut statements = vec![create_alarm_sql()];
        let outcome = match &plan {
            SchemaPlan::Current => SchemaOutcome::Current,
            SchemaPlan::Create => {
                statements.push(create_subscriptions_sql(SUBSCRIPTIONS_TABLE));
                SchemaOutcome::Created
            }
            SchemaPlan::Rebuild {
                missing,
                has_endpoint,
            } => {
                if !has_endpoint {
                    warn!(
                        "Subscription table has no endpoint column; \
                         migrated rows get an empty endpoint"
                    );
                }
                sqlx::query(&format!("DROP TABLE IF EXISTS {REBUILD_TABLE}"))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
                sqlx::query(&create_subscriptions_sql(REBUILD_TABLE))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
                let rows = sqlx::query(&copy_rows_sql(missing, *has_endpoint))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?
                    .rows_affected();
                statements.push(format!("DROP TABLE {SUBSCRIPTIONS_TABLE}"));
                statements.push(format!(
                    "ALTER TABLE {REBUILD_TABLE} RENAME TO {SUBSCRIPTIONS_TABLE}"
                ));
                SchemaOutcome::Migrated { rows }
            }
        };

        for sql in &statements {
            sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        match outcome {
            SchemaOutcome::Migrated { rows } => {
                info!(rows, plan = ?plan, "Subscription table migrated");
            }
            SchemaOutcome::Created => info!("Partition schema created"),
            SchemaOutcome::Current => info!("Alarm table created"),
        }
        Ok(outcome)
    }
}
