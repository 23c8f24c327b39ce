//! Subscription record queries.
//!
//! A partition holds at most one subscription. Writes replace the whole
//! table contents inside one transaction, so the row count observed from
//! outside is always 0 or 1.

use pushtimer_core::db::DatabaseError;

use super::db::PartitionDb;
use super::models::SubscriptionRecord;

impl PartitionDb {
    /// Replace whatever is stored with `record` (delete-then-insert).
    pub async fn replace_subscription(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM subscriptions")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO subscriptions (endpoint, keys_p256dh, keys_auth) VALUES (?, ?, ?)",
        )
        .bind(&record.endpoint)
        .bind(&record.keys_p256dh)
        .bind(&record.keys_auth)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The stored subscription, if any.
    pub async fn get_subscription(&self) -> Result<Option<SubscriptionRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT endpoint, keys_p256dh, keys_auth FROM subscriptions LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;

        Ok(record)
    }

    /// Delete every stored subscription. Returns the number of rows removed.
    pub async fn clear_subscriptions(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions")
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of stored subscriptions (0 or 1 outside a migration).
    pub async fn subscription_count(&self) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }
}
