//! The partition's single durable wake-up slot.

use std::time::Duration;

use tracing::debug;

use pushtimer_core::db::DatabaseError;

use super::db::PartitionDb;

/// Result of [`PartitionDb::arm_alarm_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A new wake time was written.
    Armed(i64),
    /// An unmatured wake time already existed and was left alone.
    AlreadyPending(i64),
}

impl ArmOutcome {
    /// The wake time in effect after the call.
    pub const fn wake_at_ms(self) -> i64 {
        match self {
            Self::Armed(at) | Self::AlreadyPending(at) => at,
        }
    }
}

/// Saturating conversion of a delay to milliseconds.
pub fn delay_millis(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

impl PartitionDb {
    /// Current wake time in Unix milliseconds, if one is set.
    pub async fn alarm_at(&self) -> Result<Option<i64>, DatabaseError> {
        let at: Option<i64> = sqlx::query_scalar("SELECT wake_at_ms FROM alarm WHERE slot = 0")
            .fetch_optional(self.pool())
            .await?;
        Ok(at)
    }

    /// Arm the alarm at `now_ms + delay` unless a wake time later than
    /// `now_ms` is already set.
    ///
    /// A stored wake time that is `<= now_ms` has matured without firing
    /// yet and is treated as absent.
    pub async fn arm_alarm_if_absent(
        &self,
        delay: Duration,
        now_ms: i64,
    ) -> Result<ArmOutcome, DatabaseError> {
        let mut tx = self.pool().begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT wake_at_ms FROM alarm WHERE slot = 0")
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(at) = existing
            && at > now_ms
        {
            debug!(wake_at_ms = at, "Alarm already pending, not re-arming");
            return Ok(ArmOutcome::AlreadyPending(at));
        }

        let at = now_ms.saturating_add(delay_millis(delay));
        sqlx::query(
            "INSERT INTO alarm (slot, wake_at_ms) VALUES (0, ?) \
             ON CONFLICT(slot) DO UPDATE SET wake_at_ms = excluded.wake_at_ms",
        )
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ArmOutcome::Armed(at))
    }

    /// Unconditionally set the wake time.
    pub async fn set_alarm(&self, wake_at_ms: i64) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO alarm (slot, wake_at_ms) VALUES (0, ?) \
             ON CONFLICT(slot) DO UPDATE SET wake_at_ms = excluded.wake_at_ms",
        )
        .bind(wake_at_ms)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Clear the wake time. Returns `true` if one was set.
    pub async fn cancel_alarm(&self) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM alarm WHERE slot = 0")
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear the wake time only if it is still `wake_at_ms`.
    ///
    /// Used after a firing: a wake time rewritten by the handler survives.
    pub async fn consume_alarm(&self, wake_at_ms: i64) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM alarm WHERE slot = 0 AND wake_at_ms = ?")
            .bind(wake_at_ms)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
