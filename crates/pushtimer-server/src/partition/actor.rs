//! The per-partition actor task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use pushtimer_core::db::unix_timestamp_millis;
use pushtimer_core::metrics::{SchedulerEvent, record_delivery, record_event};

use super::{
    PartitionError, PartitionKey, PartitionStatus, Registered, RouterSettings, StorageLocation,
};
use crate::delivery::DeliveryWorker;
use crate::storage::{
    ArmOutcome, DatabaseError, PartitionDb, SchemaOutcome, SubscriptionRecord, remove_partition,
};

pub(super) type Reply<T> = oneshot::Sender<Result<T, PartitionError>>;

/// Messages accepted by a partition actor.
pub(super) enum Command {
    Register {
        record: SubscriptionRecord,
        reply: Reply<Registered>,
    },
    Greet {
        name: String,
        reply: Reply<String>,
    },
    Status {
        reply: Reply<PartitionStatus>,
    },
    /// Activate without doing anything else, so a pending alarm is armed.
    Wake {
        reply: Reply<PartitionStatus>,
    },
}

impl Command {
    fn fail(self, error: PartitionError) {
        // A dropped receiver means the caller gave up; nothing to report.
        match self {
            Self::Register { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Greet { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Self::Status { reply } | Self::Wake { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// State that exists only while the actor is activated.
struct ActivePartition {
    db: PartitionDb,
    /// Mirror of the durable wake time, refreshed after every write.
    alarm_at_ms: Option<i64>,
}

impl ActivePartition {
    async fn open(key: &PartitionKey, storage: &StorageLocation) -> Result<Self, PartitionError> {
        let db = match storage {
            StorageLocation::Disk(dir) => PartitionDb::open(dir, key).await,
            StorageLocation::Memory => PartitionDb::open_in_memory().await,
        }
        .map_err(PartitionError::Activation)?;

        let prepared = async {
            let schema = db.ensure_schema().await?;
            let alarm_at_ms = db.alarm_at().await?;
            Ok::<_, DatabaseError>((schema, alarm_at_ms))
        }
        .await;

        match prepared {
            Ok((schema, alarm_at_ms)) => {
                match schema {
                    SchemaOutcome::Migrated { rows } => {
                        info!(key = %key, rows, "Partition schema migrated");
                    }
                    SchemaOutcome::Created | SchemaOutcome::Current => {}
                }
                debug!(key = %key, ?schema, alarm_at_ms, "Partition activated");
                record_event(SchedulerEvent::PartitionActivated);
                Ok(Self { db, alarm_at_ms })
            }
            Err(e) => {
                db.close().await;
                Err(PartitionError::Activation(e))
            }
        }
    }

    /// Whether storage holds neither a record nor an alarm. Read errors
    /// count as occupied.
    async fn is_vacant(&self) -> bool {
        matches!(self.db.subscription_count().await, Ok(0))
            && matches!(self.db.alarm_at().await, Ok(None))
    }
}

enum Flow {
    Continue,
    Retire,
}

pub(super) struct PartitionActor {
    key: PartitionKey,
    settings: Arc<RouterSettings>,
    worker: DeliveryWorker,
    rx: mpsc::Receiver<Command>,
    /// Task of the previous actor for this key, which must finish before
    /// this one touches storage.
    predecessor: Option<JoinHandle<()>>,
    active: Option<ActivePartition>,
}

impl PartitionActor {
    pub(super) const fn new(
        key: PartitionKey,
        settings: Arc<RouterSettings>,
        worker: DeliveryWorker,
        rx: mpsc::Receiver<Command>,
        predecessor: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            key,
            settings,
            worker,
            rx,
            predecessor,
            active: None,
        }
    }

    pub(super) async fn run(mut self) {
        if let Some(previous) = self.predecessor.take() {
            if let Err(e) = previous.await {
                warn!(key = %self.key, error = %e, "Previous partition actor ended abnormally");
            }
        }

        let idle_timeout = self.settings.effective_idle_timeout();
        loop {
            let alarm_at_ms = self.active.as_ref().and_then(|a| a.alarm_at_ms);
            // A pending alarm keeps the actor resident.
            let idle = idle_timeout.filter(|_| alarm_at_ms.is_none());

            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        debug!(key = %self.key, "Mailbox closed");
                        break;
                    };
                    if let Flow::Retire = self.handle(command).await {
                        break;
                    }
                }
                () = tokio::time::sleep_until(deadline(alarm_at_ms.unwrap_or_default())),
                    if alarm_at_ms.is_some() =>
                {
                    self.fire().await;
                }
                () = tokio::time::sleep(idle.unwrap_or_default()), if idle.is_some() => {
                    debug!(key = %self.key, "Partition idle, retiring");
                    break;
                }
            }
        }

        self.retire().await;
    }

    async fn handle(&mut self, command: Command) -> Flow {
        let activation = match self.active.take() {
            Some(activation) => activation,
            None => match ActivePartition::open(&self.key, &self.settings.storage).await {
                Ok(activation) => activation,
                Err(e) => {
                    error!(key = %self.key, error = %e, "Partition activation failed");
                    command.fail(e);
                    return Flow::Retire;
                }
            },
        };
        let activation = self.active.insert(activation);

        match command {
            Command::Register { record, reply } => {
                let result = register(&self.key, activation, self.settings.delay, &record).await;
                let _ = reply.send(result);
            }
            Command::Greet { name, reply } => {
                let _ = reply.send(Ok(format!("Hello, {name}!")));
            }
            Command::Status { reply } | Command::Wake { reply } => {
                let _ = reply.send(status(activation).await);
            }
        }
        Flow::Continue
    }

    /// Run the delivery for the matured alarm, then consume that wake time
    /// unless the handler failed.
    async fn fire(&mut self) {
        let Some(activation) = self.active.as_mut() else {
            return;
        };
        let Some(fired_at) = activation.alarm_at_ms else {
            return;
        };

        info!(key = %self.key, fired_at, "Alarm fired");
        record_event(SchedulerEvent::AlarmFired);
        match self
            .worker
            .on_timer_fired(&self.key, &activation.db, unix_timestamp_millis())
            .await
        {
            Ok(outcome) => {
                info!(key = %self.key, ?outcome, "Delivery attempt finished");
                record_delivery(outcome.as_str());
            }
            Err(e) => {
                // The durable alarm is kept for the next activation. Only the
                // in-memory copy is dropped so it does not fire again now.
                error!(key = %self.key, error = %e, "Alarm handler failed, alarm kept");
                record_delivery("error");
                activation.alarm_at_ms = None;
                return;
            }
        }

        // Only the fired wake time is removed; one re-armed by the handler
        // stays. If this fails the alarm is left for the next activation.
        activation.alarm_at_ms = match activation.db.consume_alarm(fired_at).await {
            Ok(_) => match activation.db.alarm_at().await {
                Ok(at) => at,
                Err(e) => {
                    error!(key = %self.key, error = %e, "Failed to read alarm after firing");
                    None
                }
            },
            Err(e) => {
                error!(key = %self.key, error = %e, "Failed to consume fired alarm");
                None
            }
        };
    }

    /// Stop accepting commands and release storage. Commands already queued
    /// are rejected with [`PartitionError::Retired`] so the router can
    /// replay them on a fresh actor. A partition left with no record and no
    /// alarm has its database file removed.
    async fn retire(mut self) {
        self.rx.close();
        let mut rejected = 0usize;
        while let Some(command) = self.rx.recv().await {
            command.fail(PartitionError::Retired);
            rejected += 1;
        }
        if let Some(activation) = self.active.take() {
            let vacant = activation.is_vacant().await;
            activation.db.close().await;
            record_event(SchedulerEvent::PartitionRetired);

            if let StorageLocation::Disk(data_dir) = &self.settings.storage {
                if vacant {
                    match remove_partition(data_dir, &self.key) {
                        Ok(()) => debug!(key = %self.key, "Vacant partition removed"),
                        Err(e) => {
                            warn!(key = %self.key, error = %e, "Failed to remove vacant partition");
                        }
                    }
                }
            }
        }
        debug!(key = %self.key, rejected, "Partition actor stopped");
    }
}

async fn register(
    key: &PartitionKey,
    activation: &mut ActivePartition,
    delay: Duration,
    record: &SubscriptionRecord,
) -> Result<Registered, PartitionError> {
    activation.db.replace_subscription(record).await?;
    let alarm = activation
        .db
        .arm_alarm_if_absent(delay, unix_timestamp_millis())
        .await?;
    activation.alarm_at_ms = Some(alarm.wake_at_ms());

    match alarm {
        ArmOutcome::Armed(at) => {
            info!(key = %key, wake_at_ms = at, "Subscription stored, alarm armed");
            record_event(SchedulerEvent::AlarmArmed);
        }
        ArmOutcome::AlreadyPending(at) => {
            info!(key = %key, wake_at_ms = at, "Subscription stored, alarm already pending");
            record_event(SchedulerEvent::AlarmAlreadyPending);
        }
    }
    Ok(Registered { alarm })
}

async fn status(activation: &ActivePartition) -> Result<PartitionStatus, PartitionError> {
    Ok(PartitionStatus {
        subscribed: activation.db.subscription_count().await? > 0,
        alarm_at_ms: activation.alarm_at_ms,
    })
}

/// Monotonic deadline for a wall-clock time in Unix milliseconds. Past
/// times map to now.
fn deadline(at_ms: i64) -> Instant {
    let remaining = at_ms.saturating_sub(unix_timestamp_millis());
    let remaining = u64::try_from(remaining).unwrap_or(0);
    Instant::now() + Duration::from_millis(remaining)
}
