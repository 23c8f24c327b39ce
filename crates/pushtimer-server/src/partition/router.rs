//! Key-to-actor routing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::actor::{Command, PartitionActor, Reply};
use super::{PartitionError, PartitionKey, PartitionStatus, Registered, RouterSettings, StorageLocation};
use crate::delivery::DeliveryWorker;
use crate::storage::{SubscriptionRecord, list_partitions};

/// Attempts per call before giving up on actors that keep retiring.
const MAX_DISPATCH_ATTEMPTS: usize = 3;

struct Slot {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Routes commands to the single live actor of each partition key,
/// creating actors on first use.
#[derive(Clone)]
pub struct PartitionRouter {
    settings: Arc<RouterSettings>,
    worker: DeliveryWorker,
    /// `None` once shut down.
    slots: Arc<Mutex<Option<HashMap<PartitionKey, Slot>>>>,
}

impl PartitionRouter {
    pub fn new(settings: RouterSettings, worker: DeliveryWorker) -> Self {
        Self {
            settings: Arc::new(settings),
            worker,
            slots: Arc::new(Mutex::new(Some(HashMap::new()))),
        }
    }

    /// Store `record` as the partition's subscription and arm its alarm
    /// unless one is already pending.
    #[instrument(skip(self, key, record), fields(key = %key))]
    pub async fn register(
        &self,
        key: &PartitionKey,
        record: SubscriptionRecord,
    ) -> Result<Registered, PartitionError> {
        self.dispatch(key, |reply| Command::Register {
            record: record.clone(),
            reply,
        })
        .await
    }

    pub async fn greet(&self, key: &PartitionKey, name: &str) -> Result<String, PartitionError> {
        self.dispatch(key, |reply| Command::Greet {
            name: name.to_string(),
            reply,
        })
        .await
    }

    pub async fn status(&self, key: &PartitionKey) -> Result<PartitionStatus, PartitionError> {
        self.dispatch(key, |reply| Command::Status { reply }).await
    }

    /// Activate the partition so a stored alarm starts ticking.
    pub async fn wake(&self, key: &PartitionKey) -> Result<PartitionStatus, PartitionError> {
        self.dispatch(key, |reply| Command::Wake { reply }).await
    }

    /// Wake every partition that has a database on disk. Returns the number
    /// of partitions with a pending alarm.
    pub async fn recover(&self) -> Result<usize, PartitionError> {
        let StorageLocation::Disk(data_dir) = &self.settings.storage else {
            return Ok(0);
        };

        let keys = list_partitions(data_dir)?;
        let mut pending = 0;
        for key in &keys {
            match self.wake(key).await {
                Ok(status) if status.alarm_at_ms.is_some() => pending += 1,
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to recover partition"),
            }
        }
        info!(partitions = keys.len(), pending, "Partitions recovered");
        Ok(pending)
    }

    /// Number of actors currently accepting commands.
    pub async fn active_partitions(&self) -> usize {
        self.slots
            .lock()
            .await
            .as_ref()
            .map_or(0, |slots| slots.values().filter(|s| !s.tx.is_closed()).count())
    }

    /// Stop every actor and wait for them to release storage. Durable alarms
    /// survive and are picked up by [`PartitionRouter::recover`] on the next
    /// start.
    pub async fn shutdown(&self) {
        let Some(slots) = self.slots.lock().await.take() else {
            return;
        };
        let count = slots.len();
        let tasks: Vec<_> = slots.into_values().map(|slot| slot.task).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Partition actor ended abnormally");
            }
        }
        info!(actors = count, "Partition router shut down");
    }

    /// Send a command to the key's actor and await the reply, moving to a
    /// fresh actor when the current one retires underneath the call.
    async fn dispatch<T>(
        &self,
        key: &PartitionKey,
        make: impl Fn(Reply<T>) -> Command,
    ) -> Result<T, PartitionError> {
        for attempt in 1..=MAX_DISPATCH_ATTEMPTS {
            let tx = self.resolve(key).await?;
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(make(reply_tx)).await.is_err() {
                debug!(key = %key, attempt, "Actor mailbox closed, retrying");
                continue;
            }
            match reply_rx.await {
                Ok(Err(PartitionError::Retired)) | Err(_) => {
                    debug!(key = %key, attempt, "Actor retired before replying, retrying");
                }
                Ok(result) => return result,
            }
        }
        Err(PartitionError::Retired)
    }

    /// Sender for the key's live actor, spawning one if needed.
    async fn resolve(&self, key: &PartitionKey) -> Result<mpsc::Sender<Command>, PartitionError> {
        let mut guard = self.slots.lock().await;
        let slots = guard.as_mut().ok_or(PartitionError::ShutDown)?;

        if let Some(slot) = slots.get(key) {
            if !slot.tx.is_closed() {
                return Ok(slot.tx.clone());
            }
        }

        let predecessor = slots.remove(key).map(|slot| slot.task);
        let (tx, rx) = mpsc::channel(self.settings.mailbox_capacity.max(1));
        let actor = PartitionActor::new(
            key.clone(),
            Arc::clone(&self.settings),
            self.worker.clone(),
            rx,
            predecessor,
        );
        let task = tokio::spawn(actor.run());
        slots.insert(key.clone(), Slot { tx: tx.clone(), task });
        debug!(key = %key, "Partition actor spawned");
        Ok(tx)
    }
}
