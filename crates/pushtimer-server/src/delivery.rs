//! Timer-fired delivery of a partition's stored subscription.
//!
//! When a partition's alarm matures, its actor hands the partition database
//! to [`DeliveryWorker::on_timer_fired`], which makes exactly one delivery
//! attempt. Success empties the partition. Failure is logged with full
//! detail and, under the default [`FailurePolicy::Stall`], changes nothing.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tracing::{info, instrument, warn};

use pushtimer_core::Config;
use pushtimer_core::config::FailurePolicy;
use pushtimer_core::db::DatabaseError;

use crate::partition::PartitionKey;
use crate::push::vapid::VapidError;
use crate::push::{HeaderList, PushError, PushRequest, PushTransport, Urgency, VapidKeys};
use crate::storage::{PartitionDb, SubscriptionRecord, delay_millis};

/// The legacy GCM endpoint, the only one authorized with a server key.
const GCM_HOST: &str = "android.googleapis.com";
const GCM_PATH_PREFIX: &str = "/gcm/send";

/// Read-only delivery configuration shared by every partition.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub vapid: Option<VapidKeys>,
    pub gcm_api_key: Option<String>,
    pub ttl_secs: u64,
    pub failure_policy: FailurePolicy,
    pub retry_delay: Duration,
}

impl DeliverySettings {
    /// Resolve settings from configuration, loading the VAPID key file.
    pub fn from_config(config: &Config) -> Result<Self, VapidError> {
        Ok(Self {
            vapid: VapidKeys::from_config(&config.vapid)?,
            gcm_api_key: config.vapid.gcm_api_key.clone(),
            ttl_secs: config.delivery.ttl_secs,
            failure_policy: config.delivery.failure_policy,
            retry_delay: Duration::from_secs(config.delivery.retry_delay_secs.max(1)),
        })
    }
}

/// Fatal errors of a timer firing.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no subscription to deliver")]
    NoSubscription,

    #[error("delivery configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// How a delivery attempt ended. Transport failures are contained here
/// rather than returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the push service; record and alarm cleared.
    Delivered { status: u16 },
    /// Rejected or unreachable; record kept, nothing re-armed.
    Stalled { status: Option<u16> },
    /// Push service reported the subscription gone; record cleared.
    Removed { status: u16 },
    /// Transient failure; alarm re-armed.
    Rescheduled { wake_at_ms: i64 },
}

impl DeliveryOutcome {
    /// Metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Stalled { .. } => "stalled",
            Self::Removed { .. } => "removed",
            Self::Rescheduled { .. } => "rescheduled",
        }
    }
}

/// Whether `endpoint` is a legacy GCM endpoint. FCM web-push endpoints
/// take VAPID like every other push service.
pub fn is_gcm_endpoint(endpoint: &str) -> bool {
    Url::parse(endpoint).ok().is_some_and(|url| {
        url.host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(GCM_HOST))
            && url.path().starts_with(GCM_PATH_PREFIX)
    })
}

/// Executes the delivery attempt for a matured alarm.
#[derive(Clone)]
pub struct DeliveryWorker {
    transport: Arc<dyn PushTransport>,
    settings: Arc<DeliverySettings>,
}

impl DeliveryWorker {
    pub fn new(transport: Arc<dyn PushTransport>, settings: DeliverySettings) -> Self {
        Self {
            transport,
            settings: Arc::new(settings),
        }
    }

    /// Build the push request for `subscription` from the shared settings.
    pub fn build_request(
        &self,
        subscription: SubscriptionRecord,
    ) -> Result<PushRequest, DeliveryError> {
        let vapid = self.settings.vapid.clone().ok_or_else(|| {
            DeliveryError::Config("VAPID signing keys are not configured".to_string())
        })?;

        let gcm_api_key = if is_gcm_endpoint(&subscription.endpoint) {
            self.settings.gcm_api_key.clone()
        } else {
            None
        };

        Ok(PushRequest {
            subscription,
            urgency: Urgency::High,
            ttl_secs: self.settings.ttl_secs,
            vapid,
            gcm_api_key,
        })
    }

    /// Handle a matured alarm for the partition stored in `db`.
    ///
    /// Returns an error only for conditions that make an attempt impossible
    /// (no record, missing keys, storage failure); the partition's state is
    /// then left untouched.
    #[instrument(skip(self, key, db), fields(key = %key))]
    pub async fn on_timer_fired(
        &self,
        key: &PartitionKey,
        db: &PartitionDb,
        now_ms: i64,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let subscription = db
            .get_subscription()
            .await?
            .ok_or(DeliveryError::NoSubscription)?;
        let request = self.build_request(subscription)?;

        match self.transport.send(&request).await {
            Ok(response) => {
                db.clear_subscriptions().await?;
                db.cancel_alarm().await?;
                info!(
                    status = response.status,
                    endpoint = %request.subscription.endpoint,
                    "Push delivered, partition cleared"
                );
                Ok(DeliveryOutcome::Delivered {
                    status: response.status,
                })
            }
            Err(e) => {
                warn!(
                    status = ?e.status(),
                    body = %e.body(),
                    headers = %HeaderList(e.headers()),
                    endpoint = %request.subscription.endpoint,
                    error = %e,
                    "Push delivery failed"
                );
                self.apply_failure_policy(db, &e, now_ms).await
            }
        }
    }

    async fn apply_failure_policy(
        &self,
        db: &PartitionDb,
        error: &PushError,
        now_ms: i64,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        match (self.settings.failure_policy, error.status()) {
            (FailurePolicy::Stall, status) => Ok(DeliveryOutcome::Stalled { status }),
            (FailurePolicy::Classify, Some(status)) if error.is_subscription_gone() => {
                db.clear_subscriptions().await?;
                db.cancel_alarm().await?;
                info!(status, "Subscription gone, record removed");
                Ok(DeliveryOutcome::Removed { status })
            }
            (FailurePolicy::Classify, _) => {
                let wake_at_ms = now_ms.saturating_add(delay_millis(self.settings.retry_delay));
                db.set_alarm(wake_at_ms).await?;
                info!(wake_at_ms, "Delivery rescheduled");
                Ok(DeliveryOutcome::Rescheduled { wake_at_ms })
            }
        }
    }
}
