//! Web push delivery.
//!
//! The delivery worker talks to push services only through the
//! [`PushTransport`] trait. [`WebPushClient`] is the production
//! implementation: it POSTs a payload-less push message with VAPID (or
//! legacy GCM) authorisation.

pub mod vapid;
pub mod web_push;

use std::fmt;

use async_trait::async_trait;

use crate::storage::SubscriptionRecord;

pub use vapid::VapidKeys;
pub use web_push::WebPushClient;

/// Delivery priority hint sent in the `Urgency` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    VeryLow,
    Low,
    Normal,
    High,
}

impl Urgency {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// A single push message addressed to one subscription.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub subscription: SubscriptionRecord,
    pub urgency: Urgency,
    pub ttl_secs: u64,
    /// Application-server identity used for VAPID authorisation.
    pub vapid: VapidKeys,
    /// Legacy GCM server key, only set for Google push endpoints.
    pub gcm_api_key: Option<String>,
}

/// Successful response from the push service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: u16,
    pub body: String,
}

/// Errors returned by a [`PushTransport`].
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The push service answered with a non-success status.
    #[error("push service rejected message for {endpoint} (status {status}): {body}")]
    Rejected {
        status: u16,
        body: String,
        headers: Vec<(String, String)>,
        endpoint: String,
    },

    /// The request never produced a response.
    #[error("push request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    /// The subscription endpoint is not a usable URL.
    #[error("invalid push endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// Signing the VAPID token failed.
    #[error("failed to sign VAPID token: {0}")]
    Signing(String),
}

impl PushError {
    /// HTTP status returned by the push service, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the push service reports the subscription as expired or
    /// unknown (404 / 410).
    pub const fn is_subscription_gone(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }

    /// Response body, empty when there was no response.
    pub fn body(&self) -> &str {
        match self {
            Self::Rejected { body, .. } => body,
            _ => "",
        }
    }

    /// Response headers, empty when there was no response.
    pub fn headers(&self) -> &[(String, String)] {
        match self {
            Self::Rejected { headers, .. } => headers,
            _ => &[],
        }
    }
}

/// Outbound push delivery.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver `request` exactly once. No retries.
    async fn send(&self, request: &PushRequest) -> Result<PushResponse, PushError>;
}

/// Formats headers as `name: value` pairs for log lines.
pub struct HeaderList<'a>(pub &'a [(String, String)]);

impl fmt::Display for HeaderList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}
