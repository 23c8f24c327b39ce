//! HTTP web-push client.
//!
//! Sends payload-less push messages: the subscriber's service worker is
//! woken by the push event and renders its own notification, so no message
//! encryption is involved.

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, HeaderMap};
use tracing::debug;

use super::{PushError, PushRequest, PushResponse, PushTransport};

/// Push transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct WebPushClient {
    http: reqwest::Client,
}

/// Origin of the push service, used as the VAPID audience.
pub fn push_service_origin(endpoint: &str) -> Result<String, PushError> {
    let url = Url::parse(endpoint).map_err(|e| PushError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(PushError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        });
    }
    Ok(url.origin().ascii_serialization())
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

impl WebPushClient {
    /// Build a client with the default TLS provider.
    pub fn new() -> Result<Self, PushError> {
        // reqwest is built with `rustls-no-provider`; `Err` means a provider
        // is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .user_agent(concat!("pushtimer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PushError::Request {
                endpoint: String::new(),
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }

    /// Wrap an existing `reqwest` client.
    pub const fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn authorization(request: &PushRequest, audience: &str) -> Result<String, PushError> {
        if let Some(key) = &request.gcm_api_key {
            return Ok(format!("key={key}"));
        }
        let now_secs = pushtimer_core::db::unix_timestamp_millis() / 1000;
        request.vapid.authorization(audience, now_secs)
    }
}

#[async_trait]
impl PushTransport for WebPushClient {
    async fn send(&self, request: &PushRequest) -> Result<PushResponse, PushError> {
        let endpoint = &request.subscription.endpoint;
        let audience = push_service_origin(endpoint)?;
        let authorization = Self::authorization(request, &audience)?;

        let response = self
            .http
            .post(endpoint)
            .header("TTL", request.ttl_secs.to_string())
            .header("Urgency", request.urgency.as_str())
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| PushError::Request {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let headers = header_pairs(response.headers());
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if status.is_success() {
            debug!(status = status.as_u16(), "Push message accepted");
            Ok(PushResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(PushError::Rejected {
                status: status.as_u16(),
                body,
                headers,
                endpoint: endpoint.clone(),
            })
        }
    }
}
