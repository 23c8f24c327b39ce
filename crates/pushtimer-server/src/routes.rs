//! HTTP routing layer.

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::partition::{PartitionError, PartitionKey, PartitionRouter};
use crate::push::web_push::push_service_origin;
use crate::storage::SubscriptionRecord;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: PartitionRouter,
}

/// Browser `PushSubscription` as posted by the page.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

impl PushSubscription {
    fn validate(self) -> Result<SubscriptionRecord, String> {
        push_service_origin(&self.endpoint).map_err(|e| e.to_string())?;
        if self.keys.p256dh.is_empty() {
            return Err("keys.p256dh must not be empty".to_string());
        }
        if self.keys.auth.is_empty() {
            return Err("keys.auth must not be empty".to_string());
        }
        Ok(SubscriptionRecord {
            endpoint: self.endpoint,
            keys_p256dh: self.keys.p256dh,
            keys_auth: self.keys.auth,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PartitionView {
    key: String,
    subscribed: bool,
    alarm_at_ms: Option<i64>,
}

/// Handler-level error rendered as `{"success": false, "error": ...}`.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "success": false, "error": self.1 }))).into_response()
    }
}

impl From<PartitionError> for ApiError {
    fn from(e: PartitionError) -> Self {
        let status = match e {
            PartitionError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            PartitionError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            PartitionError::Activation(_)
            | PartitionError::Storage(_)
            | PartitionError::Retired => {
                error!(error = %e, "Partition call failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self(status, e.to_string())
    }
}

/// `POST /subscribe`
pub async fn subscribe(
    State(state): State<AppState>,
    body: Result<Json<PushSubscription>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(subscription) = body.map_err(|e| {
        warn!(error = %e, "Rejected malformed subscription");
        ApiError(StatusCode::BAD_REQUEST, e.body_text())
    })?;
    let record = subscription.validate().map_err(|reason| {
        warn!(%reason, "Rejected invalid subscription");
        ApiError(StatusCode::BAD_REQUEST, reason)
    })?;

    let key = PartitionKey::from_endpoint(&record.endpoint);
    state.router.register(&key, record).await?;
    Ok(Json(json!({ "success": true, "key": key.as_str() })))
}

/// `GET /greet/{name}`
pub async fn greet(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    let key = PartitionKey::new(name.as_str()).map_err(PartitionError::from)?;
    Ok(state.router.greet(&key, &name).await?)
}

/// `GET /partitions/{key}`
pub async fn partition_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PartitionView>, ApiError> {
    let key = PartitionKey::new(key).map_err(PartitionError::from)?;
    let status = state.router.status(&key).await?;
    Ok(Json(PartitionView {
        key: key.to_string(),
        subscribed: status.subscribed,
        alarm_at_ms: status.alarm_at_ms,
    }))
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/greet/{name}", get(greet))
        .route("/partitions/{key}", get(partition_status))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
