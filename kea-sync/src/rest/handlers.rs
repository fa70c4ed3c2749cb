use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::reconciler::{EntityKind, Reconciler, SyncError};

/// Shared application state
pub struct AppState {
    /// Serializes every event: one reconciliation at a time.
    pub reconciler: Mutex<Reconciler>,
    pub secret: Option<String>,
    pub secret_header: String,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl ApiError {
    fn new(code: u16, error: impl Into<String>) -> Self {
        let error = error.into();
        error!("{}", error);
        Self { error, code }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code {
            400 => StatusCode::BAD_REQUEST,
            403 => StatusCode::FORBIDDEN,
            502 => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        match &e {
            SyncError::Kea(kea) if kea.is_transport() => ApiError::new(502, e.to_string()),
            _ => ApiError::new(500, e.to_string()),
        }
    }
}

/// NetBox webhook payload. Only the keys used here are declared.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub model: String,
    pub event: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub id: u64,
}

/// Process one IPAM change notification.
///
/// The running DHCP configuration is reloaded first, the entity is synced
/// and the result pushed.
pub async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    debug!("receive data on /event/{}/", name);

    if let Some(secret) = &state.secret {
        let given = headers
            .get(state.secret_header.as_str())
            .and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            return Err(ApiError::new(403, "wrong secret or secret header"));
        }
    }

    let body: serde_json::Value = serde_json::from_slice(&body).map_err(|_| {
        ApiError::new(
            400,
            format!("malformed body (not JSON): {}", String::from_utf8_lossy(&body)),
        )
    })?;
    debug!("parsed JSON request: {}", body);
    let event: WebhookEvent = serde_json::from_value(body)
        .map_err(|e| ApiError::new(400, format!("request missing key: {}", e)))?;
    let kind: EntityKind = event
        .model
        .parse()
        .map_err(|e: crate::reconciler::UnsupportedKind| ApiError::new(400, e.to_string()))?;

    info!("process event: {} id={} {}", kind, event.data.id, event.event);
    let mut reconciler = state.reconciler.lock().await;
    reconciler.reload_dhcp_config().await?;
    reconciler.sync(kind, event.data.id).await?;
    reconciler.push_to_dhcp().await?;

    Ok(StatusCode::CREATED)
}

/// Liveness check.
pub async fn health() -> &'static str {
    "ok"
}
