//! HTTP surface: health reporting, the manual sweep trigger, and the
//! Shopify fulfillment webhook ingress.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use crate::sweep::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub webhook_secret: Arc<String>,
    pub sweep_hours_ago: i64,
    pub sweep_limit: u32,
    pub started_at: Instant,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync", post(manual_sync))
        .route("/webhooks/fulfillments", post(fulfillment_webhook))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    catalog_size: usize,
    catalog_age_secs: Option<i64>,
    uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let catalog = state.pipeline.catalog();
    let catalog_age_secs = catalog
        .built_at()
        .await
        .map(|t| (state.pipeline.clock().now() - t).num_seconds());
    Json(HealthBody {
        status: "ok",
        catalog_size: catalog.size().await,
        catalog_age_secs,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    hours_ago: Option<i64>,
    limit: Option<u32>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Administrative trigger: runs a recent-order sweep inline and returns
/// the report.
async fn manual_sync(
    State(state): State<AppState>,
    Json(req): Json<SyncRequest>,
) -> Response {
    let hours_ago = req.hours_ago.unwrap_or(state.sweep_hours_ago);
    let limit = req.limit.unwrap_or(state.sweep_limit);
    match state.pipeline.sweep_recent(hours_ago, limit).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => {
            error!(?err, "manual sweep failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("{err:#}"),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct FulfillmentEvent {
    order_id: i64,
}

/// Webhook ingress for fulfillment events. The HMAC is verified against
/// the raw body before anything is parsed; the sweep itself runs as a
/// spawned task so Shopify gets its acknowledgment quickly.
async fn fulfillment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get("X-Shopify-Hmac-Sha256")
        .and_then(|v| v.to_str().ok());
    let Some(signature) = signature else {
        warn!("webhook missing HMAC header");
        return StatusCode::UNAUTHORIZED;
    };
    if !verify_webhook_hmac(&state.webhook_secret, &body, signature) {
        warn!("webhook HMAC verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    let event: FulfillmentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(?err, "unparseable webhook payload");
            return StatusCode::BAD_REQUEST;
        }
    };

    info!(order_id = event.order_id, "fulfillment webhook accepted");
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        if let Err(err) = pipeline.sweep_order(event.order_id).await {
            error!(order_id = event.order_id, ?err, "webhook-triggered sweep failed");
        }
    });
    StatusCode::OK
}

/// Shopify signs webhooks with HMAC-SHA256 over the raw body, base64
/// encoded. Comparison is constant-time.
pub fn verify_webhook_hmac(secret: &str, body: &[u8], signature_b64: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn hmac_accepts_valid_signature() {
        let body = br#"{"order_id":450789469}"#;
        let sig = sign("hush", body);
        assert!(verify_webhook_hmac("hush", body, &sig));
    }

    #[test]
    fn hmac_rejects_wrong_secret_or_tampered_body() {
        let body = br#"{"order_id":450789469}"#;
        let sig = sign("hush", body);
        assert!(!verify_webhook_hmac("other", body, &sig));
        assert!(!verify_webhook_hmac("hush", br#"{"order_id":1}"#, &sig));
    }

    #[test]
    fn hmac_rejects_invalid_base64() {
        assert!(!verify_webhook_hmac("hush", b"body", "!!not-base64!!"));
    }
}
