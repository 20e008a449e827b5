//! Live service webhook receiver.
//!
//! `POST /app/webhook`. The `Authorization` header carries a token signed
//! with the shared API secret whose `sha256` claim covers the raw body. Once
//! the signature checks out the delivery is acknowledged with 200 whatever
//! the reconciliation outcome, so the live service does not redeliver.

use crate::errors::AudonError;
use crate::handlers::parse_json;
use crate::models::WebhookEvent;
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
};
use common::jwt::verify_webhook;
use common::secret::ExposeSecret;
use std::sync::Arc;
use tracing::{debug, instrument};

fn webhook_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
    (!token.is_empty()).then_some(token)
}

/// Handler for POST /app/webhook
#[instrument(skip_all, name = "audon.webhook.receive")]
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AudonError> {
    let unauthorized = || AudonError::InvalidSession("invalid_signature".to_string());
    let token = webhook_token(&headers).ok_or_else(unauthorized)?;

    verify_webhook(
        token,
        &body,
        &state.config.livekit_api_key,
        state.config.livekit_api_secret.expose_secret().as_bytes(),
    )
    .map_err(|e| {
        debug!(target: "audon.handlers.webhooks", error = ?e, "Rejected webhook");
        unauthorized()
    })?;

    let event: WebhookEvent = parse_json(&body)?;
    state.coordinator.handle_webhook(&event).await;
    Ok(StatusCode::OK)
}
