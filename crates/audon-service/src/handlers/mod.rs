//! HTTP request handlers for the Audon service.

pub mod health;
pub mod metrics;
pub mod rooms;
pub mod users;
pub mod webhooks;

pub use health::health_check;
pub use metrics::metrics_handler;
pub use rooms::{
    add_cohost, close_room, create_room, demote_speaker, join_room, kick_user, preview_room,
    promote_speaker, update_room,
};
pub use users::{get_user, leave, live_room_of, status, verify_session};
pub use webhooks::receive_webhook;

use crate::errors::AudonError;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body, answering 400 rather than axum's 422.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, AudonError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "audon.handlers", error = %e, "Invalid request body");
        AudonError::BadRequest("invalid_request_format".to_string())
    })
}
