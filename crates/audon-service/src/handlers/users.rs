//! User handlers.
//!
//! - `GET /app/verify` - Check the session against the home server
//! - `POST /api/leave` - Client-side leave notification
//! - `GET /api/status` - Caller's live rooms and roles
//! - `GET /api/user/{id}` - User lookup
//! - `GET /api/live/{webfinger}` - Live room hosted by a user

use crate::errors::AudonError;
use crate::middleware::CurrentUser;
use crate::models::{AudonUser, LiveRoomResponse, UserStatus};
use crate::routes::AppState;
use crate::services::mastodon::RemoteAccount;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /app/verify
#[instrument(skip_all, name = "audon.user.verify")]
pub async fn verify_session(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<RemoteAccount>, AudonError> {
    let account = state
        .coordinator
        .verify_session(&current.user, &current.session)
        .await?;
    Ok(Json(account))
}

/// Handler for POST /api/leave
#[instrument(skip_all, name = "audon.user.leave")]
pub async fn leave(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<StatusCode, AudonError> {
    state
        .coordinator
        .leave(&current.user, &current.session)
        .await?;
    Ok(StatusCode::OK)
}

/// Handler for GET /api/status
#[instrument(skip_all, name = "audon.user.status")]
pub async fn status(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<UserStatus>>, AudonError> {
    Ok(Json(state.coordinator.status(&current.user).await?))
}

/// Handler for GET /api/user/{id}
#[instrument(skip_all, name = "audon.user.get")]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AudonUser>, AudonError> {
    Ok(Json(state.coordinator.find_user(&id).await?))
}

/// Handler for GET /api/live/{webfinger}
#[instrument(skip_all, name = "audon.user.live_room")]
pub async fn live_room_of(
    State(state): State<Arc<AppState>>,
    Path(webfinger): Path<String>,
) -> Result<Json<LiveRoomResponse>, AudonError> {
    Ok(Json(state.coordinator.live_room_of(&webfinger).await?))
}
