//! Room handlers.
//!
//! - `POST /api/room` - Create room
//! - `PATCH /api/room/{id}` - Update title, description, restriction (host)
//! - `POST /api/room/{id}/join` - Join and receive a live grant
//! - `DELETE /api/room/{id}` - Close room (host or co-host)
//! - `PUT|DELETE /api/room/{id}/speakers/{user}` - Promote / demote
//! - `PUT /api/room/{id}/cohosts/{user}` - Add co-host
//! - `PUT /api/room/{id}/kicked/{user}` - Kick
//! - `GET /app/preview/{id}` - Public preview (no session)

use crate::errors::AudonError;
use crate::handlers::parse_json;
use crate::middleware::CurrentUser;
use crate::models::{
    CreateRoomRequest, JoinResponse, PreviewResponse, ProfileSnapshot, Room, UpdateRoomRequest,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use common::types::RoomId;
use std::sync::Arc;
use tracing::{info, instrument};

/// Handler for POST /api/room
///
/// Responds 201 with the new room id as the body.
#[instrument(skip_all, name = "audon.room.create", fields(audon_id = %current.user.audon_id))]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    body: Bytes,
) -> Result<(StatusCode, String), AudonError> {
    let request: CreateRoomRequest = parse_json(&body)?;
    let room = state.coordinator.create_room(&current.user, request).await?;
    info!(target: "audon.handlers.rooms", room_id = %room.room_id, "Created room");
    Ok((StatusCode::CREATED, room.room_id.to_string()))
}

/// Handler for PATCH /api/room/{id}
#[instrument(skip_all, name = "audon.room.update", fields(room_id = %id))]
pub async fn update_room(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Room>, AudonError> {
    let room_id = RoomId::parse(&id)?;
    let patch: UpdateRoomRequest = parse_json(&body)?;
    let room = state
        .coordinator
        .update_room(&room_id, &current.user, patch)
        .await?;
    Ok(Json(room))
}

/// Handler for POST /api/room/{id}/join
///
/// The body is the caller's current profile snapshot from their home
/// server; it must carry an avatar.
#[instrument(skip_all, name = "audon.room.join", fields(room_id = %id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<JoinResponse>, AudonError> {
    let room_id = RoomId::parse(&id)?;
    let profile: ProfileSnapshot = parse_json(&body)
        .map_err(|_| AudonError::BadRequest("invalid_profile".to_string()))?;
    let response = state
        .coordinator
        .join(&room_id, &current.user, &current.session, profile)
        .await?;
    Ok(Json(response))
}

/// Handler for DELETE /api/room/{id}
#[instrument(skip_all, name = "audon.room.close", fields(room_id = %id))]
pub async fn close_room(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AudonError> {
    let room_id = RoomId::parse(&id)?;
    state.coordinator.close_room(&room_id, &current.user).await?;
    Ok(StatusCode::OK)
}

/// Handler for PUT /api/room/{id}/speakers/{user}
#[instrument(skip_all, name = "audon.room.promote", fields(room_id = %id, target = %target))]
pub async fn promote_speaker(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode, AudonError> {
    let room_id = RoomId::parse(&id)?;
    state
        .coordinator
        .promote(&room_id, &current.user, &target)
        .await?;
    Ok(StatusCode::OK)
}

/// Handler for DELETE /api/room/{id}/speakers/{user}
#[instrument(skip_all, name = "audon.room.demote", fields(room_id = %id, target = %target))]
pub async fn demote_speaker(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode, AudonError> {
    let room_id = RoomId::parse(&id)?;
    state
        .coordinator
        .demote(&room_id, &current.user, &target)
        .await?;
    Ok(StatusCode::OK)
}

/// Handler for PUT /api/room/{id}/cohosts/{user}
#[instrument(skip_all, name = "audon.room.add_cohost", fields(room_id = %id, target = %target))]
pub async fn add_cohost(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode, AudonError> {
    let room_id = RoomId::parse(&id)?;
    state
        .coordinator
        .add_cohost(&room_id, &current.user, &target)
        .await?;
    Ok(StatusCode::OK)
}

/// Handler for PUT /api/room/{id}/kicked/{user}
#[instrument(skip_all, name = "audon.room.kick", fields(room_id = %id, target = %target))]
pub async fn kick_user(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Path((id, target)): Path<(String, String)>,
) -> Result<StatusCode, AudonError> {
    let room_id = RoomId::parse(&id)?;
    state
        .coordinator
        .kick(&room_id, &current.user, &target)
        .await?;
    Ok(StatusCode::OK)
}

/// Handler for GET /app/preview/{id}
#[instrument(skip_all, name = "audon.room.preview", fields(room_id = %id))]
pub async fn preview_room(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PreviewResponse>, AudonError> {
    let room_id = RoomId::parse(&id)?;
    Ok(Json(state.coordinator.preview(&room_id).await?))
}
