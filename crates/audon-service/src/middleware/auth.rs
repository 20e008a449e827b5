//! Session middleware for protected routes.
//!
//! Reads the session id from a Bearer token or the session cookie, loads the
//! session data written by the login flow, resolves the stored user and
//! injects both into request extensions as [`CurrentUser`].

use crate::errors::AudonError;
use crate::models::{AudonUser, SessionData};
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "audon_session";

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: AudonUser,
    pub session: SessionData,
}

fn login_required() -> AudonError {
    AudonError::InvalidSession("login_required".to_string())
}

/// Session id from `Authorization: Bearer <id>` or the session cookie.
fn session_id(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Reject requests without a valid session.
///
/// # Response
///
/// - 401 with `login_required` if the session is missing, unknown or
///   belongs to no registered user
/// - otherwise continues with [`CurrentUser`] in extensions
#[instrument(skip_all, name = "audon.middleware.auth")]
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AudonError> {
    let id = session_id(req.headers()).ok_or_else(|| {
        debug!(target: "audon.middleware.auth", "No session presented");
        login_required()
    })?;

    let session = state.sessions.load(&id).await?.ok_or_else(|| {
        debug!(target: "audon.middleware.auth", "Unknown session");
        login_required()
    })?;

    let user = match state.coordinator.find_user(&session.audon_id).await {
        Ok(user) => user,
        Err(AudonError::NotFound(_)) => return Err(login_required()),
        Err(e) => return Err(e),
    };

    req.extensions_mut().insert(CurrentUser { user, session });
    Ok(next.run(req).await)
}
