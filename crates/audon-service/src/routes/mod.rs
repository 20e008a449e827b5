//! HTTP routes for the Audon service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_session};
use crate::services::{RoomCoordinator, SessionStore};
use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Room Session Coordinator.
    pub coordinator: Arc<RoomCoordinator>,

    /// HTTP session data written by the login flow.
    pub sessions: Arc<dyn SessionStore>,
}

/// Build the application routes.
///
/// - `/health`, `/metrics` - operational, public
/// - `/app/webhook` - live service webhooks, signature checked in the handler
/// - `/app/preview/{id}` - public room preview
/// - `/app/verify` and everything under `/api` - session required
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/app/webhook", post(handlers::receive_webhook))
        .route("/app/preview/:id", get(handlers::preview_room))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/app/verify", get(handlers::verify_session))
        .route("/api/room", post(handlers::create_room))
        .route(
            "/api/room/:id",
            patch(handlers::update_room).delete(handlers::close_room),
        )
        .route("/api/room/:id/join", post(handlers::join_room))
        .route(
            "/api/room/:id/speakers/:user",
            put(handlers::promote_speaker).delete(handlers::demote_speaker),
        )
        .route("/api/room/:id/cohosts/:user", put(handlers::add_cohost))
        .route("/api/room/:id/kicked/:user", put(handlers::kick_user))
        .route("/api/leave", post(handlers::leave))
        .route("/api/status", get(handlers::status))
        .route("/api/user/:id", get(handlers::get_user))
        .route("/api/live/:webfinger", get(handlers::live_room_of))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
