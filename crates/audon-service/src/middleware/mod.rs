//! Middleware for the Audon service.
//!
//! # Components
//!
//! - `auth` - Session middleware for protected routes
//! - `http_metrics` - HTTP request metrics middleware

pub mod auth;
pub mod http_metrics;

pub use auth::{require_session, CurrentUser, SESSION_COOKIE};
pub use http_metrics::http_metrics_middleware;
