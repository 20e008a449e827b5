//! Audon Service Library
//!
//! Room Session Coordinator for Audon, a live audio room service for
//! Mastodon users. It keeps the durable room record and the live media
//! service's room roster in step:
//!
//! - Room lifecycle (create, update, lazy live provisioning on first join)
//! - Admission control and live access grants
//! - Speaker, co-host and kick transitions
//! - Idempotent termination from the API, webhooks and the orphan reaper
//! - Webhook reconciliation with debounced avatar restore
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> repositories/*.rs
//!                                       |
//!                                       +-> livekit / mastodon clients
//! ```
//!
//! # Modules
//!
//! - `cache` - Process-scoped ephemeral store (sessions, pending timers)
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Session and metrics middleware
//! - `models` - Data models
//! - `observability` - Metrics
//! - `repositories` - Durable store access
//! - `routes` - Axum router setup
//! - `services` - Coordinator and external collaborators
//! - `tasks` - Delayed re-check primitive and orphan reaper

pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
