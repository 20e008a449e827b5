//! Service layer for the Audon service.
//!
//! # Components
//!
//! - `livekit` - Live Session Directory client (rooms, roster, grants, metadata)
//! - `mastodon` - Identity Gateway and profile client for the user's home server
//! - `session_store` - HTTP session data written by the login flow
//! - `metadata_codec` - Live room metadata (de)serialization
//! - `coordinator` - Room Session Coordinator shared state and helpers
//! - `admission`, `room_lifecycle`, `roles`, `termination`, `reconciliation` -
//!   the coordinator's state transitions

pub mod admission;
pub mod coordinator;
pub mod livekit;
pub mod mastodon;
pub mod metadata_codec;
pub mod reconciliation;
pub mod roles;
pub mod room_lifecycle;
pub mod session_store;
pub mod termination;

pub use admission::{Admission, DenyReason};
pub use coordinator::{Collaborators, CoordinatorSettings, RoomCoordinator};
pub use livekit::{LiveDirectory, LiveKitClient};
pub use mastodon::{IdentityGateway, MastodonClient, ProfileClient};
pub use reconciliation::WebhookOutcome;
pub use session_store::{RedisSessionStore, SessionStore};
pub use termination::{EndOutcome, EndTrigger};
