//! # Audon Test Utilities
//!
//! Shared test utilities for the Audon service.
//!
//! This crate provides:
//! - Fixtures for users, sessions, profiles, rooms and configuration
//! - `TestEnv`, a coordinator wired to in-memory collaborators
//! - `TestAudonServer` for driving the real router over HTTP
//!
//! ## Usage
//!
//! ```rust,ignore
//! use audon_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let env = TestEnv::new();
//!     let host = env.register("alice").await;
//!     let room = env.coordinator.create_room(&host, create_request("Udon")).await?;
//!     assert!(env.rooms.get(&room.room_id).await.is_some());
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
