//! Common utilities and types shared across Audon components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for live-session access grants and webhook signatures
pub mod jwt;
