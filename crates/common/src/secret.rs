//! Secret types for values that must never reach logs.
//!
//! Re-exports the [`secrecy`] types used across Audon for the live-service
//! API secret, Mastodon access tokens and the bot token. `SecretString`
//! redacts itself in `Debug`, so structs that derive `Debug` stay safe to
//! trace.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct MastodonSession {
//!     server: String,
//!     access_token: SecretString,
//! }
//!
//! let session = MastodonSession {
//!     server: "https://mastodon.example".to_string(),
//!     access_token: SecretString::from("tok"),
//! };
//! assert!(!format!("{session:?}").contains("tok\""));
//! assert_eq!(session.access_token.expose_secret(), "tok");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Serialize a secret string as its plain value.
///
/// Only for persisting into stores the service owns (the session store).
/// Use with `#[serde(serialize_with = "common::secret::serialize_exposed")]`.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize_exposed<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}
