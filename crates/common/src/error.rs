//! Common error types for Audon components.

use thiserror::Error;

/// Common errors that can occur across Audon components
#[derive(Error, Debug)]
pub enum AudonCommonError {
    /// Random number generator failed
    #[error("Randomness unavailable")]
    Randomness,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Token could not be signed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Malformed identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Result type alias using `AudonCommonError`
pub type Result<T> = std::result::Result<T, AudonCommonError>;
