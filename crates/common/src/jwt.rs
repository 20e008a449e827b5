//! Live-session access grants and webhook signatures.
//!
//! The live media service authenticates both directions with HS256 JWTs keyed
//! by a shared API key/secret pair:
//!
//! - Participants present an access grant issued by Audon (`sign_access_token`).
//! - Audon's own admin calls carry a short-lived service grant (`sign_service_token`).
//! - Webhook deliveries carry a token whose `sha256` claim binds it to the body
//!   (`verify_webhook`).

use crate::error::{AudonCommonError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::digest::{digest, SHA256};
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted webhook token size in bytes.
pub const MAX_WEBHOOK_TOKEN_BYTES: usize = 8192;

/// Lifetime of grants used for Audon's own admin calls.
pub const SERVICE_TOKEN_TTL: Duration = Duration::from_secs(600);

/// Errors from webhook signature verification.
///
/// All variants render the same message; detail goes to debug logs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookAuthError {
    #[error("webhook signature is invalid")]
    TokenTooLarge,

    #[error("webhook signature is invalid")]
    InvalidToken,

    #[error("webhook signature is invalid")]
    IssuerMismatch,

    #[error("webhook signature is invalid")]
    BodyMismatch,
}

/// Capabilities granted to a participant within one live room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_join: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_admin: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_list: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub room_create: bool,
    #[serde(default)]
    pub can_publish: bool,
    #[serde(default)]
    pub can_publish_data: bool,
    #[serde(default)]
    pub can_subscribe: bool,
}

impl VideoGrant {
    /// Grant for a participant joining `room`.
    #[must_use]
    pub fn join(room: &str, can_publish: bool) -> Self {
        Self {
            room: Some(room.to_string()),
            room_join: true,
            can_publish,
            can_publish_data: true,
            can_subscribe: true,
            ..Self::default()
        }
    }

    /// Grant for server-side administration, optionally scoped to one room.
    #[must_use]
    pub fn admin(room: Option<&str>) -> Self {
        Self {
            room: room.map(str::to_string),
            room_admin: true,
            room_list: true,
            room_create: true,
            ..Self::default()
        }
    }
}

/// Claims of an access grant.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// API key the grant was signed with.
    pub iss: String,
    /// Participant identity (the Audon user id).
    pub sub: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
    /// Opaque participant metadata (the serialized user).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

impl fmt::Debug for AccessTokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenClaims")
            .field("iss", &self.iss)
            .field("sub", &self.sub)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .field("video", &self.video)
            .field("metadata", &self.metadata.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Claims carried by a webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookClaims {
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    /// Base64 (standard alphabet) SHA-256 of the request body.
    pub sha256: String,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

/// Sign an access grant for `identity`.
///
/// # Errors
///
/// Returns `AudonCommonError::Signing` if encoding fails.
pub fn sign_access_token(
    api_key: &str,
    api_secret: &[u8],
    identity: &str,
    grant: VideoGrant,
    metadata: Option<String>,
    ttl: Duration,
) -> Result<String> {
    let now = unix_now();
    let claims = AccessTokenClaims {
        iss: api_key.to_string(),
        sub: identity.to_string(),
        nbf: now,
        exp: now.saturating_add(ttl_seconds(ttl)),
        video: grant,
        metadata,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(api_secret),
    )
    .map_err(|e| AudonCommonError::Signing(e.to_string()))
}

/// Sign a short-lived admin grant for calls to the live service API.
///
/// # Errors
///
/// Returns `AudonCommonError::Signing` if encoding fails.
pub fn sign_service_token(api_key: &str, api_secret: &[u8], room: Option<&str>) -> Result<String> {
    sign_access_token(
        api_key,
        api_secret,
        "audon",
        VideoGrant::admin(room),
        None,
        SERVICE_TOKEN_TTL,
    )
}

/// Decode an access grant. Used by tests and diagnostics.
///
/// # Errors
///
/// Returns `AudonCommonError::Signing` when the signature or expiry is invalid.
pub fn decode_access_token(token: &str, api_secret: &[u8]) -> Result<AccessTokenClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_nbf = true;
    decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(api_secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| AudonCommonError::Signing(e.to_string()))
}

/// Base64 (standard alphabet) SHA-256 of `body`.
#[must_use]
pub fn body_digest(body: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, body).as_ref())
}

/// Verify that `token` was issued by the live service for exactly `body`.
///
/// # Errors
///
/// Returns a `WebhookAuthError` if the token is oversized, badly signed,
/// expired, issued under another key or bound to a different body.
pub fn verify_webhook(
    token: &str,
    body: &[u8],
    api_key: &str,
    api_secret: &[u8],
) -> std::result::Result<WebhookClaims, WebhookAuthError> {
    if token.len() > MAX_WEBHOOK_TOKEN_BYTES {
        tracing::debug!(target: "common.jwt", len = token.len(), "Webhook token too large");
        return Err(WebhookAuthError::TokenTooLarge);
    }

    let validation = Validation::new(Algorithm::HS256);
    let claims = decode::<WebhookClaims>(token, &DecodingKey::from_secret(api_secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Webhook token rejected");
            WebhookAuthError::InvalidToken
        })?
        .claims;

    if claims.iss != api_key {
        tracing::debug!(target: "common.jwt", "Webhook token issuer mismatch");
        return Err(WebhookAuthError::IssuerMismatch);
    }

    let expected = body_digest(body);
    if !digest_matches(api_secret, &claims.sha256, &expected) {
        tracing::debug!(target: "common.jwt", "Webhook body digest mismatch");
        return Err(WebhookAuthError::BodyMismatch);
    }

    Ok(claims)
}

/// Constant-time digest comparison via `hmac::verify`.
fn digest_matches(api_secret: &[u8], claimed: &str, expected: &str) -> bool {
    let key = hmac::Key::new(hmac::HMAC_SHA256, api_secret);
    let tag = hmac::sign(&key, expected.as_bytes());
    hmac::verify(&key, claimed.as_bytes(), tag.as_ref()).is_ok()
}

/// Sign a webhook token the way the live service does. Test support.
///
/// # Errors
///
/// Returns `AudonCommonError::Signing` if encoding fails.
pub fn sign_webhook(api_key: &str, api_secret: &[u8], body: &[u8]) -> Result<String> {
    let now = unix_now();
    let claims = WebhookClaims {
        iss: api_key.to_string(),
        exp: now.saturating_add(300),
        nbf: Some(now),
        sha256: body_digest(body),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(api_secret),
    )
    .map_err(|e| AudonCommonError::Signing(e.to_string()))
}
