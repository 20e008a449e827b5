//! Common data types for Audon components.

use crate::error::{AudonCommonError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of random bytes behind a room identifier.
pub const ROOM_ID_ENTROPY_BYTES: usize = 16;

/// Encoded length of a room identifier (unpadded base64url of 16 bytes).
pub const ROOM_ID_LEN: usize = 22;

/// Unique, unguessable identifier for a room.
///
/// Generated once at creation from the system CSPRNG and never reused.
/// Doubles as the live room name in the Live Session Directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh room identifier.
    ///
    /// # Errors
    ///
    /// Returns `AudonCommonError::Randomness` if the system RNG fails.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; ROOM_ID_ENTROPY_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| AudonCommonError::Randomness)?;
        Ok(Self(URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Parse and validate an identifier received from a caller.
    ///
    /// # Errors
    ///
    /// Returns `AudonCommonError::InvalidIdentifier` on wrong length or alphabet.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() != ROOM_ID_LEN {
            return Err(AudonCommonError::InvalidIdentifier(
                "room id has wrong length".to_string(),
            ));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(AudonCommonError::InvalidIdentifier(
                "room id contains invalid characters".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = AudonCommonError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
