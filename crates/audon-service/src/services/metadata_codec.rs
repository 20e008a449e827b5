//! Room metadata codec.
//!
//! The live room's metadata field carries a JSON `RoomMetadata`. Encoding
//! and decoding are lossless: list order, unknown profile fields and the
//! version counter read back exactly as written.

use crate::errors::AudonError;
use crate::models::RoomMetadata;
use tracing::error;

/// Serialize metadata for the live room.
///
/// # Errors
///
/// Returns `AudonError::Internal` if serialization fails.
pub fn encode(metadata: &RoomMetadata) -> Result<String, AudonError> {
    serde_json::to_string(metadata).map_err(|e| {
        error!(target: "audon.services.metadata", error = %e, "Failed to encode room metadata");
        AudonError::Internal
    })
}

/// Parse the live room's metadata blob.
///
/// # Errors
///
/// Returns `AudonError::LiveService` if the blob is not valid room metadata.
pub fn decode(blob: &str) -> Result<RoomMetadata, AudonError> {
    serde_json::from_str(blob)
        .map_err(|e| AudonError::LiveService(format!("malformed room metadata: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{AudonUser, ProfileSnapshot, Restriction, Room};
    use chrono::{TimeZone, Utc};
    use common::types::RoomId;

    fn user(id: &str) -> AudonUser {
        AudonUser {
            audon_id: id.to_string(),
            remote_id: format!("r{id}"),
            remote_url: format!("https://m.example/@{id}"),
            webfinger: format!("{id}@m.example"),
            avatar_file: None,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn metadata() -> RoomMetadata {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let room = Room {
            room_id: RoomId::parse("abcdefghijklmnopqrstuv").unwrap(),
            title: "うどん night".to_string(),
            description: "slurp".to_string(),
            host: user("host"),
            co_hosts: vec![user("c2"), user("c1")],
            restriction: Restriction::FollowingOrFollower,
            kicked: vec![user("k1")],
            scheduled_at: at,
            created_at: at,
            ended_at: None,
            advertise: Some("ja".to_string()),
        };
        let mut meta = RoomMetadata::from_room(&room);
        meta.speakers = vec![user("s3"), user("s1"), user("s2")];

        let mut extra = serde_json::Map::new();
        extra.insert("emojis".to_string(), serde_json::json!([{"shortcode": "udon"}]));
        meta.accounts.insert(
            "s1".to_string(),
            ProfileSnapshot {
                id: Some("42".to_string()),
                acct: Some("s1".to_string()),
                display_name: Some("Speaker One".to_string()),
                avatar: Some("https://m.example/a.png".to_string()),
                url: None,
                extra,
            },
        );
        meta.version = 7;
        meta
    }

    #[test]
    fn test_round_trip_is_lossless() {
        let meta = metadata();
        let decoded = decode(&encode(&meta).unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_speaker_order_preserved() {
        let decoded = decode(&encode(&metadata()).unwrap()).unwrap();
        let ids: Vec<&str> = decoded.speakers.iter().map(|s| s.audon_id.as_str()).collect();
        assert_eq!(ids, ["s3", "s1", "s2"]);
    }

    #[test]
    fn test_room_fields_are_flattened() {
        let value: serde_json::Value = serde_json::from_str(&encode(&metadata()).unwrap()).unwrap();
        assert_eq!(value["room_id"], "abcdefghijklmnopqrstuv");
        assert_eq!(value["restriction"], "knowing");
        assert!(value["cohosts"].is_array());
        assert_eq!(value["accounts"]["s1"]["displayName"], "Speaker One");
        assert_eq!(value["version"], 7);
    }

    #[test]
    fn test_decode_tolerates_missing_roster() {
        let blob = r#"{
            "room_id": "abcdefghijklmnopqrstuv",
            "title": "t",
            "host": {"audon_id": "h"},
            "scheduled_at": "2024-06-01T12:00:00Z",
            "created_at": "2024-06-01T12:00:00Z"
        }"#;
        let meta = decode(blob).unwrap();
        assert!(meta.speakers.is_empty());
        assert!(meta.accounts.is_empty());
        assert_eq!(meta.version, 0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode("not json").unwrap_err();
        assert!(matches!(err, AudonError::LiveService(_)));
    }
}
