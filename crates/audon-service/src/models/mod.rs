//! Data models for the Audon service.
//!
//! Durable entities (`AudonUser`, `Room`), the live projection carried in the
//! live room's metadata blob (`RoomMetadata`), derived roles, and the HTTP
//! request/response bodies.

use chrono::{DateTime, Utc};
use common::secret::{serialize_exposed, SecretString};
use common::types::RoomId;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 100;

/// Maximum description length in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

// ============================================================================
// Users
// ============================================================================

/// A registered (or, as a pending co-host, not yet registered) Audon user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudonUser {
    /// Durable internal identity. Empty for co-hosts who never signed in.
    #[serde(default)]
    pub audon_id: String,

    /// Account id on the user's home server.
    #[serde(default)]
    pub remote_id: String,

    /// Account URL on the user's home server.
    #[serde(default)]
    pub remote_url: String,

    /// `user@domain` handle.
    #[serde(default)]
    pub webfinger: String,

    /// File name of the locally cached original avatar, if one is held.
    #[serde(
        rename = "avatar",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_file: Option<String>,

    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl AudonUser {
    /// Two references denote the same user if their Audon ids match, or if
    /// they point at the same remote account.
    pub fn same_as(&self, other: &AudonUser) -> bool {
        if !self.audon_id.is_empty() && self.audon_id == other.audon_id {
            return true;
        }
        !self.remote_id.is_empty()
            && self.remote_id == other.remote_id
            && self.remote_url == other.remote_url
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn contains(list: &[AudonUser], user: &AudonUser) -> bool {
    list.iter().any(|u| u.same_as(user))
}

// ============================================================================
// Rooms
// ============================================================================

/// Who may join a room besides its host and co-hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Restriction {
    #[default]
    Everyone,
    /// Only accounts the host follows.
    Following,
    /// Only accounts following the host.
    Follower,
    #[serde(rename = "knowing")]
    FollowingOrFollower,
    Mutual,
    Private,
}

impl Restriction {
    pub const ALL: [Restriction; 6] = [
        Restriction::Everyone,
        Restriction::Following,
        Restriction::Follower,
        Restriction::FollowingOrFollower,
        Restriction::Mutual,
        Restriction::Private,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Restriction::Everyone => "everyone",
            Restriction::Following => "following",
            Restriction::Follower => "follower",
            Restriction::FollowingOrFollower => "knowing",
            Restriction::Mutual => "mutual",
            Restriction::Private => "private",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }

    /// Whether admission needs a relationship lookup against the host.
    pub fn needs_relationship(self) -> bool {
        matches!(
            self,
            Restriction::Following
                | Restriction::Follower
                | Restriction::FollowingOrFollower
                | Restriction::Mutual
        )
    }

    /// Apply the restriction to the host's relationship with the caller.
    ///
    /// `relationship` is seen from the caller's side: `followed_by` means the
    /// host follows the caller.
    pub fn permits(self, relationship: &Relationship) -> bool {
        match self {
            Restriction::Everyone => true,
            Restriction::Following => relationship.followed_by,
            Restriction::Follower => relationship.following,
            Restriction::FollowingOrFollower => {
                relationship.followed_by || relationship.following
            }
            Restriction::Mutual => relationship.followed_by && relationship.following,
            Restriction::Private => false,
        }
    }
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable room record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: RoomId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub host: AudonUser,
    /// Append-only, never contains the host.
    #[serde(rename = "cohosts", default)]
    pub co_hosts: Vec<AudonUser>,
    #[serde(default)]
    pub restriction: Restriction,
    /// Append-only for the room's lifetime.
    #[serde(default)]
    pub kicked: Vec<AudonUser>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set exactly once when the room ends.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Locale tag; when set the room is announced on activation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise: Option<String>,
}

impl Room {
    pub fn is_host(&self, user: &AudonUser) -> bool {
        self.host.same_as(user)
    }

    pub fn is_cohost(&self, user: &AudonUser) -> bool {
        contains(&self.co_hosts, user)
    }

    /// Host or co-host.
    pub fn is_moderator(&self, user: &AudonUser) -> bool {
        self.is_host(user) || self.is_cohost(user)
    }

    pub fn is_kicked(&self, user: &AudonUser) -> bool {
        contains(&self.kicked, user)
    }

    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    /// Instant rooms are created for immediate use.
    pub fn is_instant(&self) -> bool {
        self.scheduled_at == self.created_at
    }
}

// ============================================================================
// Live projection
// ============================================================================

/// Snapshot of a participant's remote profile taken at join time.
///
/// Unknown fields are kept so the blob round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acct: Option<String>,
    #[serde(
        rename = "displayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Roster-carrying blob attached to the live room.
///
/// Source of truth for `speakers` while the live room exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMetadata {
    #[serde(flatten)]
    pub room: Room,
    #[serde(default)]
    pub speakers: Vec<AudonUser>,
    /// Profile snapshots keyed by Audon id.
    #[serde(default)]
    pub accounts: BTreeMap<String, ProfileSnapshot>,
    /// Bumped on every push to the live service.
    #[serde(default)]
    pub version: u64,
}

impl RoomMetadata {
    /// Fresh projection of a durable room at first provisioning.
    pub fn from_room(room: &Room) -> Self {
        Self {
            room: room.clone(),
            speakers: Vec::new(),
            accounts: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn is_speaker(&self, user: &AudonUser) -> bool {
        contains(&self.speakers, user)
    }

    /// Returns false if the user was already a speaker.
    pub fn add_speaker(&mut self, user: &AudonUser) -> bool {
        if self.is_speaker(user) {
            return false;
        }
        self.speakers.push(user.clone());
        true
    }

    /// Returns true if the user was a speaker.
    pub fn remove_speaker(&mut self, user: &AudonUser) -> bool {
        let before = self.speakers.len();
        self.speakers.retain(|s| !s.same_as(user));
        before != self.speakers.len()
    }

    pub fn add_cohost(&mut self, user: &AudonUser) {
        if !self.room.is_cohost(user) {
            self.room.co_hosts.push(user.clone());
        }
    }

    pub fn add_kicked(&mut self, user: &AudonUser) {
        if !self.room.is_kicked(user) {
            self.room.kicked.push(user.clone());
        }
    }
}

/// A user's role in a room, derived in the order host, co-host, speaker, listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    #[serde(rename = "cohost")]
    CoHost,
    Speaker,
    Listener,
}

impl Role {
    pub fn of(room: &Room, metadata: Option<&RoomMetadata>, user: &AudonUser) -> Role {
        if room.is_host(user) {
            Role::Host
        } else if room.is_cohost(user) {
            Role::CoHost
        } else if metadata.is_some_and(|m| m.is_speaker(user)) {
            Role::Speaker
        } else {
            Role::Listener
        }
    }

    pub fn can_publish(self) -> bool {
        !matches!(self, Role::Listener)
    }
}

// ============================================================================
// Identity Gateway data
// ============================================================================

/// Relationship between the caller and another account, from the caller's side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// The caller follows the other account.
    #[serde(default)]
    pub following: bool,
    /// The other account follows the caller.
    #[serde(default)]
    pub followed_by: bool,
}

/// Session data written by the login flow and read from the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Base URL of the user's Mastodon server.
    pub server: String,
    #[serde(serialize_with = "serialize_exposed")]
    pub access_token: SecretString,
    pub audon_id: String,
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// Co-host named at creation by remote identity.
#[derive(Debug, Clone, Deserialize)]
pub struct CoHostRequest {
    pub remote_id: String,
    pub remote_url: String,
    #[serde(default)]
    pub webfinger: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub restriction: Restriction,
    #[serde(default, rename = "cohosts")]
    pub co_hosts: Vec<CoHostRequest>,
    /// Absent or past means an instant room.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub advertise: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRoomRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub restriction: Option<Restriction>,
}

impl UpdateRoomRequest {
    pub fn has_changes(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.restriction.is_some()
    }

    /// Apply the patch to a room (durable or live copy).
    pub fn apply(&self, room: &mut Room) {
        if let Some(title) = &self.title {
            room.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            room.description.clone_from(description);
        }
        if let Some(restriction) = self.restriction {
            room.restriction = restriction;
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinResponse {
    /// Live media service URL for the client.
    pub url: String,
    pub token: String,
    pub audon: AudonUser,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewResponse {
    #[serde(rename = "roomInfo")]
    pub room_info: RoomMetadata,
    pub participants: BTreeMap<String, AudonUser>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserStatus {
    #[serde(rename = "roomID")]
    pub room_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveRoomResponse {
    pub room_id: RoomId,
    pub title: String,
}

/// Response for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

// ============================================================================
// Webhook payload
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookRoom {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookParticipant {
    #[serde(default)]
    pub identity: String,
}

/// Lifecycle event delivered by the live media service.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub room: Option<WebhookRoom>,
    #[serde(default)]
    pub participant: Option<WebhookParticipant>,
}

impl WebhookEvent {
    pub fn room_name(&self) -> Option<&str> {
        self.room
            .as_ref()
            .map(|r| r.name.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn identity(&self) -> Option<&str> {
        self.participant
            .as_ref()
            .map(|p| p.identity.as_str())
            .filter(|i| !i.is_empty())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn user(audon_id: &str, remote_id: &str) -> AudonUser {
        AudonUser {
            audon_id: audon_id.to_string(),
            remote_id: remote_id.to_string(),
            remote_url: format!("https://m.example/@{remote_id}"),
            webfinger: format!("{remote_id}@m.example"),
            avatar_file: None,
            created_at: Utc::now(),
        }
    }

    fn room() -> Room {
        let now = Utc::now();
        Room {
            room_id: RoomId::parse("abcdefghijklmnopqrstuv").unwrap(),
            title: "Morning udon".to_string(),
            description: String::new(),
            host: user("host", "h1"),
            co_hosts: vec![user("co", "c1")],
            restriction: Restriction::Everyone,
            kicked: vec![],
            scheduled_at: now,
            created_at: now,
            ended_at: None,
            advertise: None,
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    #[test]
    fn test_same_as_by_audon_id() {
        let a = user("u1", "r1");
        let mut b = user("u1", "other");
        b.remote_url = "https://elsewhere.example".to_string();
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_same_as_by_remote_identity() {
        let registered = user("u1", "r1");
        let mut pending = user("", "r1");
        pending.audon_id.clear();
        assert!(pending.same_as(&registered));
        assert!(registered.same_as(&pending));
    }

    #[test]
    fn test_empty_ids_never_match() {
        let mut a = user("", "");
        a.remote_url.clear();
        let b = a.clone();
        assert!(!a.same_as(&b));
    }

    #[test]
    fn test_empty_avatar_reads_as_none() {
        let json = r#"{"audon_id":"u1","remote_id":"r","remote_url":"x","webfinger":"a@b","avatar":""}"#;
        let u: AudonUser = serde_json::from_str(json).unwrap();
        assert!(u.avatar_file.is_none());
    }

    // ========================================================================
    // Restrictions and roles
    // ========================================================================

    #[test]
    fn test_restriction_wire_names() {
        assert_eq!(
            serde_json::to_string(&Restriction::FollowingOrFollower).unwrap(),
            "\"knowing\""
        );
        let r: Restriction = serde_json::from_str("\"mutual\"").unwrap();
        assert_eq!(r, Restriction::Mutual);
        assert_eq!(Restriction::parse("knowing"), Some(Restriction::FollowingOrFollower));
        assert_eq!(Restriction::parse("friends"), None);
    }

    #[test]
    fn test_relationship_needed_only_for_graph_restrictions() {
        assert!(!Restriction::Everyone.needs_relationship());
        assert!(!Restriction::Private.needs_relationship());
        assert!(Restriction::Mutual.needs_relationship());
    }

    #[test]
    fn test_role_derivation_order() {
        let room = room();
        let mut meta = RoomMetadata::from_room(&room);
        let speaker = user("s1", "s1");
        meta.add_speaker(&speaker);

        assert_eq!(Role::of(&room, Some(&meta), &room.host), Role::Host);
        assert_eq!(Role::of(&room, Some(&meta), &user("co", "c1")), Role::CoHost);
        assert_eq!(Role::of(&room, Some(&meta), &speaker), Role::Speaker);
        assert_eq!(Role::of(&room, None, &speaker), Role::Listener);
        assert_eq!(Role::of(&room, Some(&meta), &user("x", "x")), Role::Listener);
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::CoHost).unwrap(), "\"cohost\"");
        assert_eq!(serde_json::to_string(&Role::Listener).unwrap(), "\"listener\"");
    }

    // ========================================================================
    // Metadata roster helpers
    // ========================================================================

    #[test]
    fn test_speaker_set_semantics() {
        let mut meta = RoomMetadata::from_room(&room());
        let s = user("s1", "s1");
        assert!(meta.add_speaker(&s));
        assert!(!meta.add_speaker(&s));
        assert_eq!(meta.speakers.len(), 1);
        assert!(meta.remove_speaker(&s));
        assert!(!meta.remove_speaker(&s));
    }

    #[test]
    fn test_kicked_and_cohosts_append_once() {
        let mut meta = RoomMetadata::from_room(&room());
        let k = user("k1", "k1");
        meta.add_kicked(&k);
        meta.add_kicked(&k);
        meta.add_cohost(&user("co", "c1"));
        assert_eq!(meta.room.kicked.len(), 1);
        assert_eq!(meta.room.co_hosts.len(), 1);
    }

    #[test]
    fn test_update_request_apply() {
        let mut r = room();
        let patch = UpdateRoomRequest {
            title: Some("Evening udon".to_string()),
            description: None,
            restriction: Some(Restriction::Mutual),
        };
        assert!(patch.has_changes());
        patch.apply(&mut r);
        assert_eq!(r.title, "Evening udon");
        assert_eq!(r.restriction, Restriction::Mutual);
        assert!(!UpdateRoomRequest::default().has_changes());
    }

    #[test]
    fn test_session_data_round_trips_token() {
        use common::secret::ExposeSecret;
        let session = SessionData {
            server: "https://m.example".to_string(),
            access_token: SecretString::from("tok"),
            audon_id: "u1".to_string(),
        };
        let json = serde_json::to_string(&session).unwrap();
        let back: SessionData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.access_token.expose_secret(), "tok");
        assert!(!format!("{back:?}").contains("\"tok\""));
    }

    #[test]
    fn test_webhook_event_accessors() {
        let json = r#"{"event":"participant_left","room":{"name":"r1"},"participant":{"identity":"u1"}}"#;
        let event: WebhookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.room_name(), Some("r1"));
        assert_eq!(event.identity(), Some("u1"));

        let bare: WebhookEvent = serde_json::from_str(r#"{"event":"room_started"}"#).unwrap();
        assert_eq!(bare.room_name(), None);
        assert_eq!(bare.identity(), None);
    }
}
