//! Live Session Directory client.
//!
//! The live media service exposes room existence, the participant roster,
//! per-participant permission grants and an opaque per-room metadata blob
//! through a JSON-over-HTTP RPC API (`/twirp/livekit.RoomService/<Method>`).
//!
//! # Security
//!
//! - Every call carries a short-lived admin grant signed with the API secret
//! - Timeouts prevent hanging connections
//! - Errors are logged server-side with generic messages returned

use crate::errors::AudonError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::jwt::sign_service_token;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

const LIVE_REQUEST_TIMEOUT_SECS: u64 = 10;

const ROOM_SERVICE_PREFIX: &str = "/twirp/livekit.RoomService";

/// A live room as reported by the live service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveRoom {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: String,
    #[serde(default, alias = "numParticipants")]
    pub num_participants: u32,
}

/// Capabilities of a participant in a live room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantPermission {
    #[serde(default, alias = "canSubscribe")]
    pub can_subscribe: bool,
    #[serde(default, alias = "canPublish")]
    pub can_publish: bool,
    #[serde(default, alias = "canPublishData")]
    pub can_publish_data: bool,
}

impl ParticipantPermission {
    /// Publish, subscribe and data.
    pub fn speaker() -> Self {
        Self {
            can_subscribe: true,
            can_publish: true,
            can_publish_data: true,
        }
    }

    /// Subscribe and data only.
    pub fn listener() -> Self {
        Self {
            can_subscribe: true,
            can_publish: false,
            can_publish_data: true,
        }
    }
}

/// A participant connected to a live room.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveParticipant {
    /// The participant's Audon id.
    #[serde(default)]
    pub identity: String,
    /// User record serialized into the grant at issue time.
    #[serde(default)]
    pub metadata: String,
    #[serde(default)]
    pub permission: Option<ParticipantPermission>,
}

/// Operations consumed from the live media service.
#[async_trait]
pub trait LiveDirectory: Send + Sync {
    async fn create_room(&self, name: &str, metadata: &str) -> Result<LiveRoom, AudonError>;

    /// Deleting a room that does not exist succeeds.
    async fn delete_room(&self, name: &str) -> Result<(), AudonError>;

    /// All live rooms, or only those with the given names.
    async fn list_rooms(&self, names: Option<&[String]>) -> Result<Vec<LiveRoom>, AudonError>;

    async fn list_participants(&self, room: &str) -> Result<Vec<LiveParticipant>, AudonError>;

    async fn update_room_metadata(&self, room: &str, metadata: &str)
        -> Result<LiveRoom, AudonError>;

    async fn update_participant_permission(
        &self,
        room: &str,
        identity: &str,
        permission: ParticipantPermission,
    ) -> Result<LiveParticipant, AudonError>;

    /// Removing an absent participant succeeds.
    async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), AudonError>;

    /// Look up a single live room by name.
    async fn get_room(&self, name: &str) -> Result<Option<LiveRoom>, AudonError> {
        let names = [name.to_string()];
        let rooms = self.list_rooms(Some(&names)).await?;
        Ok(rooms.into_iter().find(|r| r.name == name))
    }
}

// ============================================================================
// Wire bodies
// ============================================================================

#[derive(Serialize)]
struct CreateRoomBody<'a> {
    name: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct RoomBody<'a> {
    room: &'a str,
}

#[derive(Serialize)]
struct ListRoomsBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    names: Option<&'a [String]>,
}

#[derive(Serialize)]
struct RoomMetadataBody<'a> {
    room: &'a str,
    metadata: &'a str,
}

#[derive(Serialize)]
struct ParticipantBody<'a> {
    room: &'a str,
    identity: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    permission: Option<ParticipantPermission>,
}

#[derive(Deserialize)]
struct ListRoomsResponse {
    #[serde(default)]
    rooms: Vec<LiveRoom>,
}

#[derive(Deserialize)]
struct ListParticipantsResponse {
    #[serde(default)]
    participants: Vec<LiveParticipant>,
}

#[derive(Deserialize)]
struct EmptyResponse {}

// ============================================================================
// HTTP client
// ============================================================================

/// HTTP client for the live media service room API.
#[derive(Clone)]
pub struct LiveKitClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl LiveKitClient {
    /// Create a new live service client.
    ///
    /// # Errors
    ///
    /// Returns `AudonError::Internal` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        api_key: String,
        api_secret: SecretString,
    ) -> Result<Self, AudonError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LIVE_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "audon.services.livekit", error = %e, "Failed to build HTTP client");
                AudonError::Internal
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
        })
    }

    /// POST one RPC. Returns `None` when the service reports not-found.
    async fn call<B, R>(
        &self,
        method: &'static str,
        room: Option<&str>,
        body: &B,
    ) -> Result<Option<R>, AudonError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let token = sign_service_token(
            &self.api_key,
            self.api_secret.expose_secret().as_bytes(),
            room,
        )?;
        let url = format!("{}{ROOM_SERVICE_PREFIX}/{method}", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                metrics::record_live_request(method, "error", start.elapsed());
                warn!(target: "audon.services.livekit", method, error = %e, "Live service request failed");
                AudonError::LiveService(format!("{method}: {e}"))
            })?;

        let result = Self::handle_response(method, response).await;
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_live_request(method, status, start.elapsed());
        result
    }

    /// Map live service status codes to errors.
    async fn handle_response<R: DeserializeOwned>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<Option<R>, AudonError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map(Some).map_err(|e| {
                error!(target: "audon.services.livekit", method, error = %e, "Failed to parse live service response");
                AudonError::LiveService(format!("{method}: malformed response"))
            })
        } else if status == StatusCode::NOT_FOUND {
            Ok(None)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(target: "audon.services.livekit", method, status = %status, "Service grant rejected by live service");
            Err(AudonError::LiveService(format!("{method}: {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "audon.services.livekit", method, status = %status, body = %body, "Live service returned error");
            Err(AudonError::LiveService(format!("{method}: {status}")))
        }
    }

    fn not_found(method: &str) -> AudonError {
        AudonError::LiveService(format!("{method}: not found"))
    }
}

#[async_trait]
impl LiveDirectory for LiveKitClient {
    #[instrument(skip(self, metadata), fields(room = %name))]
    async fn create_room(&self, name: &str, metadata: &str) -> Result<LiveRoom, AudonError> {
        self.call("CreateRoom", None, &CreateRoomBody { name, metadata })
            .await?
            .ok_or_else(|| Self::not_found("CreateRoom"))
    }

    #[instrument(skip(self), fields(room = %name))]
    async fn delete_room(&self, name: &str) -> Result<(), AudonError> {
        self.call::<_, EmptyResponse>("DeleteRoom", Some(name), &RoomBody { room: name })
            .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn list_rooms(&self, names: Option<&[String]>) -> Result<Vec<LiveRoom>, AudonError> {
        let response: Option<ListRoomsResponse> =
            self.call("ListRooms", None, &ListRoomsBody { names }).await?;
        Ok(response.map(|r| r.rooms).unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn list_participants(&self, room: &str) -> Result<Vec<LiveParticipant>, AudonError> {
        let response: Option<ListParticipantsResponse> = self
            .call("ListParticipants", Some(room), &RoomBody { room })
            .await?;
        Ok(response.map(|r| r.participants).unwrap_or_default())
    }

    #[instrument(skip(self, metadata))]
    async fn update_room_metadata(
        &self,
        room: &str,
        metadata: &str,
    ) -> Result<LiveRoom, AudonError> {
        self.call(
            "UpdateRoomMetadata",
            Some(room),
            &RoomMetadataBody { room, metadata },
        )
        .await?
        .ok_or_else(|| Self::not_found("UpdateRoomMetadata"))
    }

    #[instrument(skip(self))]
    async fn update_participant_permission(
        &self,
        room: &str,
        identity: &str,
        permission: ParticipantPermission,
    ) -> Result<LiveParticipant, AudonError> {
        self.call(
            "UpdateParticipant",
            Some(room),
            &ParticipantBody {
                room,
                identity,
                permission: Some(permission),
            },
        )
        .await?
        .ok_or_else(|| Self::not_found("UpdateParticipant"))
    }

    #[instrument(skip(self))]
    async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), AudonError> {
        self.call::<_, EmptyResponse>(
            "RemoveParticipant",
            Some(room),
            &ParticipantBody {
                room,
                identity,
                permission: None,
            },
        )
        .await?;
        Ok(())
    }
}

/// In-memory live directory with participant simulation for tests.
pub mod mock {
    use super::*;
    use crate::models::AudonUser;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, Default)]
    struct MockRoom {
        metadata: String,
        participants: Vec<LiveParticipant>,
    }

    impl MockRoom {
        fn to_live(&self, name: &str) -> LiveRoom {
            LiveRoom {
                name: name.to_string(),
                metadata: self.metadata.clone(),
                num_participants: u32::try_from(self.participants.len()).unwrap_or(u32::MAX),
            }
        }
    }

    /// Which call to fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FailOn {
        CreateRoom,
        DeleteRoom,
        ListRooms,
        ListParticipants,
        UpdateRoomMetadata,
        UpdateParticipant,
        RemoveParticipant,
    }

    #[derive(Default)]
    pub struct MockLiveDirectory {
        rooms: Mutex<BTreeMap<String, MockRoom>>,
        pub create_calls: AtomicUsize,
        pub delete_calls: AtomicUsize,
        pub metadata_updates: AtomicUsize,
        pub permission_updates: AtomicUsize,
        pub removals: AtomicUsize,
        fail_create: AtomicBool,
        fail_delete: AtomicBool,
        fail_list_rooms: AtomicBool,
        fail_list_participants: AtomicBool,
        fail_update_metadata: AtomicBool,
        fail_update_participant: AtomicBool,
        fail_remove: AtomicBool,
    }

    impl MockLiveDirectory {
        pub fn new() -> Self {
            Self::default()
        }

        fn flag(&self, on: FailOn) -> &AtomicBool {
            match on {
                FailOn::CreateRoom => &self.fail_create,
                FailOn::DeleteRoom => &self.fail_delete,
                FailOn::ListRooms => &self.fail_list_rooms,
                FailOn::ListParticipants => &self.fail_list_participants,
                FailOn::UpdateRoomMetadata => &self.fail_update_metadata,
                FailOn::UpdateParticipant => &self.fail_update_participant,
                FailOn::RemoveParticipant => &self.fail_remove,
            }
        }

        pub fn set_failing(&self, on: FailOn, fail: bool) {
            self.flag(on).store(fail, Ordering::SeqCst);
        }

        fn check(&self, on: FailOn) -> Result<(), AudonError> {
            if self.flag(on).load(Ordering::SeqCst) {
                return Err(AudonError::LiveService(format!("mock {on:?} failure")));
            }
            Ok(())
        }

        /// Provision a live room directly.
        pub async fn seed_room(&self, name: &str, metadata: &str) {
            self.rooms.lock().await.insert(
                name.to_string(),
                MockRoom {
                    metadata: metadata.to_string(),
                    participants: Vec::new(),
                },
            );
        }

        /// Simulate a client connecting with a grant for `user`.
        pub async fn connect(&self, room: &str, user: &AudonUser) {
            let metadata = serde_json::to_string(user).unwrap_or_default();
            self.connect_raw(room, &user.audon_id, &metadata).await;
        }

        /// Simulate a connection with arbitrary participant metadata.
        pub async fn connect_raw(&self, room: &str, identity: &str, metadata: &str) {
            let mut rooms = self.rooms.lock().await;
            if let Some(r) = rooms.get_mut(room) {
                r.participants.retain(|p| p.identity != identity);
                r.participants.push(LiveParticipant {
                    identity: identity.to_string(),
                    metadata: metadata.to_string(),
                    permission: Some(ParticipantPermission::listener()),
                });
            }
        }

        /// Simulate a client disconnecting.
        pub async fn disconnect(&self, room: &str, identity: &str) {
            if let Some(r) = self.rooms.lock().await.get_mut(room) {
                r.participants.retain(|p| p.identity != identity);
            }
        }

        pub async fn exists(&self, room: &str) -> bool {
            self.rooms.lock().await.contains_key(room)
        }

        pub async fn metadata_of(&self, room: &str) -> Option<String> {
            self.rooms
                .lock()
                .await
                .get(room)
                .map(|r| r.metadata.clone())
        }

        pub async fn permission_of(
            &self,
            room: &str,
            identity: &str,
        ) -> Option<ParticipantPermission> {
            self.rooms
                .lock()
                .await
                .get(room)?
                .participants
                .iter()
                .find(|p| p.identity == identity)?
                .permission
        }

        pub async fn is_connected(&self, room: &str, identity: &str) -> bool {
            self.rooms
                .lock()
                .await
                .get(room)
                .is_some_and(|r| r.participants.iter().any(|p| p.identity == identity))
        }

        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LiveDirectory for MockLiveDirectory {
        async fn create_room(&self, name: &str, metadata: &str) -> Result<LiveRoom, AudonError> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            self.check(FailOn::CreateRoom)?;
            let mut rooms = self.rooms.lock().await;
            let room = rooms.entry(name.to_string()).or_insert_with(|| MockRoom {
                metadata: metadata.to_string(),
                participants: Vec::new(),
            });
            Ok(room.to_live(name))
        }

        async fn delete_room(&self, name: &str) -> Result<(), AudonError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.check(FailOn::DeleteRoom)?;
            self.rooms.lock().await.remove(name);
            Ok(())
        }

        async fn list_rooms(&self, names: Option<&[String]>) -> Result<Vec<LiveRoom>, AudonError> {
            self.check(FailOn::ListRooms)?;
            Ok(self
                .rooms
                .lock()
                .await
                .iter()
                .filter(|(name, _)| names.map_or(true, |n| n.iter().any(|x| x == *name)))
                .map(|(name, room)| room.to_live(name))
                .collect())
        }

        async fn list_participants(&self, room: &str) -> Result<Vec<LiveParticipant>, AudonError> {
            self.check(FailOn::ListParticipants)?;
            Ok(self
                .rooms
                .lock()
                .await
                .get(room)
                .map(|r| r.participants.clone())
                .unwrap_or_default())
        }

        async fn update_room_metadata(
            &self,
            room: &str,
            metadata: &str,
        ) -> Result<LiveRoom, AudonError> {
            self.metadata_updates.fetch_add(1, Ordering::SeqCst);
            self.check(FailOn::UpdateRoomMetadata)?;
            let mut rooms = self.rooms.lock().await;
            let r = rooms
                .get_mut(room)
                .ok_or_else(|| AudonError::LiveService("room not found".to_string()))?;
            r.metadata = metadata.to_string();
            Ok(r.to_live(room))
        }

        async fn update_participant_permission(
            &self,
            room: &str,
            identity: &str,
            permission: ParticipantPermission,
        ) -> Result<LiveParticipant, AudonError> {
            self.permission_updates.fetch_add(1, Ordering::SeqCst);
            self.check(FailOn::UpdateParticipant)?;
            let mut rooms = self.rooms.lock().await;
            let participant = rooms
                .get_mut(room)
                .and_then(|r| r.participants.iter_mut().find(|p| p.identity == identity))
                .ok_or_else(|| AudonError::LiveService("participant not found".to_string()))?;
            participant.permission = Some(permission);
            Ok(participant.clone())
        }

        async fn remove_participant(&self, room: &str, identity: &str) -> Result<(), AudonError> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.check(FailOn::RemoveParticipant)?;
            if let Some(r) = self.rooms.lock().await.get_mut(room) {
                r.participants.retain(|p| p.identity != identity);
            }
            Ok(())
        }
    }
}
