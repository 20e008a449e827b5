//! Room Session Coordinator.
//!
//! Owns the collaborators (durable store, live directory, identity gateway,
//! profile client) and the ephemeral store. The state transitions live in
//! sibling modules as further `impl RoomCoordinator` blocks so that API
//! calls and webhook events share exactly one code path per transition.

use crate::cache::EphemeralStore;
use crate::config::Config;
use crate::errors::AudonError;
use crate::models::{AudonUser, Room, RoomMetadata};
use crate::repositories::{RoomRepository, UserRepository};
use crate::services::livekit::{LiveDirectory, LiveRoom};
use crate::services::mastodon::{IdentityGateway, ProfileClient};
use crate::services::metadata_codec;
use common::secret::SecretString;
use common::types::RoomId;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts at a metadata read-modify-write before reporting a conflict.
pub const DEFAULT_METADATA_RETRY_LIMIT: usize = 3;

/// External collaborators behind their traits.
#[derive(Clone)]
pub struct Collaborators {
    pub rooms: Arc<dyn RoomRepository>,
    pub users: Arc<dyn UserRepository>,
    pub live: Arc<dyn LiveDirectory>,
    pub identity: Arc<dyn IdentityGateway>,
    pub profiles: Arc<dyn ProfileClient>,
}

/// Coordinator settings derived from `Config`.
#[derive(Clone)]
pub struct CoordinatorSettings {
    /// Live service URL handed to clients with their grant.
    pub live_public_url: String,
    pub live_api_key: String,
    pub live_api_secret: SecretString,
    pub grant_ttl: Duration,
    /// Public domain used in announcement links.
    pub local_domain: String,
    /// Root of the cached original avatars.
    pub storage_dir: PathBuf,
    pub announcements_enabled: bool,
    pub metadata_retry_limit: usize,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            live_public_url: config.livekit_public_url.clone(),
            live_api_key: config.livekit_api_key.clone(),
            live_api_secret: config.livekit_api_secret.clone(),
            grant_ttl: config.grant_ttl(),
            local_domain: config.local_domain.clone(),
            storage_dir: config.storage_dir.clone(),
            announcements_enabled: config.bot.is_some(),
            metadata_retry_limit: DEFAULT_METADATA_RETRY_LIMIT,
        }
    }
}

pub struct RoomCoordinator {
    pub(crate) rooms: Arc<dyn RoomRepository>,
    pub(crate) users: Arc<dyn UserRepository>,
    pub(crate) live: Arc<dyn LiveDirectory>,
    pub(crate) identity: Arc<dyn IdentityGateway>,
    pub(crate) profiles: Arc<dyn ProfileClient>,
    pub(crate) settings: CoordinatorSettings,
    pub(crate) store: Arc<EphemeralStore>,
}

impl RoomCoordinator {
    pub fn new(
        collaborators: Collaborators,
        settings: CoordinatorSettings,
        store: Arc<EphemeralStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: collaborators.rooms,
            users: collaborators.users,
            live: collaborators.live,
            identity: collaborators.identity,
            profiles: collaborators.profiles,
            settings,
            store,
        })
    }

    pub fn store(&self) -> &Arc<EphemeralStore> {
        &self.store
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Durable store connectivity, for the health endpoint.
    pub async fn ping(&self) -> Result<(), AudonError> {
        self.rooms.ping().await
    }

    pub(crate) async fn load_room(&self, room_id: &RoomId) -> Result<Room, AudonError> {
        self.rooms
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| AudonError::NotFound("room_not_found".to_string()))
    }

    /// The live room and its decoded metadata, if the room is live.
    pub(crate) async fn live_room(
        &self,
        room_id: &RoomId,
    ) -> Result<Option<(LiveRoom, RoomMetadata)>, AudonError> {
        let Some(live) = self.live.get_room(room_id.as_str()).await? else {
            return Ok(None);
        };
        let metadata = metadata_codec::decode(&live.metadata)?;
        Ok(Some((live, metadata)))
    }

    /// Live rooms in which `audon_id` is currently a participant.
    pub(crate) async fn live_rooms_of(&self, audon_id: &str) -> Result<Vec<LiveRoom>, AudonError> {
        let mut present = Vec::new();
        for room in self.live.list_rooms(None).await? {
            if self.is_participant(&room.name, audon_id).await? {
                present.push(room);
            }
        }
        Ok(present)
    }

    pub(crate) async fn is_live_anywhere(&self, audon_id: &str) -> Result<bool, AudonError> {
        Ok(!self.live_rooms_of(audon_id).await?.is_empty())
    }

    pub(crate) async fn is_participant(&self, room: &str, audon_id: &str) -> Result<bool, AudonError> {
        Ok(self
            .live
            .list_participants(room)
            .await?
            .iter()
            .any(|p| p.identity == audon_id))
    }

    /// Read-modify-write of the live room's metadata.
    ///
    /// The version read is compared against a fresh read just before the
    /// push; if another writer moved it the mutation is re-applied to the
    /// newer metadata. Returns `None` if the room is not live.
    pub(crate) async fn mutate_metadata<F>(
        &self,
        room_id: &RoomId,
        mut mutate: F,
    ) -> Result<Option<RoomMetadata>, AudonError>
    where
        F: FnMut(&mut RoomMetadata) -> Result<(), AudonError> + Send,
    {
        let name = room_id.as_str();

        for attempt in 1..=self.settings.metadata_retry_limit {
            let Some(live) = self.live.get_room(name).await? else {
                return Ok(None);
            };
            let mut metadata = metadata_codec::decode(&live.metadata)?;
            let read_version = metadata.version;

            mutate(&mut metadata)?;
            metadata.version = read_version.saturating_add(1);

            let Some(current) = self.live.get_room(name).await? else {
                return Ok(None);
            };
            let current_version = metadata_codec::decode(&current.metadata)?.version;
            if current_version != read_version {
                debug!(
                    target: "audon.services.coordinator",
                    room_id = %room_id,
                    attempt,
                    read_version,
                    current_version,
                    "Metadata moved under us, retrying"
                );
                continue;
            }

            self.live
                .update_room_metadata(name, &metadata_codec::encode(&metadata)?)
                .await?;
            return Ok(Some(metadata));
        }

        warn!(target: "audon.services.coordinator", room_id = %room_id, "Metadata update kept racing");
        Err(AudonError::Conflict("concurrent_update".to_string()))
    }

    /// Find a registered user.
    pub async fn find_user(&self, audon_id: &str) -> Result<AudonUser, AudonError> {
        self.users
            .find_by_id(audon_id)
            .await?
            .ok_or_else(|| AudonError::NotFound("user_not_found".to_string()))
    }
}
