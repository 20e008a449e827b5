//! Room lifecycle: create, update, join, leave and read-side queries.
//!
//! Live rooms are provisioned lazily on the first successful join. The
//! durable write always happens first; a failure pushing the same change to
//! the live room is logged for manual reconciliation and reported as an
//! internal error without rolling the durable write back.

use crate::errors::AudonError;
use crate::models::{
    AudonUser, CoHostRequest, CreateRoomRequest, JoinResponse, LiveRoomResponse, PreviewResponse,
    ProfileSnapshot, Restriction, Role, Room, RoomMetadata, SessionData, UpdateRoomRequest,
    UserStatus, MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS,
};
use crate::observability::metrics;
use crate::services::coordinator::RoomCoordinator;
use crate::services::mastodon::RemoteAccount;
use crate::services::metadata_codec;
use chrono::Utc;
use common::jwt::{sign_access_token, VideoGrant};
use common::secret::ExposeSecret;
use common::types::RoomId;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Longest accepted locale tag for announcements.
const MAX_LOCALE_TAG_LEN: usize = 35;

fn validate_title(title: &str) -> Result<(), AudonError> {
    if title.trim().is_empty()
        || title.chars().count() > MAX_TITLE_CHARS
        || title.chars().any(char::is_control)
    {
        return Err(AudonError::BadRequest("invalid_title".to_string()));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), AudonError> {
    let control = description
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t');
    if description.chars().count() > MAX_DESCRIPTION_CHARS || control {
        return Err(AudonError::BadRequest("invalid_description".to_string()));
    }
    Ok(())
}

fn normalize_locale(advertise: Option<String>) -> Result<Option<String>, AudonError> {
    let Some(tag) = advertise.filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    let valid = tag.len() <= MAX_LOCALE_TAG_LEN
        && tag.split('-').all(|part| {
            !part.is_empty() && part.len() <= 8 && part.bytes().all(|b| b.is_ascii_alphanumeric())
        });
    if !valid {
        return Err(AudonError::BadRequest("invalid_advertise".to_string()));
    }
    Ok(Some(tag))
}

fn validate_cohost_request(request: &CoHostRequest) -> Result<(), AudonError> {
    if request.remote_id.is_empty() || request.remote_url.is_empty() {
        return Err(AudonError::BadRequest("invalid_cohost".to_string()));
    }
    Ok(())
}

impl RoomCoordinator {
    // ========================================================================
    // Create / update
    // ========================================================================

    /// Create a room hosted by `host`.
    #[instrument(skip_all, fields(host = %host.audon_id))]
    pub async fn create_room(
        &self,
        host: &AudonUser,
        request: CreateRoomRequest,
    ) -> Result<Room, AudonError> {
        validate_title(&request.title)?;
        validate_description(&request.description)?;
        let advertise = normalize_locale(request.advertise)?;
        let co_hosts = self.resolve_cohosts(host, &request.co_hosts).await?;

        let now = Utc::now();
        let scheduled_at = match request.scheduled_at {
            Some(at) if at > now => at,
            _ => {
                self.collect_abandoned_instant_rooms(&host.audon_id).await;
                now
            }
        };

        let room = Room {
            room_id: RoomId::generate()?,
            title: request.title,
            description: request.description,
            host: host.clone(),
            co_hosts,
            restriction: request.restriction,
            kicked: Vec::new(),
            scheduled_at,
            created_at: now,
            ended_at: None,
            advertise,
        };

        self.rooms.insert(&room).await?;
        metrics::record_room_transition("created", "api");
        info!(
            target: "audon.services.lifecycle",
            room_id = %room.room_id,
            instant = room.is_instant(),
            "Room created"
        );

        Ok(room)
    }

    /// Resolve co-hosts by federated identity. Registered users are stored
    /// with their full record, others as remote references.
    async fn resolve_cohosts(
        &self,
        host: &AudonUser,
        requests: &[CoHostRequest],
    ) -> Result<Vec<AudonUser>, AudonError> {
        let mut co_hosts: Vec<AudonUser> = Vec::with_capacity(requests.len());

        for request in requests {
            validate_cohost_request(request)?;
            let user = match self
                .users
                .find_by_remote(&request.remote_id, &request.remote_url)
                .await?
            {
                Some(user) => user,
                None => AudonUser {
                    audon_id: String::new(),
                    remote_id: request.remote_id.clone(),
                    remote_url: request.remote_url.clone(),
                    webfinger: request.webfinger.clone(),
                    avatar_file: None,
                    created_at: Utc::now(),
                },
            };

            if user.same_as(host) {
                return Err(AudonError::BadRequest("host_cannot_be_cohost".to_string()));
            }
            if !co_hosts.iter().any(|c| c.same_as(&user)) {
                co_hosts.push(user);
            }
        }

        Ok(co_hosts)
    }

    /// Delete the host's unfinished instant rooms that nobody is in.
    /// Best effort: failures are logged and never block creation.
    async fn collect_abandoned_instant_rooms(&self, host_audon_id: &str) {
        let candidates = match self.rooms.find_open_instant_rooms(host_audon_id).await {
            Ok(candidates) if !candidates.is_empty() => candidates,
            Ok(_) => return,
            Err(e) => {
                warn!(target: "audon.services.lifecycle", error = %e, "Instant room lookup failed");
                return;
            }
        };

        let names: Vec<String> = candidates
            .iter()
            .map(|r| r.room_id.as_str().to_string())
            .collect();
        let live_rooms = match self.live.list_rooms(Some(&names)).await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(target: "audon.services.lifecycle", error = %e, "Live room listing failed, skipping cleanup");
                return;
            }
        };

        let mut doomed = Vec::new();
        for room in candidates {
            let name = room.room_id.as_str();
            if !live_rooms.iter().any(|l| l.name == name) {
                doomed.push(room.room_id);
                continue;
            }
            match self.live.list_participants(name).await {
                Ok(participants) if participants.is_empty() => {
                    if let Err(e) = self.live.delete_room(name).await {
                        warn!(target: "audon.services.lifecycle", room_id = %name, error = %e, "Failed to delete empty live room");
                        continue;
                    }
                    self.store.orphans.forget(name);
                    doomed.push(room.room_id);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "audon.services.lifecycle", room_id = %name, error = %e, "Participant listing failed, keeping room");
                }
            }
        }

        if doomed.is_empty() {
            return;
        }
        match self.rooms.delete_many(&doomed).await {
            Ok(deleted) => {
                for _ in 0..deleted {
                    metrics::record_room_transition("gc_deleted", "api");
                }
                info!(target: "audon.services.lifecycle", deleted, "Removed abandoned instant rooms");
            }
            Err(e) => {
                warn!(target: "audon.services.lifecycle", error = %e, "Failed to remove abandoned instant rooms");
            }
        }
    }

    /// Apply a host-only patch of title, description and restriction.
    #[instrument(skip_all, fields(room_id = %room_id, audon_id = %caller.audon_id))]
    pub async fn update_room(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        patch: UpdateRoomRequest,
    ) -> Result<Room, AudonError> {
        if !patch.has_changes() {
            return Err(AudonError::BadRequest("empty_update".to_string()));
        }
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        if let Some(description) = &patch.description {
            validate_description(description)?;
        }

        let room = self.load_room(room_id).await?;
        if room.has_ended() {
            return Err(AudonError::Gone("already_ended".to_string()));
        }
        if !room.is_host(caller) {
            return Err(AudonError::Forbidden("operation_not_permitted".to_string()));
        }

        let updated = self
            .rooms
            .update_details(room_id, &patch)
            .await?
            .ok_or_else(|| AudonError::NotFound("room_not_found".to_string()))?;

        let mirrored = self
            .mutate_metadata(room_id, |metadata| {
                patch.apply(&mut metadata.room);
                Ok(())
            })
            .await;
        if let Err(e) = mirrored {
            metrics::record_dual_write_failure("update_room");
            error!(
                target: "audon.services.lifecycle",
                room_id = %room_id,
                operation = "update_room",
                error = %e,
                "Durable update succeeded but live metadata push failed"
            );
            return Err(AudonError::Internal);
        }

        Ok(updated)
    }

    // ========================================================================
    // Join / leave
    // ========================================================================

    /// Admit `caller` and issue a live grant, provisioning the live room on
    /// first join.
    #[instrument(skip_all, fields(room_id = %room_id, audon_id = %caller.audon_id))]
    pub async fn join(
        self: &Arc<Self>,
        room_id: &RoomId,
        caller: &AudonUser,
        session: &SessionData,
        profile: ProfileSnapshot,
    ) -> Result<JoinResponse, AudonError> {
        if profile.avatar.as_deref().map_or(true, str::is_empty) {
            return Err(AudonError::BadRequest("invalid_profile".to_string()));
        }

        let room = self.load_room(room_id).await?;
        let live = self.live_room(room_id).await?;
        let metadata = live.as_ref().map(|(_, m)| m);

        let admission = self.evaluate(&room, metadata, caller, session).await;
        if let crate::services::Admission::Denied(reason) = admission {
            return Err(reason.into());
        }

        let elsewhere = self
            .live_rooms_of(&caller.audon_id)
            .await?
            .into_iter()
            .any(|r| r.name != room_id.as_str());
        if elsewhere {
            return Err(AudonError::Conflict("already_in_room".to_string()));
        }

        let role = Role::of(&room, metadata, caller);
        let token = self.issue_grant(room_id, caller, admission.can_publish())?;

        match live {
            None => self.provision_live_room(room, caller, profile).await?,
            Some(_) => self.record_profile(room_id, caller, profile).await?,
        }

        self.store.remember_session(&caller.audon_id, session.clone());
        if self.store.avatar_restores.cancel(&caller.audon_id) {
            info!(target: "audon.services.lifecycle", audon_id = %caller.audon_id, "Rejoin cancelled pending avatar restore");
        }

        Ok(JoinResponse {
            url: self.settings.live_public_url.clone(),
            token,
            audon: caller.clone(),
            role,
        })
    }

    fn issue_grant(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        can_publish: bool,
    ) -> Result<String, AudonError> {
        let identity_snapshot = serde_json::to_string(caller).map_err(|e| {
            error!(target: "audon.services.lifecycle", error = %e, "Failed to encode grant metadata");
            AudonError::Internal
        })?;

        Ok(sign_access_token(
            &self.settings.live_api_key,
            self.settings.live_api_secret.expose_secret().as_bytes(),
            &caller.audon_id,
            VideoGrant::join(room_id.as_str(), can_publish),
            Some(identity_snapshot),
            self.settings.grant_ttl,
        )?)
    }

    async fn provision_live_room(
        self: &Arc<Self>,
        room: Room,
        caller: &AudonUser,
        profile: ProfileSnapshot,
    ) -> Result<(), AudonError> {
        self.rooms.mark_activated(&room.room_id, Utc::now()).await?;

        let mut metadata = RoomMetadata::from_room(&room);
        metadata
            .accounts
            .insert(caller.audon_id.clone(), profile.clone());
        metadata.version = 1;
        let blob = metadata_codec::encode(&metadata)?;

        match self.live.create_room(room.room_id.as_str(), &blob).await {
            Ok(created) if created.metadata == blob => {
                metrics::record_room_transition("provisioned", "api");
                info!(target: "audon.services.lifecycle", room_id = %room.room_id, "Live room provisioned");
                self.arm_orphan_reaper(&room.room_id);
                Ok(())
            }
            Ok(_) => {
                // Another join provisioned it first.
                self.record_profile(&room.room_id, caller, profile).await
            }
            Err(e) => {
                if self.live.get_room(room.room_id.as_str()).await?.is_some() {
                    return self.record_profile(&room.room_id, caller, profile).await;
                }
                warn!(target: "audon.services.lifecycle", room_id = %room.room_id, error = %e, "Live room creation failed");
                Err(AudonError::Conflict("live_room_unavailable".to_string()))
            }
        }
    }

    async fn record_profile(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        profile: ProfileSnapshot,
    ) -> Result<(), AudonError> {
        self.mutate_metadata(room_id, |metadata| {
            metadata
                .accounts
                .insert(caller.audon_id.clone(), profile.clone());
            Ok(())
        })
        .await?
        .map(|_| ())
        .ok_or_else(|| AudonError::Conflict("live_room_unavailable".to_string()))
    }

    /// Client-side notification that the caller left. Arms the same delayed
    /// avatar restore as the participant-left webhook.
    #[instrument(skip_all, fields(audon_id = %caller.audon_id))]
    pub async fn leave(
        self: &Arc<Self>,
        caller: &AudonUser,
        session: &SessionData,
    ) -> Result<(), AudonError> {
        if self.is_live_anywhere(&caller.audon_id).await? {
            return Err(AudonError::Conflict("still_in_room".to_string()));
        }
        self.store
            .remember_session(&caller.audon_id, session.clone());
        self.schedule_avatar_restore(&caller.audon_id);
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Public view of a live room open to everyone.
    #[instrument(skip(self))]
    pub async fn preview(&self, room_id: &RoomId) -> Result<PreviewResponse, AudonError> {
        let room = self.load_room(room_id).await?;
        if room.has_ended() {
            return Err(AudonError::Gone("already_ended".to_string()));
        }
        let Some((_, metadata)) = self.live_room(room_id).await? else {
            return Err(AudonError::NotFound("room_not_live".to_string()));
        };
        if metadata.room.restriction != Restriction::Everyone {
            return Err(AudonError::Forbidden("restricted".to_string()));
        }

        let participants: BTreeMap<String, AudonUser> = self
            .live
            .list_participants(room_id.as_str())
            .await?
            .into_iter()
            .filter_map(|p| match serde_json::from_str::<AudonUser>(&p.metadata) {
                Ok(user) => Some((p.identity, user)),
                Err(_) => {
                    warn!(target: "audon.services.lifecycle", identity = %p.identity, "Skipping participant with unreadable metadata");
                    None
                }
            })
            .collect();

        Ok(PreviewResponse {
            room_info: metadata,
            participants,
        })
    }

    /// The caller's current live rooms and role in each.
    #[instrument(skip_all, fields(audon_id = %caller.audon_id))]
    pub async fn status(&self, caller: &AudonUser) -> Result<Vec<UserStatus>, AudonError> {
        let rooms = self.live_rooms_of(&caller.audon_id).await?;
        Ok(rooms
            .into_iter()
            .filter_map(|live| match metadata_codec::decode(&live.metadata) {
                Ok(metadata) => Some(UserStatus {
                    role: Role::of(&metadata.room, Some(&metadata), caller),
                    room_id: live.name,
                }),
                Err(e) => {
                    warn!(target: "audon.services.lifecycle", room = %live.name, error = %e, "Skipping room with unreadable metadata");
                    None
                }
            })
            .collect())
    }

    /// The live room most recently hosted by the user with this handle.
    #[instrument(skip(self))]
    pub async fn live_room_of(&self, webfinger: &str) -> Result<LiveRoomResponse, AudonError> {
        let webfinger = webfinger.strip_prefix('@').unwrap_or(webfinger);
        let valid = webfinger
            .split_once('@')
            .is_some_and(|(user, domain)| !user.is_empty() && domain.contains('.'));
        if !valid {
            return Err(AudonError::BadRequest("invalid_webfinger".to_string()));
        }

        let host = self
            .users
            .find_by_webfinger(webfinger)
            .await?
            .ok_or_else(|| AudonError::NotFound("user_not_found".to_string()))?;

        let not_live = || AudonError::NotFound("room_not_live".to_string());
        let room = self
            .rooms
            .latest_hosted_by(&host.audon_id)
            .await?
            .filter(|r| !r.has_ended())
            .ok_or_else(not_live)?;
        if self.live.get_room(room.room_id.as_str()).await?.is_none() {
            return Err(not_live());
        }

        Ok(LiveRoomResponse {
            room_id: room.room_id,
            title: room.title,
        })
    }

    /// Check the session's token still resolves to the stored user.
    #[instrument(skip_all, fields(audon_id = %caller.audon_id))]
    pub async fn verify_session(
        &self,
        caller: &AudonUser,
        session: &SessionData,
    ) -> Result<RemoteAccount, AudonError> {
        let account = self.identity.resolve_current_user(session).await?;
        if account.id != caller.remote_id {
            return Err(AudonError::InvalidSession("login_required".to_string()));
        }
        Ok(account)
    }
}
