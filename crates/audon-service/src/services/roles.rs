//! Role and permission transitions: promote, demote, add co-host, kick.
//!
//! All four require a moderator caller and refuse to target the host or an
//! existing co-host. Durable changes (co-hosts, kicked) are written first;
//! the live metadata and participant permission follow.

use crate::errors::AudonError;
use crate::models::{AudonUser, Room};
use crate::observability::metrics;
use crate::services::coordinator::RoomCoordinator;
use crate::services::livekit::ParticipantPermission;
use common::types::RoomId;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleOp {
    Promote,
    Demote,
    AddCohost,
    Kick,
}

impl RoleOp {
    fn as_str(self) -> &'static str {
        match self {
            RoleOp::Promote => "promote",
            RoleOp::Demote => "demote",
            RoleOp::AddCohost => "add_cohost",
            RoleOp::Kick => "kick",
        }
    }
}

fn record<T>(op: RoleOp, result: &Result<T, AudonError>) {
    let status = match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    metrics::record_role_change(op.as_str(), status);
}

fn dual_write_failure(op: RoleOp, room_id: &RoomId, e: &AudonError) -> AudonError {
    metrics::record_dual_write_failure(op.as_str());
    error!(
        target: "audon.services.roles",
        room_id = %room_id,
        operation = op.as_str(),
        error = %e,
        "Live roster update failed after durable write"
    );
    AudonError::Internal
}

/// Outcome of the shared checks.
enum Target {
    Eligible(Room, AudonUser),
    /// Already a co-host; only meaningful for add-cohost.
    AlreadyCohost,
}

impl RoomCoordinator {
    /// Checks shared by every role transition.
    async fn authorize_role_change(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<Target, AudonError> {
        let room = self.load_room(room_id).await?;
        if room.has_ended() {
            return Err(AudonError::Gone("already_ended".to_string()));
        }

        let live_room = self.live_room(room_id).await?;
        let live_cohost = live_room
            .as_ref()
            .is_some_and(|(_, m)| m.room.is_cohost(caller));
        if !room.is_moderator(caller) && !live_cohost {
            return Err(AudonError::Forbidden("operation_not_permitted".to_string()));
        }

        let target = self.find_user(target_id).await?;
        if room.is_host(&target) {
            return Err(AudonError::Forbidden("operation_not_permitted".to_string()));
        }
        let target_cohost = room.is_cohost(&target)
            || live_room
                .as_ref()
                .is_some_and(|(_, m)| m.room.is_cohost(&target));
        if target_cohost {
            return Ok(Target::AlreadyCohost);
        }

        Ok(Target::Eligible(room, target))
    }

    async fn eligible_target(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(Room, AudonUser), AudonError> {
        match self.authorize_role_change(room_id, caller, target_id).await? {
            Target::Eligible(room, target) => Ok((room, target)),
            Target::AlreadyCohost => Err(AudonError::Forbidden("operation_not_permitted".to_string())),
        }
    }

    async fn require_live_participant(
        &self,
        room_id: &RoomId,
        target: &AudonUser,
    ) -> Result<(), AudonError> {
        if self.live.get_room(room_id.as_str()).await?.is_none() {
            return Err(AudonError::NotFound("room_not_live".to_string()));
        }
        if !self
            .is_participant(room_id.as_str(), &target.audon_id)
            .await?
        {
            return Err(AudonError::NotFound("user_not_found".to_string()));
        }
        Ok(())
    }

    /// Give a listener the right to speak.
    #[instrument(skip_all, fields(room_id = %room_id, target = %target_id))]
    pub async fn promote(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let result = self.promote_inner(room_id, caller, target_id).await;
        record(RoleOp::Promote, &result);
        result
    }

    async fn promote_inner(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let (_, target) = self.eligible_target(room_id, caller, target_id).await?;
        self.require_live_participant(room_id, &target).await?;

        self.mutate_metadata(room_id, |metadata| {
            if metadata.add_speaker(&target) {
                Ok(())
            } else {
                Err(AudonError::Conflict("already_speaking".to_string()))
            }
        })
        .await?
        .ok_or_else(|| AudonError::NotFound("room_not_live".to_string()))?;

        self.live
            .update_participant_permission(
                room_id.as_str(),
                &target.audon_id,
                ParticipantPermission::speaker(),
            )
            .await
            .map_err(|e| dual_write_failure(RoleOp::Promote, room_id, &e))?;

        info!(target: "audon.services.roles", room_id = %room_id, audon_id = %target.audon_id, "Promoted to speaker");
        Ok(())
    }

    /// Take speaking rights away from a speaker.
    #[instrument(skip_all, fields(room_id = %room_id, target = %target_id))]
    pub async fn demote(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let result = self.demote_inner(room_id, caller, target_id).await;
        record(RoleOp::Demote, &result);
        result
    }

    async fn demote_inner(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let (_, target) = self.eligible_target(room_id, caller, target_id).await?;

        self.mutate_metadata(room_id, |metadata| {
            metadata.remove_speaker(&target);
            Ok(())
        })
        .await?
        .ok_or_else(|| AudonError::NotFound("room_not_live".to_string()))?;

        if self
            .is_participant(room_id.as_str(), &target.audon_id)
            .await?
        {
            self.live
                .update_participant_permission(
                    room_id.as_str(),
                    &target.audon_id,
                    ParticipantPermission::listener(),
                )
                .await
                .map_err(|e| dual_write_failure(RoleOp::Demote, room_id, &e))?;
        }

        info!(target: "audon.services.roles", room_id = %room_id, audon_id = %target.audon_id, "Demoted to listener");
        Ok(())
    }

    /// Make a user a co-host. Repeating the call is a no-op.
    #[instrument(skip_all, fields(room_id = %room_id, target = %target_id))]
    pub async fn add_cohost(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let result = self.add_cohost_inner(room_id, caller, target_id).await;
        record(RoleOp::AddCohost, &result);
        result
    }

    async fn add_cohost_inner(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let (room, target) = match self.authorize_role_change(room_id, caller, target_id).await? {
            Target::Eligible(room, target) => (room, target),
            Target::AlreadyCohost => return Ok(()),
        };
        if room.is_kicked(&target) {
            return Err(AudonError::Forbidden("kicked".to_string()));
        }

        self.rooms.append_cohost(room_id, &target).await?;

        let mirrored = self
            .mutate_metadata(room_id, |metadata| {
                metadata.add_cohost(&target);
                metadata.remove_speaker(&target);
                Ok(())
            })
            .await
            .map_err(|e| dual_write_failure(RoleOp::AddCohost, room_id, &e))?;

        if mirrored.is_some()
            && self
                .is_participant(room_id.as_str(), &target.audon_id)
                .await?
        {
            self.live
                .update_participant_permission(
                    room_id.as_str(),
                    &target.audon_id,
                    ParticipantPermission::speaker(),
                )
                .await
                .map_err(|e| dual_write_failure(RoleOp::AddCohost, room_id, &e))?;
        }

        info!(target: "audon.services.roles", room_id = %room_id, audon_id = %target.audon_id, "Added co-host");
        Ok(())
    }

    /// Ban a user from the room and evict them if present.
    #[instrument(skip_all, fields(room_id = %room_id, target = %target_id))]
    pub async fn kick(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let result = self.kick_inner(room_id, caller, target_id).await;
        record(RoleOp::Kick, &result);
        result
    }

    async fn kick_inner(
        &self,
        room_id: &RoomId,
        caller: &AudonUser,
        target_id: &str,
    ) -> Result<(), AudonError> {
        let (_, target) = self.eligible_target(room_id, caller, target_id).await?;

        self.rooms.append_kicked(room_id, &target).await?;

        let mirrored = self
            .mutate_metadata(room_id, |metadata| {
                metadata.add_kicked(&target);
                metadata.remove_speaker(&target);
                Ok(())
            })
            .await
            .map_err(|e| dual_write_failure(RoleOp::Kick, room_id, &e))?;

        if mirrored.is_some() {
            self.live
                .remove_participant(room_id.as_str(), &target.audon_id)
                .await
                .map_err(|e| dual_write_failure(RoleOp::Kick, room_id, &e))?;
        }

        info!(target: "audon.services.roles", room_id = %room_id, audon_id = %target.audon_id, "Kicked user");
        Ok(())
    }
}
