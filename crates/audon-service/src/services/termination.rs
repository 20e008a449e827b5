//! Room termination.
//!
//! A room ends exactly once. The explicit close call, the `room_finished`
//! webhook and the orphan reaper all funnel into [`RoomCoordinator::end`],
//! whose durable write is conditional on the room still being open.

use crate::errors::AudonError;
use crate::models::{AudonUser, Room};
use crate::observability::metrics;
use crate::services::coordinator::RoomCoordinator;
use chrono::Utc;
use common::types::RoomId;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    AlreadyEnded,
}

/// What caused a room to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTrigger {
    Api,
    Webhook,
    Reaper,
}

impl EndTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            EndTrigger::Api => "api",
            EndTrigger::Webhook => "webhook",
            EndTrigger::Reaper => "reaper",
        }
    }
}

impl RoomCoordinator {
    /// Close a room on behalf of a moderator.
    #[instrument(skip_all, fields(room_id = %room_id, audon_id = %caller.audon_id))]
    pub async fn close_room(&self, room_id: &RoomId, caller: &AudonUser) -> Result<(), AudonError> {
        let room = self.load_room(room_id).await?;
        if room.has_ended() {
            return Err(AudonError::Gone("already_ended".to_string()));
        }
        if !room.is_moderator(caller) {
            return Err(AudonError::Forbidden("operation_not_permitted".to_string()));
        }

        match self.end(&room, EndTrigger::Api).await? {
            EndOutcome::Ended => Ok(()),
            // Lost the race against a webhook or the reaper.
            EndOutcome::AlreadyEnded => Err(AudonError::Gone("already_ended".to_string())),
        }
    }

    /// End a room by id. Unknown rooms are reported as already ended.
    pub async fn end_by_id(
        &self,
        room_id: &RoomId,
        trigger: EndTrigger,
    ) -> Result<EndOutcome, AudonError> {
        match self.rooms.find_by_id(room_id).await? {
            Some(room) => self.end(&room, trigger).await,
            None => Ok(EndOutcome::AlreadyEnded),
        }
    }

    /// Stamp `ended_at` and tear down the live room.
    #[instrument(skip_all, fields(room_id = %room.room_id, trigger = trigger.as_str()))]
    pub async fn end(&self, room: &Room, trigger: EndTrigger) -> Result<EndOutcome, AudonError> {
        if room.has_ended() {
            return Ok(EndOutcome::AlreadyEnded);
        }

        let stamped = self.rooms.set_ended(&room.room_id, Utc::now()).await?;
        self.store.orphans.forget(room.room_id.as_str());
        if !stamped {
            return Ok(EndOutcome::AlreadyEnded);
        }
        metrics::record_room_transition("ended", trigger.as_str());
        info!(target: "audon.services.termination", room_id = %room.room_id, trigger = trigger.as_str(), "Room ended");

        let name = room.room_id.as_str();
        let teardown = match self.live.get_room(name).await {
            Ok(Some(_)) => self.live.delete_room(name).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = teardown {
            metrics::record_dual_write_failure("end_room");
            error!(
                target: "audon.services.termination",
                room_id = %room.room_id,
                operation = "end_room",
                error = %e,
                "Room ended durably but live room teardown failed"
            );
            return Err(AudonError::Internal);
        }

        Ok(EndOutcome::Ended)
    }
}
