//! Admission control.
//!
//! Decides whether a caller may join a room and whether they may speak.
//! Relationship lookups that fail or come back ambiguous deny admission.

use crate::errors::AudonError;
use crate::models::{AudonUser, Relationship, Restriction, Room, RoomMetadata, SessionData};
use crate::observability::metrics;
use crate::services::coordinator::RoomCoordinator;
use chrono::Utc;
use tracing::{instrument, warn};

/// Why a caller was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotYetStarted,
    Ended,
    Kicked,
    Restricted(Restriction),
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::NotYetStarted => "not_yet_started",
            DenyReason::Ended => "already_ended",
            DenyReason::Kicked => "kicked",
            DenyReason::Restricted(_) => "restricted",
        }
    }
}

impl From<DenyReason> for AudonError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::NotYetStarted => AudonError::Conflict(reason.as_str().to_string()),
            DenyReason::Ended => AudonError::Gone(reason.as_str().to_string()),
            DenyReason::Kicked => AudonError::Forbidden(reason.as_str().to_string()),
            DenyReason::Restricted(restriction) => {
                AudonError::Forbidden(restriction.as_str().to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Listener,
    Speaker,
    Denied(DenyReason),
}

impl Admission {
    pub fn can_publish(self) -> bool {
        matches!(self, Admission::Speaker)
    }

    fn label(self) -> (&'static str, &'static str) {
        match self {
            Admission::Listener => ("listener", "admitted"),
            Admission::Speaker => ("speaker", "admitted"),
            Admission::Denied(reason) => ("denied", reason.as_str()),
        }
    }
}

/// Apply a restriction to a relationship lookup result. A missing
/// relationship only satisfies `everyone`.
pub fn restriction_permits(restriction: Restriction, relationship: Option<&Relationship>) -> bool {
    match restriction {
        Restriction::Everyone => true,
        Restriction::Private => false,
        restricted => relationship.is_some_and(|rel| restricted.permits(rel)),
    }
}

impl RoomCoordinator {
    /// Evaluate `caller` against `room`. `metadata` is the live projection
    /// when the room is live.
    #[instrument(skip_all, fields(room_id = %room.room_id, audon_id = %caller.audon_id))]
    pub async fn evaluate(
        &self,
        room: &Room,
        metadata: Option<&RoomMetadata>,
        caller: &AudonUser,
        session: &SessionData,
    ) -> Admission {
        let admission = self.evaluate_admission(room, metadata, caller, session).await;
        let (outcome, reason) = admission.label();
        metrics::record_admission(outcome, reason);
        admission
    }

    async fn evaluate_admission(
        &self,
        room: &Room,
        metadata: Option<&RoomMetadata>,
        caller: &AudonUser,
        session: &SessionData,
    ) -> Admission {
        if !room.has_started(Utc::now()) {
            return Admission::Denied(DenyReason::NotYetStarted);
        }
        if room.has_ended() {
            return Admission::Denied(DenyReason::Ended);
        }
        let kicked_live = metadata.is_some_and(|m| m.room.is_kicked(caller));
        if room.is_kicked(caller) || kicked_live {
            return Admission::Denied(DenyReason::Kicked);
        }

        if room.is_moderator(caller) {
            return Admission::Speaker;
        }

        let restriction = room.restriction;
        let relationship = if restriction.needs_relationship() {
            match self.identity.relationship(session, &room.host.webfinger).await {
                Ok(relationship) => relationship,
                Err(e) => {
                    warn!(
                        target: "audon.services.admission",
                        room_id = %room.room_id,
                        error = %e,
                        "Relationship lookup failed, denying"
                    );
                    None
                }
            }
        } else {
            None
        };

        if !restriction_permits(restriction, relationship.as_ref()) {
            return Admission::Denied(DenyReason::Restricted(restriction));
        }

        if metadata.is_some_and(|m| m.is_speaker(caller)) {
            Admission::Speaker
        } else {
            Admission::Listener
        }
    }
}
