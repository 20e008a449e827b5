//! Webhook reconciliation.
//!
//! Applies lifecycle events reported by the live media service. Each event
//! re-runs the authoritative transition rather than trusting the live view,
//! so duplicated or reordered deliveries converge on the same state. There
//! is no caller to report failures to; they are logged and counted.

use crate::errors::AudonError;
use crate::models::{Restriction, Room, WebhookEvent};
use crate::observability::metrics;
use crate::services::coordinator::RoomCoordinator;
use crate::services::termination::{EndOutcome, EndTrigger};
use common::types::RoomId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

pub const EVENT_ROOM_STARTED: &str = "room_started";
pub const EVENT_ROOM_FINISHED: &str = "room_finished";
pub const EVENT_PARTICIPANT_JOINED: &str = "participant_joined";
pub const EVENT_PARTICIPANT_LEFT: &str = "participant_left";

/// What a webhook delivery resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Ended,
    AlreadyEnded,
    /// The departed identity is not a registered user.
    UnknownUser,
    /// The user is still present in some live room.
    StillLive,
    /// No cached session to act with.
    StaleSession,
    RestoreScheduled,
    Joined,
    Announced,
    NotAnnounced,
    Ignored,
    Failed,
}

impl WebhookOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookOutcome::Ended => "ended",
            WebhookOutcome::AlreadyEnded => "already_ended",
            WebhookOutcome::UnknownUser => "unknown_user",
            WebhookOutcome::StillLive => "still_live",
            WebhookOutcome::StaleSession => "stale_session",
            WebhookOutcome::RestoreScheduled => "restore_scheduled",
            WebhookOutcome::Joined => "joined",
            WebhookOutcome::Announced => "announced",
            WebhookOutcome::NotAnnounced => "not_announced",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Failed => "failed",
        }
    }
}

/// Public announcement posted when an advertised room goes live.
pub fn announcement_text(room: &Room, local_domain: &str) -> String {
    let webfinger = &room.host.webfinger;
    let mut parts = vec![
        format!("@{webfinger} is streaming now!"),
        format!(
            ":udon: {}\n🎙️ https://{local_domain}/u/@{webfinger}",
            room.title
        ),
    ];
    if !room.description.is_empty() {
        parts.push(room.description.clone());
    }
    parts.push("#Audon".to_string());
    parts.join("\n\n")
}

/// A plain file name with no path components.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

impl RoomCoordinator {
    /// Apply a verified webhook event.
    #[instrument(skip_all, fields(event = %event.event))]
    pub async fn handle_webhook(self: &Arc<Self>, event: &WebhookEvent) -> WebhookOutcome {
        let outcome = match event.event.as_str() {
            EVENT_ROOM_FINISHED => self.on_room_finished(event).await,
            EVENT_PARTICIPANT_LEFT => self.on_participant_left(event).await,
            EVENT_PARTICIPANT_JOINED => self.on_participant_joined(event),
            EVENT_ROOM_STARTED => self.on_room_started(event).await,
            _ => WebhookOutcome::Ignored,
        };

        metrics::record_webhook_event(&event.event, outcome.as_str());
        debug!(target: "audon.services.reconciliation", event = %event.event, outcome = outcome.as_str(), "Webhook handled");
        outcome
    }

    fn webhook_room_id(event: &WebhookEvent) -> Option<RoomId> {
        let name = event.room_name()?;
        match RoomId::parse(name) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(target: "audon.services.reconciliation", room = %name, "Webhook for unrecognised room name");
                None
            }
        }
    }

    async fn on_room_finished(&self, event: &WebhookEvent) -> WebhookOutcome {
        let Some(room_id) = Self::webhook_room_id(event) else {
            return WebhookOutcome::Ignored;
        };

        match self.end_by_id(&room_id, EndTrigger::Webhook).await {
            Ok(EndOutcome::Ended) => WebhookOutcome::Ended,
            Ok(EndOutcome::AlreadyEnded) => WebhookOutcome::AlreadyEnded,
            Err(e) => {
                error!(target: "audon.services.reconciliation", room_id = %room_id, error = %e, "Failed to end finished room");
                WebhookOutcome::Failed
            }
        }
    }

    async fn on_participant_left(self: &Arc<Self>, event: &WebhookEvent) -> WebhookOutcome {
        let Some(identity) = event.identity() else {
            return WebhookOutcome::Ignored;
        };

        let user = match self.users.find_by_id(identity).await {
            Ok(Some(user)) => user,
            Ok(None) => return WebhookOutcome::UnknownUser,
            Err(e) => {
                error!(target: "audon.services.reconciliation", audon_id = %identity, error = %e, "User lookup failed");
                return WebhookOutcome::Failed;
            }
        };

        match self.is_live_anywhere(&user.audon_id).await {
            Ok(true) => return WebhookOutcome::StillLive,
            Ok(false) => {}
            Err(e) => {
                error!(target: "audon.services.reconciliation", audon_id = %user.audon_id, error = %e, "Presence check failed");
                return WebhookOutcome::Failed;
            }
        }

        if self.store.session(&user.audon_id).is_none() {
            info!(target: "audon.services.reconciliation", audon_id = %user.audon_id, "No cached session, skipping avatar restore");
            return WebhookOutcome::StaleSession;
        }

        self.schedule_avatar_restore(&user.audon_id);
        WebhookOutcome::RestoreScheduled
    }

    fn on_participant_joined(&self, event: &WebhookEvent) -> WebhookOutcome {
        if let Some(name) = event.room_name() {
            if self.store.orphans.clear(name) {
                debug!(target: "audon.services.reconciliation", room = %name, "Room no longer orphaned");
            }
        }
        if let Some(identity) = event.identity() {
            self.store.avatar_restores.cancel(identity);
        }
        WebhookOutcome::Joined
    }

    async fn on_room_started(&self, event: &WebhookEvent) -> WebhookOutcome {
        let Some(room_id) = Self::webhook_room_id(event) else {
            return WebhookOutcome::Ignored;
        };

        let room = match self.rooms.find_by_id(&room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => return WebhookOutcome::Ignored,
            Err(e) => {
                error!(target: "audon.services.reconciliation", room_id = %room_id, error = %e, "Room lookup failed");
                return WebhookOutcome::Failed;
            }
        };

        let language = match room.advertise.as_deref() {
            Some(language) if !language.is_empty() => language,
            _ => return WebhookOutcome::NotAnnounced,
        };
        if room.restriction != Restriction::Everyone || !self.settings.announcements_enabled {
            return WebhookOutcome::NotAnnounced;
        }

        let text = announcement_text(&room, &self.settings.local_domain);
        match self.profiles.post_announcement(&text, language).await {
            Ok(()) => {
                info!(target: "audon.services.reconciliation", room_id = %room_id, "Announced room");
                WebhookOutcome::Announced
            }
            Err(e) => {
                warn!(target: "audon.services.reconciliation", room_id = %room_id, error = %e, "Announcement failed");
                WebhookOutcome::Failed
            }
        }
    }

    /// Arm (or re-arm) the delayed avatar restore for a user.
    pub fn schedule_avatar_restore(self: &Arc<Self>, audon_id: &str) {
        let this = Arc::clone(self);
        let id = audon_id.to_string();
        self.store.avatar_restores.arm(audon_id, move || async move {
            if let Err(e) = this.restore_avatar_if_absent(&id).await {
                warn!(target: "audon.services.reconciliation", audon_id = %id, error = %e, "Avatar restore failed");
            }
        });
    }

    /// Restore the user's original avatar if they are still absent from
    /// every live room. Returns true if a restore was performed.
    #[instrument(skip(self))]
    pub async fn restore_avatar_if_absent(&self, audon_id: &str) -> Result<bool, AudonError> {
        if self.is_live_anywhere(audon_id).await? {
            metrics::record_avatar_restore("skipped_present");
            return Ok(false);
        }

        let Some(user) = self.users.find_by_id(audon_id).await? else {
            return Ok(false);
        };
        let Some(file) = user.avatar_file.as_deref() else {
            metrics::record_avatar_restore("no_avatar");
            return Ok(false);
        };
        let Some(session) = self.store.session(audon_id) else {
            metrics::record_avatar_restore("no_session");
            return Ok(false);
        };

        if !is_plain_file_name(file) || !is_plain_file_name(audon_id) {
            warn!(target: "audon.services.reconciliation", audon_id = %audon_id, "Refusing suspicious avatar path");
            metrics::record_avatar_restore("invalid_path");
            return Ok(false);
        }
        let path: PathBuf = self
            .settings
            .storage_dir
            .join(audon_id)
            .join("avatar")
            .join(file);

        if let Err(e) = self.profiles.restore_avatar(&session, &path).await {
            metrics::record_avatar_restore("failed");
            return Err(e);
        }

        self.users.clear_avatar(audon_id).await?;
        metrics::record_avatar_restore("restored");
        info!(target: "audon.services.reconciliation", audon_id = %audon_id, "Original avatar restored");
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::AudonUser;
    use chrono::Utc;

    fn room(description: &str) -> Room {
        Room {
            room_id: RoomId::generate().unwrap(),
            title: "Udon talk".to_string(),
            description: description.to_string(),
            host: AudonUser {
                audon_id: "host".to_string(),
                remote_id: "1".to_string(),
                remote_url: "https://m.example/@alice".to_string(),
                webfinger: "alice@m.example".to_string(),
                avatar_file: None,
                created_at: Utc::now(),
            },
            co_hosts: Vec::new(),
            restriction: Restriction::Everyone,
            kicked: Vec::new(),
            scheduled_at: Utc::now(),
            created_at: Utc::now(),
            ended_at: None,
            advertise: Some("en".to_string()),
        }
    }

    #[test]
    fn test_announcement_with_description() {
        let text = announcement_text(&room("Noodles all day"), "audon.example");
        assert_eq!(
            text,
            "@alice@m.example is streaming now!\n\n\
             :udon: Udon talk\n🎙️ https://audon.example/u/@alice@m.example\n\n\
             Noodles all day\n\n\
             #Audon"
        );
    }

    #[test]
    fn test_announcement_without_description() {
        let text = announcement_text(&room(""), "audon.example");
        assert!(text.ends_with("@alice@m.example\n\n#Audon"));
        assert_eq!(text.matches("\n\n").count(), 2);
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("a1b2.webp"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("dir/file.png"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(WebhookOutcome::RestoreScheduled.as_str(), "restore_scheduled");
        assert_eq!(WebhookOutcome::AlreadyEnded.as_str(), "already_ended");
    }
}
