//! Process-scoped ephemeral state.
//!
//! Created empty at startup, passed by `Arc` to every component that needs
//! it, and drained at shutdown. Nothing here is persisted; losing it only
//! affects best-effort avatar-restore bookkeeping and orphan reaping.

use crate::models::SessionData;
use crate::tasks::delayed_recheck::DelayedRecheck;
use crate::tasks::orphan_reaper::OrphanReaper;
use moka::sync::Cache;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Upper bound on cached sessions.
const SESSION_CACHE_CAPACITY: u64 = 100_000;

pub struct EphemeralStore {
    /// Last known session per Audon id, populated at join time. Entries
    /// expire after the configured TTL.
    sessions: Cache<String, SessionData>,
    /// Pending avatar restores per Audon id.
    pub avatar_restores: DelayedRecheck,
    /// Provisioned live rooms nobody has joined yet.
    pub orphans: OrphanReaper,
    shutdown: CancellationToken,
}

impl EphemeralStore {
    pub fn new(session_ttl: Duration, disconnect_grace: Duration, orphan_grace: Duration) -> Self {
        let shutdown = CancellationToken::new();
        Self {
            sessions: Cache::builder()
                .max_capacity(SESSION_CACHE_CAPACITY)
                .time_to_live(session_ttl)
                .build(),
            avatar_restores: DelayedRecheck::new(
                "avatar_restore",
                disconnect_grace,
                shutdown.child_token(),
            ),
            orphans: OrphanReaper::new(orphan_grace, shutdown.child_token()),
            shutdown,
        }
    }

    pub fn remember_session(&self, audon_id: &str, session: SessionData) {
        self.sessions.insert(audon_id.to_string(), session);
    }

    pub fn session(&self, audon_id: &str) -> Option<SessionData> {
        self.sessions.get(audon_id)
    }

    pub fn forget_session(&self, audon_id: &str) {
        self.sessions.invalidate(audon_id);
    }

    pub fn is_drained(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Cancel all pending timers and drop cached sessions.
    pub fn drain(&self) {
        let pending = self.avatar_restores.pending_count() + self.orphans.pending_count();
        self.shutdown.cancel();
        self.avatar_restores.drain();
        self.orphans.drain();
        self.sessions.invalidate_all();
        info!(target: "audon.cache", pending_timers = pending, "Ephemeral store drained");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::SecretString;

    fn store() -> EphemeralStore {
        EphemeralStore::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
    }

    fn session(id: &str) -> SessionData {
        SessionData {
            server: "https://m.example".to_string(),
            access_token: SecretString::from("tok"),
            audon_id: id.to_string(),
        }
    }

    #[test]
    fn test_session_cache_round_trip() {
        let store = store();
        assert!(store.session("u1").is_none());

        store.remember_session("u1", session("u1"));
        assert_eq!(store.session("u1").unwrap().audon_id, "u1");

        store.forget_session("u1");
        assert!(store.session("u1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_cancels_timers_and_sessions() {
        let store = store();
        store.remember_session("u1", session("u1"));
        store.avatar_restores.arm("u1", || async {});
        assert_eq!(store.avatar_restores.pending_count(), 1);

        store.drain();
        assert!(store.is_drained());
        assert_eq!(store.avatar_restores.pending_count(), 0);
        assert!(store.session("u1").is_none());
    }
}
