//! Orphan room reaper.
//!
//! A live room provisioned by a join is marked orphaned and a grace timer is
//! armed. A participant-joined event clears the mark. When the timer fires
//! the room is ended only if it is still marked and the live service reports
//! nobody in it.
//!
//! # Graceful Shutdown
//!
//! Timers hang off the ephemeral store's shutdown token and stop when the
//! store is drained.

use crate::errors::AudonError;
use crate::services::coordinator::RoomCoordinator;
use crate::services::termination::{EndOutcome, EndTrigger};
use crate::tasks::delayed_recheck::DelayedRecheck;
use common::types::RoomId;
use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub struct OrphanReaper {
    recheck: DelayedRecheck,
    marked: DashSet<String>,
}

impl OrphanReaper {
    pub fn new(grace: Duration, shutdown: CancellationToken) -> Self {
        Self {
            recheck: DelayedRecheck::new("orphan_reaper", grace, shutdown),
            marked: DashSet::new(),
        }
    }

    /// Mark `room` orphaned and arm its grace timer.
    pub fn mark<F, Fut>(&self, room: &str, check: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.marked.insert(room.to_string());
        self.recheck.arm(room, check);
    }

    /// Clear the orphan mark. The timer stays armed and finds nothing to do.
    pub fn clear(&self, room: &str) -> bool {
        self.marked.remove(room).is_some()
    }

    pub fn is_marked(&self, room: &str) -> bool {
        self.marked.contains(room)
    }

    /// Drop all bookkeeping for an ended room.
    pub fn forget(&self, room: &str) {
        self.marked.remove(room);
        self.recheck.cancel(room);
    }

    pub fn pending_count(&self) -> usize {
        self.recheck.pending_count()
    }

    pub fn grace(&self) -> Duration {
        self.recheck.delay()
    }

    pub fn drain(&self) {
        self.recheck.drain();
        self.marked.clear();
    }
}

impl RoomCoordinator {
    /// Start the grace window for a freshly provisioned live room.
    pub(crate) fn arm_orphan_reaper(self: &Arc<Self>, room_id: &RoomId) {
        let this = Arc::clone(self);
        let id = room_id.clone();
        debug!(
            target: "audon.task.orphan_reaper",
            room_id = %room_id,
            grace_secs = self.store.orphans.grace().as_secs(),
            "Armed orphan reaper"
        );
        self.store.orphans.mark(room_id.as_str(), move || async move {
            if let Err(e) = this.reap_if_orphaned(&id).await {
                error!(target: "audon.task.orphan_reaper", room_id = %id, error = %e, "Orphan check failed");
            }
        });
    }

    /// End the room if nobody ever joined it. Returns true if it was ended.
    ///
    /// A failed check drops the mark; the room is left to the webhooks.
    #[instrument(skip(self), fields(room_id = %room_id))]
    pub async fn reap_if_orphaned(&self, room_id: &RoomId) -> Result<bool, AudonError> {
        let name = room_id.as_str();
        if !self.store.orphans.is_marked(name) {
            return Ok(false);
        }

        let result = self.reap_marked(room_id).await;
        if result.is_err() {
            self.store.orphans.clear(name);
        }
        result
    }

    async fn reap_marked(&self, room_id: &RoomId) -> Result<bool, AudonError> {
        let name = room_id.as_str();
        if !self.live.list_participants(name).await?.is_empty() {
            self.store.orphans.clear(name);
            debug!(target: "audon.task.orphan_reaper", room_id = %room_id, "Room has participants, not reaping");
            return Ok(false);
        }

        let ended = self.end_by_id(room_id, EndTrigger::Reaper).await? == EndOutcome::Ended;
        if ended {
            info!(target: "audon.task.orphan_reaper", room_id = %room_id, "Reaped orphaned room");
        }
        Ok(ended)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_mark_clear_forget() {
        let reaper = OrphanReaper::new(Duration::from_secs(30), CancellationToken::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        reaper.mark("r1", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(reaper.is_marked("r1"));
        assert_eq!(reaper.pending_count(), 1);

        assert!(reaper.clear("r1"));
        assert!(!reaper.clear("r1"));
        // Clearing keeps the timer; the check decides at fire time.
        assert_eq!(reaper.pending_count(), 1);

        reaper.forget("r1");
        assert_eq!(reaper.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_clears_marks() {
        let reaper = OrphanReaper::new(Duration::from_secs(30), CancellationToken::new());
        reaper.mark("r1", || async {});
        reaper.drain();
        assert!(!reaper.is_marked("r1"));
        assert_eq!(reaper.pending_count(), 0);
    }
}
