//! Cancellable delayed re-check.
//!
//! Defers a side effect behind a per-key timer. Arming a key that already
//! has a pending check cancels the old one, so a burst of arrivals for the
//! same key collapses into a single check that runs `delay` after the last
//! arrival. The check itself is responsible for re-reading ground truth
//! before acting.
//!
//! # Graceful Shutdown
//!
//! Every timer hangs off a parent cancellation token. `drain` cancels the
//! parent, which stops all pending timers and makes later arms inert.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct PendingCheck {
    generation: u64,
    cancel: CancellationToken,
}

/// Table of pending per-key timers.
pub struct DelayedRecheck {
    name: &'static str,
    delay: Duration,
    pending: Arc<DashMap<String, PendingCheck>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

impl DelayedRecheck {
    pub fn new(name: &'static str, delay: Duration, shutdown: CancellationToken) -> Self {
        Self {
            name,
            delay,
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm (or re-arm) the timer for `key`. `check` runs once the delay
    /// elapses without another arm or a cancel for the same key.
    pub fn arm<F, Fut>(&self, key: &str, check: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            debug!(target: "audon.task.recheck", timer = self.name, key, "Ignoring arm after shutdown");
            return;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        if let Some(previous) = self.pending.insert(
            key.to_string(),
            PendingCheck {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
            debug!(target: "audon.task.recheck", timer = self.name, key, "Re-armed pending check");
        }

        let pending = Arc::clone(&self.pending);
        let key = key.to_string();
        let delay = self.delay;
        let name = self.name;

        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return,
            }

            // Only the latest arming for this key may fire.
            if pending
                .remove_if(&key, |_, p| p.generation == generation)
                .is_none()
            {
                return;
            }

            debug!(target: "audon.task.recheck", timer = name, key = %key, "Running delayed check");
            check().await;
        });
    }

    /// Cancel the pending check for `key`. Returns false if none was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                pending.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending check and refuse new ones.
    pub fn drain(&self) {
        self.shutdown.cancel();
        self.pending.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const DELAY: Duration = Duration::from_secs(10);

    fn recheck() -> DelayedRecheck {
        DelayedRecheck::new("test", DELAY, CancellationToken::new())
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    async fn wait(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        // Let spawned timers observe the new time.
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let timers = recheck();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm("u1", counting(&fired));
        assert!(timers.is_pending("u1"));

        wait(9).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        wait(2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_pending("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_coalesces() {
        let timers = recheck();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm("u1", counting(&fired));
        wait(5).await;
        timers.arm("u1", counting(&fired));

        // First arming would have fired at t=10.
        wait(8).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        wait(3).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        wait(30).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let timers = recheck();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm("u1", counting(&fired));
        timers.arm("u2", counting(&fired));
        assert_eq!(timers.pending_count(), 2);

        wait(11).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let timers = recheck();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm("u1", counting(&fired));
        assert!(timers.cancel("u1"));
        assert!(!timers.cancel("u1"));

        wait(20).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_everything() {
        let timers = recheck();
        let fired = Arc::new(AtomicUsize::new(0));

        timers.arm("u1", counting(&fired));
        timers.drain();
        assert_eq!(timers.pending_count(), 0);

        timers.arm("u2", counting(&fired));
        assert!(!timers.is_pending("u2"));
        wait(20).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
