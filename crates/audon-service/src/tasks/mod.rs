//! Background tasks for the Audon service.
//!
//! # Tasks
//!
//! - `delayed_recheck` - Per-key cancellable timers that re-check ground truth before acting
//! - `orphan_reaper` - Ends provisioned live rooms that nobody joined

pub mod delayed_recheck;
pub mod orphan_reaper;

pub use delayed_recheck::DelayedRecheck;
pub use orphan_reaper::OrphanReaper;
