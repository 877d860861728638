//! Lifecycle notifications published by a running scheduler.

use chrono::{DateTime, Utc};

use docket_store::JobId;

/// Broadcast channel capacity for scheduler events.
///
/// Slow subscribers lag rather than stall the tick loop.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What happened to a record after its handler succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Returned to pending with a new start time.
    Rescheduled { next_start: DateTime<Utc> },
    /// No further run; kept with `enabled = false`.
    Expired,
    /// No further run; deleted because `removeExpired` was set.
    Removed,
}

/// Update event for scheduler subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// The tick loop started.
    Started,
    /// The tick loop will not issue further ticks.
    Stopped,
    /// A tick found nothing to claim.
    Idle,
    /// A record was claimed and is about to be handled.
    Claimed { id: JobId },
    /// A record was handled and its outcome persisted.
    Completed { id: JobId, disposition: Disposition },
    /// A tick failed. `id` is absent when the claim itself failed.
    Errored { id: Option<JobId>, message: String },
}
