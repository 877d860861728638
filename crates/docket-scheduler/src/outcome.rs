//! Tick outcomes and the delay policy applied between ticks.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

use docket_store::JobId;

use crate::events::Disposition;
use crate::{BackoffConfig, SchedulerConfig, SchedulerError};

/// Result of one claim → handle → reschedule iteration.
#[derive(Debug)]
pub enum TickOutcome {
    /// Nothing was due (the "no claimable document" case). Not an error.
    Idle,
    /// A record was handled and its outcome persisted.
    Processed { id: JobId, disposition: Disposition },
    /// Handling or persisting a claimed record failed. The record has been
    /// unlocked with `lastError` set, unless `unlock_failed` says otherwise.
    Failed {
        id: JobId,
        error: SchedulerError,
        unlock_failed: bool,
    },
    /// The claim itself failed; there is no record context.
    ClaimFailed { error: SchedulerError },
}

impl TickOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, TickOutcome::Idle)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TickOutcome::Failed { .. } | TickOutcome::ClaimFailed { .. }
        )
    }
}

/// Decides how long the loop waits before the next tick.
///
/// | outcome       | delay        |
/// |---------------|--------------|
/// | `Idle`        | `idle_delay` |
/// | `Processed`   | zero         |
/// | `Failed`      | zero         |
/// | `ClaimFailed` | `idle_delay` |
///
/// With an [`error backoff`](SchedulerConfig::error_backoff) configured,
/// consecutive failures instead wait an exponentially growing delay (never
/// less than the table above) until the next `Idle` or `Processed` outcome
/// resets it.
pub struct BackoffController {
    idle_delay: Duration,
    backoff: Option<ExponentialBackoff>,
    consecutive_failures: u32,
}

impl BackoffController {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            idle_delay: config.idle_delay,
            backoff: config.error_backoff.as_ref().map(exponential),
            consecutive_failures: 0,
        }
    }

    /// Delay before the tick following `outcome`.
    pub fn next_delay(&mut self, outcome: &TickOutcome) -> Duration {
        let base = match outcome {
            TickOutcome::Idle | TickOutcome::ClaimFailed { .. } => self.idle_delay,
            TickOutcome::Processed { .. } | TickOutcome::Failed { .. } => Duration::ZERO,
        };

        if !outcome.is_failure() {
            if self.consecutive_failures > 0 {
                self.consecutive_failures = 0;
                if let Some(backoff) = self.backoff.as_mut() {
                    backoff.reset();
                }
            }
            return base;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.backoff.as_mut() {
            Some(backoff) => backoff
                .next_backoff()
                .map_or(base, |delay| delay.max(base)),
            None => base,
        }
    }

    /// Failures since the last successful or idle tick.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

fn exponential(config: &BackoffConfig) -> ExponentialBackoff {
    let mut backoff = ExponentialBackoff {
        current_interval: config.initial,
        initial_interval: config.initial,
        randomization_factor: 0.0,
        multiplier: config.multiplier,
        max_interval: config.max,
        max_elapsed_time: None,
        ..Default::default()
    };
    backoff.reset();
    backoff
}
