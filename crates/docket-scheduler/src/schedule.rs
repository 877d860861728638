//! Schedule expressions and next-run calculation.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use cron::Schedule;
use tracing::debug;

use docket_store::CronFields;

use crate::SchedulerError;

/// A parsed cron expression.
///
/// Six fields, seconds first, with an optional seventh year field:
///
/// ```text
/// sec  min  hour  day-of-month  month  day-of-week  [year]
/// ```
#[derive(Debug, Clone)]
pub struct ScheduleExpression {
    schedule: Schedule,
    expression: String,
}

impl ScheduleExpression {
    /// Parse a cron expression.
    pub fn parse(expression: &str) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{}: {}", expression, e)))?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// Occurrences at or after `from`, earliest first.
    ///
    /// Expressions resolve to whole seconds, so `from` is truncated first:
    /// the occurrence inside the second containing `from` is included.
    pub fn occurrences_from(
        &self,
        from: DateTime<Utc>,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let start = from.trunc_subsecs(0) - TimeDelta::seconds(1);
        self.schedule.after(&start)
    }

    /// Occurrences strictly after `after`, earliest first.
    pub fn upcoming(&self, after: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.schedule.after(&after)
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.upcoming(after).next()
    }

    /// The source expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for ScheduleExpression {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Common expressions.
pub struct SchedulePresets;

impl SchedulePresets {
    pub const EVERY_SECOND: &'static str = "* * * * * *";
    pub const EVERY_MINUTE: &'static str = "0 * * * * *";
    pub const EVERY_5_MINUTES: &'static str = "0 */5 * * * *";
    pub const EVERY_HOUR: &'static str = "0 0 * * * *";
    pub const DAILY: &'static str = "0 0 0 * * *";
    pub const WEEKLY: &'static str = "0 0 0 * * SUN";
    pub const MONTHLY: &'static str = "0 0 0 1 * *";
    pub const WEEKDAYS_9AM: &'static str = "0 0 9 * * MON-FRI";
}

/// Next moment a record should run, or `None` when it has no further run.
///
/// - One-shot records (no `interval`) never run again.
/// - `floor = now + next_delay` is the earliest moment the same record may
///   run again.
/// - A stored `startAt` at or after the floor has not come up yet and is
///   returned unchanged.
/// - Otherwise the first two occurrences at or after the floor (and not
///   after `stopAt`) are taken. The first belongs to the run that just
///   finished, so the second is returned.
///
/// An unparsable `interval` yields `None` whatever the other fields hold.
/// Pure in all of its inputs.
pub fn next_start(
    cron: &CronFields,
    now: DateTime<Utc>,
    next_delay: Duration,
) -> Option<DateTime<Utc>> {
    let interval = cron.interval.as_deref()?;

    let floor = TimeDelta::from_std(next_delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))?;

    let expression = match ScheduleExpression::parse(interval) {
        Ok(expression) => expression,
        Err(e) => {
            debug!(interval, error = %e, "unparsable interval, treating as expired");
            return None;
        }
    };

    if let Some(start) = cron.start_at {
        if start >= floor {
            return Some(start);
        }
    }

    let mut occurrences = expression
        .occurrences_from(floor)
        .take_while(|at| cron.stop_at.is_none_or(|stop| *at <= stop));

    occurrences.next()?;
    occurrences.next()
}
