//! Distributed cron scheduling over a shared document store.
//!
//! Any number of [`Scheduler`]s may poll the same job collection. Each tick:
//! - atomically claims the earliest due, enabled, unlocked record
//! - runs the application's [`JobHandler`] on it
//! - reschedules it from its cron expression, or expires or removes it
//!
//! Failures are recorded on the record (`lastError`) and the record is
//! unlocked for another attempt; the loop itself keeps running until
//! stopped.

mod clock;
mod config;
mod entity;
mod error;
mod events;
mod handler;
mod outcome;
mod schedule;
mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackoffConfig, SchedulerConfig};
pub use entity::CronEntity;
pub use error::{HandlerError, SchedulerError};
pub use events::{Disposition, SchedulerEvent};
pub use handler::{FnHandler, JobHandler, KindRouter, handler_fn};
pub use outcome::{BackoffController, TickOutcome};
pub use schedule::{ScheduleExpression, SchedulePresets, next_start};
pub use scheduler::{Scheduler, SchedulerBuilder};
