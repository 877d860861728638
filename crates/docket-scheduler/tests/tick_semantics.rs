//! Single-tick behavior driven through `Scheduler::tick` with a manual clock.
//!
//! - Idle ticks change nothing
//! - One-shot jobs expire or are removed
//! - Recurring jobs advance through their schedule until `stopAt`
//! - Failures unlock the record and surface in `lastError`
//! - Store failures during claim are reported, not raised

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use pretty_assertions::assert_eq;

use docket_scheduler::{
    Clock, Disposition, HandlerError, JobHandler, ManualClock, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerEvent, SchedulePresets, TickOutcome, handler_fn,
};
use docket_store::{
    ClaimFilter, CronFields, JobId, JobPatch, JobRecord, JobState, JobStore, MemoryStore,
    SortOrder, StoreError,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

fn noop() -> impl JobHandler {
    handler_fn(|_job: JobRecord| async { Ok::<(), HandlerError>(()) })
}

fn scheduler(store: &Arc<MemoryStore>, clock: &ManualClock, handler: impl JobHandler + 'static) -> Scheduler {
    Scheduler::builder(store.clone(), handler)
        .clock(clock.clone())
        .build()
        .unwrap()
}

#[tokio::test]
async fn idle_tick_changes_nothing() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());

    let mut disabled = CronFields::once(t0());
    disabled.enabled = false;
    let id = store.insert(JobRecord::new(disabled)).await.unwrap();
    let before = store.list().await;

    let engine = scheduler(&store, &clock, noop());
    assert!(engine.tick().await.is_idle());
    assert!(engine.tick().await.is_idle());

    assert_eq!(store.list().await, before);
    assert_eq!(store.get(&id).await.unwrap().state(), JobState::Disabled);
}

#[tokio::test]
async fn one_shot_job_expires_after_single_run() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store.insert(JobRecord::new(CronFields::once(t0()))).await.unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let engine = scheduler(
        &store,
        &clock,
        handler_fn(move |_job: JobRecord| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        }),
    );

    match engine.tick().await {
        TickOutcome::Processed { id: processed, disposition } => {
            assert_eq!(processed, id);
            assert_eq!(disposition, Disposition::Expired);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let record = store.get(&id).await.unwrap();
    assert_eq!(record.state(), JobState::Expired);
    assert!(!record.cron.enabled);
    assert_eq!(record.cron.locked, None);
    assert_eq!(record.cron.started_at, Some(t0()));
    assert_eq!(record.cron.processed_at, Some(t0()));
    assert_eq!(record.cron.expired_at, Some(t0()));

    clock.advance(TimeDelta::hours(1));
    assert!(engine.tick().await.is_idle());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_shot_job_with_remove_expired_is_deleted() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    store
        .insert(JobRecord::new(CronFields::once(t0()).remove_when_expired()))
        .await
        .unwrap();

    let engine = scheduler(&store, &clock, noop());
    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Removed, .. }
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn bounded_recurrence_runs_each_second_then_expires() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let cron = CronFields::recurring(SchedulePresets::EVERY_SECOND, t0())
        .until(t0() + TimeDelta::milliseconds(2500));
    let id = store.insert(JobRecord::new(cron)).await.unwrap();

    let runs = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&runs);
    let handler_clock = clock.clone();
    let engine = scheduler(
        &store,
        &clock,
        handler_fn(move |_job: JobRecord| {
            let seen = Arc::clone(&seen);
            let clock = handler_clock.clone();
            async move {
                seen.lock().unwrap().push(clock.now());
                // Handling takes a moment.
                clock.advance(TimeDelta::milliseconds(10));
                Ok::<(), HandlerError>(())
            }
        }),
    );

    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Rescheduled { next_start }, .. }
            if next_start == t0() + TimeDelta::seconds(1)
    ));
    // Not due again until the next occurrence.
    assert!(engine.tick().await.is_idle());

    clock.set(t0() + TimeDelta::seconds(1));
    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Rescheduled { next_start }, .. }
            if next_start == t0() + TimeDelta::seconds(2)
    ));

    clock.set(t0() + TimeDelta::seconds(2));
    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Expired, .. }
    ));

    clock.set(t0() + TimeDelta::seconds(3));
    assert!(engine.tick().await.is_idle());

    assert_eq!(
        *runs.lock().unwrap(),
        vec![t0(), t0() + TimeDelta::seconds(1), t0() + TimeDelta::seconds(2)]
    );
    assert_eq!(store.get(&id).await.unwrap().state(), JobState::Expired);
}

#[tokio::test]
async fn next_delay_spaces_out_runs() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store
        .insert(JobRecord::new(CronFields::recurring(SchedulePresets::EVERY_SECOND, t0())))
        .await
        .unwrap();

    let engine = Scheduler::builder(store.clone(), noop())
        .clock(clock.clone())
        .config(SchedulerConfig::new().with_next_delay(std::time::Duration::from_secs(10)))
        .build()
        .unwrap();

    engine.tick().await;
    // The occurrence at the floor belongs to this run; the one after is next.
    let record = store.get(&id).await.unwrap();
    assert_eq!(record.cron.start_at, Some(t0() + TimeDelta::seconds(11)));
    assert_eq!(record.state(), JobState::Pending);
}

#[tokio::test]
async fn future_start_is_deferred() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let later = t0() + TimeDelta::hours(1);
    let id = store.insert(JobRecord::new(CronFields::once(later))).await.unwrap();

    let engine = scheduler(&store, &clock, noop());
    assert!(engine.tick().await.is_idle());
    assert_eq!(store.get(&id).await.unwrap().cron.locked, None);

    clock.set(later);
    assert!(matches!(engine.tick().await, TickOutcome::Processed { .. }));
}

#[tokio::test]
async fn expired_stop_at_is_never_claimed() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    store
        .insert(JobRecord::new(
            CronFields::recurring(SchedulePresets::EVERY_SECOND, t0() - TimeDelta::hours(2))
                .until(t0() - TimeDelta::hours(1)),
        ))
        .await
        .unwrap();

    let engine = scheduler(&store, &clock, noop());
    assert!(engine.tick().await.is_idle());
}

#[tokio::test]
async fn failed_job_is_unlocked_and_retried() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store.insert(JobRecord::new(CronFields::once(t0()))).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let engine = scheduler(
        &store,
        &clock,
        handler_fn(move |_job: JobRecord| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err("upstream timed out".to_string())
                } else {
                    Ok(())
                }
            }
        }),
    );

    match engine.tick().await {
        TickOutcome::Failed { id: failed, error, unlock_failed } => {
            assert_eq!(failed, id);
            assert!(matches!(error, SchedulerError::Handler(_)));
            assert!(!unlock_failed);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let record = store.get(&id).await.unwrap();
    assert_eq!(record.state(), JobState::Pending);
    assert!(record.cron.enabled);
    assert_eq!(record.cron.locked, None);
    assert_eq!(record.cron.last_error.as_deref(), Some("upstream timed out"));

    // Reclaimable on the very next tick.
    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Expired, .. }
    ));
    let record = store.get(&id).await.unwrap();
    assert_eq!(record.cron.last_error, None);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_handler_is_recorded_as_failure() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store.insert(JobRecord::new(CronFields::once(t0()))).await.unwrap();

    let engine = scheduler(
        &store,
        &clock,
        handler_fn(|_job: JobRecord| async {
            if true {
                panic!("corrupt payload");
            }
            Ok::<(), HandlerError>(())
        }),
    );

    assert!(engine.tick().await.is_failure());
    let record = store.get(&id).await.unwrap();
    assert_eq!(record.cron.locked, None);
    assert_eq!(
        record.cron.last_error.as_deref(),
        Some("handler panicked: corrupt payload")
    );
}

#[tokio::test]
async fn invalid_interval_expires_after_run() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store
        .insert(JobRecord::new(CronFields::recurring("every tuesday", t0())))
        .await
        .unwrap();

    let engine = scheduler(&store, &clock, noop());
    assert!(matches!(
        engine.tick().await,
        TickOutcome::Processed { disposition: Disposition::Expired, .. }
    ));
    assert_eq!(store.get(&id).await.unwrap().state(), JobState::Expired);
}

#[tokio::test]
async fn earliest_start_is_claimed_first() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let late = store
        .insert(JobRecord::new(CronFields::once(t0() - TimeDelta::minutes(1))))
        .await
        .unwrap();
    let early = store
        .insert(JobRecord::new(CronFields::once(t0() - TimeDelta::minutes(5))))
        .await
        .unwrap();

    let engine = scheduler(&store, &clock, noop());
    let order: Vec<JobId> = [engine.tick().await, engine.tick().await]
        .into_iter()
        .map(|outcome| match outcome {
            TickOutcome::Processed { id, .. } => id,
            other => panic!("unexpected outcome: {other:?}"),
        })
        .collect();

    assert_eq!(order, vec![early, late]);
}

#[tokio::test]
async fn tick_publishes_events() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store.insert(JobRecord::new(CronFields::once(t0()))).await.unwrap();

    let engine = scheduler(&store, &clock, noop());
    let mut events = engine.subscribe();

    engine.tick().await;
    engine.tick().await;

    assert_eq!(events.try_recv().unwrap(), SchedulerEvent::Claimed { id: id.clone() });
    assert_eq!(
        events.try_recv().unwrap(),
        SchedulerEvent::Completed { id, disposition: Disposition::Expired }
    );
    assert_eq!(events.try_recv().unwrap(), SchedulerEvent::Idle);
    assert!(events.try_recv().is_err());
}

/// A store whose claim always fails and whose writes are counted.
#[derive(Default)]
struct UnavailableStore {
    writes: AtomicUsize,
}

#[async_trait]
impl JobStore for UnavailableStore {
    fn collection(&self) -> &str {
        "jobs"
    }

    async fn claim_next(
        &self,
        _filter: &ClaimFilter,
        _update: &JobPatch,
        _sort: SortOrder,
    ) -> Result<Option<JobRecord>, StoreError> {
        Err(StoreError::Unavailable("connection reset".to_string()))
    }

    async fn persist(&self, _id: &JobId, _patch: &JobPatch) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, _id: &JobId) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn claim_failure_is_reported_without_record_context() {
    let store = Arc::new(UnavailableStore::default());
    let engine = Scheduler::new(store.clone(), noop(), SchedulerConfig::default()).unwrap();
    let mut events = engine.subscribe();

    match engine.tick().await {
        TickOutcome::ClaimFailed { error } => {
            assert!(matches!(error, SchedulerError::Store(StoreError::Unavailable(_))));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(matches!(
        events.try_recv().unwrap(),
        SchedulerEvent::Errored { id: None, .. }
    ));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn record_removed_during_handling_reports_unlock_failure() {
    let store = MemoryStore::new("jobs");
    let clock = ManualClock::new(t0());
    let id = store.insert(JobRecord::new(CronFields::once(t0()))).await.unwrap();

    let handler_store = Arc::clone(&store);
    let engine = scheduler(
        &store,
        &clock,
        handler_fn(move |job: JobRecord| {
            let store = Arc::clone(&handler_store);
            async move {
                store.remove(&job.id).await.map_err(|e| e.to_string())?;
                Ok::<(), String>(())
            }
        }),
    );

    match engine.tick().await {
        TickOutcome::Failed { id: failed, error, unlock_failed } => {
            assert_eq!(failed, id);
            assert!(matches!(error, SchedulerError::Store(StoreError::NotFound { .. })));
            assert!(unlock_failed);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
