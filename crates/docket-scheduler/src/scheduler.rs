//! Claim/process/reschedule engine.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};

use docket_store::{ClaimFilter, JobId, JobPatch, JobRecord, JobStore, SortOrder};

use crate::clock::{Clock, SystemClock};
use crate::events::{Disposition, EVENT_CHANNEL_CAPACITY, SchedulerEvent};
use crate::outcome::{BackoffController, TickOutcome};
use crate::schedule::next_start;
use crate::{HandlerError, JobHandler, SchedulerConfig, SchedulerError};

/// A polling worker bound to one job collection.
///
/// Any number of schedulers, in one process or many, may share a store.
/// Each due record is handled by at most one of them at a time; the store's
/// atomic claim is the only coordination between them.
pub struct Scheduler {
    inner: Arc<Inner>,
    run: Mutex<Option<RunHandle>>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    running: AtomicBool,
    /// Held for the whole of a tick; ticks of one instance never overlap.
    ticking: AsyncMutex<()>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// The tick loop spawned by one `start()`.
struct RunHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock, e.g. with a [`ManualClock`](crate::ManualClock).
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Scheduler {
            inner: Arc::new(Inner {
                store: self.store,
                handler: self.handler,
                clock: self.clock,
                config: self.config,
                running: AtomicBool::new(false),
                ticking: AsyncMutex::new(()),
                events,
            }),
            run: Mutex::new(None),
        })
    }
}

impl Scheduler {
    /// Create a scheduler using the wall clock.
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: impl JobHandler + 'static,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        Self::builder(store, handler).config(config).build()
    }

    pub fn builder(store: Arc<dyn JobStore>, handler: impl JobHandler + 'static) -> SchedulerBuilder {
        SchedulerBuilder {
            store,
            handler: Arc::new(handler),
            clock: Arc::new(SystemClock),
            config: SchedulerConfig::default(),
        }
    }

    /// Start polling. Does nothing if already running.
    ///
    /// Returns immediately; ticks run on a spawned tokio task, so this must
    /// be called from within a runtime.
    pub fn start(&self) {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        if self.inner.running.load(Ordering::SeqCst) {
            return;
        }

        // Each run gets its own shutdown signal. A loop left over from an
        // earlier run is still finishing its tick: the new loop waits for it,
        // and awaiting the new task awaits both.
        let previous = run.take().map(|handle| handle.task);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                if !previous.is_finished() {
                    debug!("waiting for previous run to finish its tick");
                }
                if let Err(e) = previous.await {
                    error!(error = %e, "previous scheduler loop terminated abnormally");
                }
            }
            run_loop(inner, shutdown_rx).await;
        });
        *run = Some(RunHandle { shutdown_tx, task });
    }

    /// Stop polling.
    ///
    /// Cancels a pending delay immediately. A tick already past its claim
    /// still runs its handler and persists the outcome; no further tick is
    /// issued after it.
    pub fn stop(&self) {
        let run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = run.as_ref() {
            // The loop may already have exited; nothing to signal then.
            let _ = handle.shutdown_tx.send(true);
        }
    }

    /// Stop polling and wait for the in-flight tick, if any, to finish.
    ///
    /// Also waits for loops from earlier runs that were stopped but had not
    /// yet finished their tick when the scheduler was restarted.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.run.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.task.await {
                error!(error = %e, "scheduler loop terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run exactly one claim → handle → reschedule iteration.
    ///
    /// Independent of `start()`/`stop()`; useful for driving the engine from
    /// an external cadence and in tests. If the loop is mid-tick, this waits
    /// for that tick to finish first.
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The tick loop: one tick, one delay, repeat until shut down.
async fn run_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    info!(
        idle_delay_ms = inner.config.idle_delay.as_millis() as u64,
        next_delay_ms = inner.config.next_delay.as_millis() as u64,
        "scheduler starting"
    );
    inner.publish(SchedulerEvent::Started);

    let mut controller = BackoffController::new(&inner.config);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let outcome = inner.tick().await;
        let delay = controller.next_delay(&outcome);

        if *shutdown_rx.borrow() {
            break;
        }

        if delay.is_zero() {
            // Let other tasks run between back-to-back ticks.
            tokio::task::yield_now().await;
            continue;
        }

        trace!(delay_ms = delay.as_millis() as u64, "waiting before next tick");
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // Scheduler dropped without an explicit stop.
                    break;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    info!("scheduler stopped");
    inner.publish(SchedulerEvent::Stopped);
}

impl Inner {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn tick(&self) -> TickOutcome {
        let _ticking = self.ticking.lock().await;
        let now = self.clock.now();
        let filter = ClaimFilter::due_at(now);

        let claimed = match self
            .store
            .claim_next(&filter, &JobPatch::claim(now), SortOrder::EarliestStart)
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                trace!("no claimable job");
                self.publish(SchedulerEvent::Idle);
                return TickOutcome::Idle;
            }
            Err(e) => {
                let error = SchedulerError::from(e);
                warn!(error = %error, "failed to claim job");
                self.publish(SchedulerEvent::Errored {
                    id: None,
                    message: error.to_string(),
                });
                return TickOutcome::ClaimFailed { error };
            }
        };

        let id = claimed.id.clone();
        debug!(id = %id, kind = ?claimed.kind, "claimed job");
        self.publish(SchedulerEvent::Claimed { id: id.clone() });

        match self.process(claimed).await {
            Ok(disposition) => {
                self.publish(SchedulerEvent::Completed {
                    id: id.clone(),
                    disposition,
                });
                TickOutcome::Processed { id, disposition }
            }
            Err(error) => self.record_failure(id, error).await,
        }
    }

    /// Run the handler, then reschedule, expire or remove the record.
    #[tracing::instrument(level = "debug", skip_all, fields(id = %record.id))]
    async fn process(&self, record: JobRecord) -> Result<Disposition, SchedulerError> {
        let id = record.id.clone();
        let cron = record.cron.clone();

        self.invoke_handler(record).await?;

        let now = self.clock.now();
        match next_start(&cron, now, self.config.next_delay) {
            Some(next) => {
                let patch = JobPatch::new()
                    .unlock()
                    .clear_error()
                    .processed_at(now)
                    .start_at(next);
                self.store.persist(&id, &patch).await?;
                debug!(id = %id, next_start = %next, "rescheduled job");
                Ok(Disposition::Rescheduled { next_start: next })
            }
            None if cron.remove_expired => {
                self.store.remove(&id).await?;
                info!(id = %id, "job expired, removed");
                Ok(Disposition::Removed)
            }
            None => {
                let patch = JobPatch::new()
                    .unlock()
                    .clear_error()
                    .enabled(false)
                    .processed_at(now)
                    .expired_at(now);
                self.store.persist(&id, &patch).await?;
                info!(id = %id, "job expired");
                Ok(Disposition::Expired)
            }
        }
    }

    /// Run the handler on its own task so a panic is reported as a failure
    /// of this record instead of taking down the loop.
    async fn invoke_handler(&self, record: JobRecord) -> Result<(), HandlerError> {
        let handler = Arc::clone(&self.handler);
        match tokio::spawn(async move { handler.handle(record).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(HandlerError::new(format!("handler cancelled: {}", e))),
        }
    }

    /// Unlock a record whose processing failed and remember why.
    async fn record_failure(&self, id: JobId, error: SchedulerError) -> TickOutcome {
        let message = error.record_message();
        warn!(id = %id, error = %message, "job failed, unlocking for retry");

        let patch = JobPatch::new().unlock().last_error(message.clone());
        let unlock_failed = match self.store.persist(&id, &patch).await {
            Ok(()) => false,
            Err(e) => {
                error!(id = %id, error = %e, "failed to record job failure");
                true
            }
        };

        self.publish(SchedulerEvent::Errored {
            id: Some(id.clone()),
            message,
        });

        TickOutcome::Failed {
            id,
            error,
            unlock_failed,
        }
    }

    fn publish(&self, event: SchedulerEvent) {
        if self.events.send(event).is_err() {
            trace!("no subscribers for scheduler event");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
