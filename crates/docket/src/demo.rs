//! Demo command: a notes collection with checklist and reminder subtypes,
//! processed by several workers sharing one store.

use std::path::Path;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use docket_scheduler::{
    CronEntity, HandlerError, KindRouter, SchedulePresets, SchedulerConfig,
    SchedulerEvent, handler_fn,
};
use docket_store::{CronFields, JobId, JobRecord, MemoryStore};

/// Collection shared by all note subtypes.
const NOTES_COLLECTION: &str = "notes";

/// A plain note.
#[derive(Debug, Serialize, Deserialize)]
struct Note {
    title: String,
    #[serde(flatten)]
    cron: CronFields,
}

impl CronEntity for Note {
    const COLLECTION: &'static str = NOTES_COLLECTION;

    fn cron(&self) -> &CronFields {
        &self.cron
    }

    fn cron_mut(&mut self) -> &mut CronFields {
        &mut self.cron
    }
}

/// A note with items to tick off.
#[derive(Debug, Serialize, Deserialize)]
struct Checklist {
    title: String,
    items: Vec<String>,
    #[serde(flatten)]
    cron: CronFields,
}

impl CronEntity for Checklist {
    const COLLECTION: &'static str = NOTES_COLLECTION;
    const KIND: Option<&'static str> = Some("checklist");

    fn cron(&self) -> &CronFields {
        &self.cron
    }

    fn cron_mut(&mut self) -> &mut CronFields {
        &mut self.cron
    }
}

/// A note that nags.
#[derive(Debug, Serialize, Deserialize)]
struct Reminder {
    title: String,
    description: String,
    #[serde(flatten)]
    cron: CronFields,
}

impl CronEntity for Reminder {
    const COLLECTION: &'static str = NOTES_COLLECTION;
    const KIND: Option<&'static str> = Some("reminder");

    fn cron(&self) -> &CronFields {
        &self.cron
    }

    fn cron_mut(&mut self) -> &mut CronFields {
        &mut self.cron
    }
}

/// Build the scheduler configuration from an optional JSON file, then
/// command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    idle_delay_ms: Option<u64>,
    next_delay_ms: Option<u64>,
) -> Result<SchedulerConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).into_diagnostic()?;
            serde_json::from_str(&raw)
                .map_err(|e| miette::miette!("invalid config {}: {}", path.display(), e))?
        }
        None => SchedulerConfig::default(),
    };

    if let Some(ms) = idle_delay_ms {
        config = config.with_idle_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = next_delay_ms {
        config = config.with_next_delay(Duration::from_millis(ms));
    }

    config.validate().map_err(|e| miette::miette!("{}", e))?;
    Ok(config)
}

/// Seed the demo jobs and run `workers` schedulers until Ctrl-C or `run_for`
/// seconds have passed.
pub async fn run(workers: usize, config: SchedulerConfig, run_for: Option<u64>) -> Result<()> {
    if workers == 0 {
        return Err(miette::miette!("at least one worker is required"));
    }

    let store = MemoryStore::new(NOTES_COLLECTION);
    seed(&store).await?;
    info!(
        collection = store.collection(),
        jobs = store.len().await,
        workers,
        "seeded demo jobs"
    );

    let mut schedulers = Vec::with_capacity(workers);
    for worker in 0..workers {
        let scheduler = Note::create_engine(store.clone(), router(worker), config.clone())
            .map_err(|e| miette::miette!("{}", e))?;
        tokio::spawn(log_events(worker, scheduler.subscribe()));
        scheduler.start();
        schedulers.push(scheduler);
    }

    let deadline = async {
        match run_for {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.into_diagnostic()?;
            info!("received ctrl-c, shutting down");
        }
        _ = deadline => {
            info!("run time elapsed, shutting down");
        }
    }

    for scheduler in &schedulers {
        scheduler.shutdown().await;
    }

    report(&store).await;
    Ok(())
}

async fn seed(store: &MemoryStore) -> Result<()> {
    let now = Utc::now();

    let jobs = [
        Checklist {
            title: "Groceries".to_string(),
            items: vec!["milk".to_string(), "bread".to_string()],
            cron: CronFields::once(now),
        }
        .into_record("job-1"),
        Reminder {
            title: "Posture".to_string(),
            description: "sit up straight".to_string(),
            cron: CronFields::recurring(SchedulePresets::EVERY_SECOND, now),
        }
        .into_record("job-2"),
        Note {
            title: "Digest".to_string(),
            cron: CronFields::recurring("*/5 * * * * *", now)
                .until(now + TimeDelta::seconds(20))
                .remove_when_expired(),
        }
        .into_record("job-3"),
    ];

    for job in jobs {
        let record = job.map_err(|e| miette::miette!("{}", e))?;
        store
            .insert(record)
            .await
            .map_err(|e| miette::miette!("{}", e))?;
    }
    Ok(())
}

/// Per-worker handler: dispatch on the note subtype.
fn router(worker: usize) -> KindRouter {
    KindRouter::new()
        .route(
            "checklist",
            handler_fn(move |job: JobRecord| async move {
                let checklist = Checklist::from_record(&job).map_err(HandlerError::new)?;
                info!(worker, id = %job.id, items = checklist.items.len(), "processing checklist");
                Ok::<(), HandlerError>(())
            }),
        )
        .route(
            "reminder",
            handler_fn(move |job: JobRecord| async move {
                let reminder = Reminder::from_record(&job).map_err(HandlerError::new)?;
                info!(worker, id = %job.id, description = %reminder.description, "processing reminder");
                Ok::<(), HandlerError>(())
            }),
        )
        .fallback(handler_fn(move |job: JobRecord| async move {
            let note = Note::from_record(&job).map_err(HandlerError::new)?;
            info!(worker, id = %job.id, title = %note.title, "processing note");
            Ok::<(), HandlerError>(())
        }))
}

async fn log_events(worker: usize, mut events: tokio::sync::broadcast::Receiver<SchedulerEvent>) {
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::Completed { id, disposition }) => {
                debug!(worker, id = %id, ?disposition, "job completed");
            }
            Ok(SchedulerEvent::Errored { id, message }) => {
                warn!(worker, id = ?id.as_ref().map(JobId::as_str), error = %message, "job errored");
            }
            Ok(SchedulerEvent::Stopped) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                debug!(worker, skipped, "event subscriber lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn report(store: &MemoryStore) {
    for record in store.list().await {
        info!(
            id = %record.id,
            kind = record.kind.as_deref().unwrap_or("note"),
            state = ?record.state(),
            processed_at = ?record.cron.processed_at,
            last_error = record.cron.last_error.as_deref().unwrap_or(""),
            "final job state"
        );
    }
}
