//! Attaching the cron field group to application entities.

use std::sync::Arc;

use serde::Serialize;
use serde::de::{DeserializeOwned, Error as _};
use serde_json::Value;
use tracing::info;

use docket_store::{JobId, JobRecord, JobStore, fields};

use crate::{JobHandler, Scheduler, SchedulerConfig, SchedulerError};

/// An application type that can be scheduled.
///
/// Embed [`CronFields`](docket_store::CronFields) with `#[serde(flatten)]`
/// and point the accessors at it:
///
/// ```
/// use docket_scheduler::CronEntity;
/// use docket_store::CronFields;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Reminder {
///     title: String,
///     #[serde(flatten)]
///     cron: CronFields,
/// }
///
/// impl CronEntity for Reminder {
///     const COLLECTION: &'static str = "notes";
///     const KIND: Option<&'static str> = Some("reminder");
///
///     fn cron(&self) -> &CronFields { &self.cron }
///     fn cron_mut(&mut self) -> &mut CronFields { &mut self.cron }
/// }
/// ```
///
/// Subtypes sharing a collection set `KIND`; the engine claims from the
/// whole collection and a [`KindRouter`](crate::KindRouter) dispatches on it.
pub trait CronEntity: Serialize + DeserializeOwned {
    /// Collection the entity's records live in.
    const COLLECTION: &'static str;

    /// Subtype tag written to `kind`, for entities sharing a collection.
    const KIND: Option<&'static str> = None;

    fn cron(&self) -> &docket_store::CronFields;

    fn cron_mut(&mut self) -> &mut docket_store::CronFields;

    /// Store-ready record for this entity under `id`.
    fn into_record(self, id: impl Into<JobId>) -> Result<JobRecord, SchedulerError>
    where
        Self: Sized,
    {
        let mut value = serde_json::to_value(&self)?;
        let Value::Object(map) = &mut value else {
            return Err(serde_json::Error::custom(format!(
                "{} entity must serialize to an object",
                Self::COLLECTION
            ))
            .into());
        };

        map.insert(fields::ID.to_string(), Value::String(id.into().to_string()));
        match Self::KIND {
            Some(kind) => {
                map.insert(fields::KIND.to_string(), Value::String(kind.to_string()));
            }
            None => {
                map.remove(fields::KIND);
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Rebuild the entity from a stored record.
    ///
    /// Fails when the record is tagged with a different `kind`.
    fn from_record(record: &JobRecord) -> Result<Self, SchedulerError>
    where
        Self: Sized,
    {
        if let Some(expected) = Self::KIND {
            if record.kind.as_deref() != Some(expected) {
                return Err(serde_json::Error::custom(format!(
                    "record {} has kind {:?}, expected {}",
                    record.id, record.kind, expected
                ))
                .into());
            }
        }

        Ok(serde_json::from_value(serde_json::to_value(record)?)?)
    }

    /// Scheduler polling this entity's collection.
    ///
    /// Fails with [`SchedulerError::InvalidConfig`] if `store` holds a
    /// different collection.
    fn create_engine(
        store: Arc<dyn JobStore>,
        handler: impl JobHandler + 'static,
        config: SchedulerConfig,
    ) -> Result<Scheduler, SchedulerError>
    where
        Self: Sized,
    {
        if store.collection() != Self::COLLECTION {
            return Err(SchedulerError::InvalidConfig(format!(
                "store holds collection {:?}, expected {:?}",
                store.collection(),
                Self::COLLECTION
            )));
        }
        let scheduler = Scheduler::new(store, handler, config)?;
        info!(collection = Self::COLLECTION, kind = ?Self::KIND, "created scheduler engine");
        Ok(scheduler)
    }
}
