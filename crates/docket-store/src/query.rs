//! Claim filter, partial update and sort vocabulary shared by every store.
//!
//! Each type evaluates in-process (used by [`MemoryStore`](crate::MemoryStore))
//! and renders as a MongoDB-style JSON document for adapters that delegate
//! to a document database.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use crate::records::fields;
use crate::{CronFields, JobRecord};

/// Selects records that are due at a given instant.
///
/// A record matches when it is enabled, not locked, its `startAt` is absent
/// or not after `now`, and its `stopAt` is absent or not before `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimFilter {
    now: DateTime<Utc>,
}

impl ClaimFilter {
    /// Filter for records due at `now`.
    pub fn due_at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    /// The instant the filter was built for.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Evaluate the filter against a record.
    pub fn matches(&self, record: &JobRecord) -> bool {
        record.cron.is_due(self.now)
    }

    /// Render as a query document.
    pub fn to_document(&self) -> Value {
        let now = timestamp(self.now);
        json!({
            (fields::ENABLED): true,
            (fields::LOCKED): {"$ne": true},
            "$and": [
                {"$or": [
                    {(fields::START_AT): {"$lte": now}},
                    {(fields::START_AT): {"$exists": false}},
                ]},
                {"$or": [
                    {(fields::STOP_AT): {"$gte": now}},
                    {(fields::STOP_AT): {"$exists": false}},
                ]},
            ],
        })
    }
}

/// Preference among several matching records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Earliest `startAt` first; records without one come first.
    #[default]
    EarliestStart,
}

impl SortOrder {
    /// Order two records. Equal records fall back to store-native order.
    pub fn compare(&self, a: &JobRecord, b: &JobRecord) -> Ordering {
        match self {
            // `None < Some(_)`, matching how document stores sort missing fields.
            SortOrder::EarliestStart => a.cron.start_at.cmp(&b.cron.start_at),
        }
    }

    /// Render as a sort document.
    pub fn to_document(&self) -> Value {
        match self {
            SortOrder::EarliestStart => json!({ (fields::START_AT): 1 }),
        }
    }
}

/// What a patch does to a single field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Change<T> {
    /// Leave the field as it is.
    #[default]
    Keep,
    /// Overwrite the field.
    Set(T),
    /// Remove the field.
    Unset,
}

impl<T: Clone> Change<T> {
    fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            Change::Keep => {}
            Change::Set(value) => *slot = Some(value.clone()),
            Change::Unset => *slot = None,
        }
    }
}

/// A partial update of the cron field group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub enabled: Change<bool>,
    pub start_at: Change<DateTime<Utc>>,
    pub locked: Change<bool>,
    pub started_at: Change<DateTime<Utc>>,
    pub processed_at: Change<DateTime<Utc>>,
    pub expired_at: Change<DateTime<Utc>>,
    pub last_error: Change<String>,
}

impl JobPatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// The update applied by a successful claim.
    pub fn claim(now: DateTime<Utc>) -> Self {
        Self {
            locked: Change::Set(true),
            started_at: Change::Set(now),
            ..Default::default()
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Change::Set(enabled);
        self
    }

    pub fn start_at(mut self, at: DateTime<Utc>) -> Self {
        self.start_at = Change::Set(at);
        self
    }

    pub fn unlock(mut self) -> Self {
        self.locked = Change::Unset;
        self
    }

    pub fn processed_at(mut self, at: DateTime<Utc>) -> Self {
        self.processed_at = Change::Set(at);
        self
    }

    pub fn expired_at(mut self, at: DateTime<Utc>) -> Self {
        self.expired_at = Change::Set(at);
        self
    }

    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Change::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = Change::Unset;
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Apply the patch to a field group.
    pub fn apply(&self, cron: &mut CronFields) {
        match self.enabled {
            Change::Keep => {}
            Change::Set(enabled) => cron.enabled = enabled,
            Change::Unset => cron.enabled = false,
        }
        self.start_at.apply_to(&mut cron.start_at);
        self.locked.apply_to(&mut cron.locked);
        self.started_at.apply_to(&mut cron.started_at);
        self.processed_at.apply_to(&mut cron.processed_at);
        self.expired_at.apply_to(&mut cron.expired_at);
        self.last_error.apply_to(&mut cron.last_error);
    }

    /// Render as an update document with `$set` and `$unset` sections.
    pub fn to_document(&self) -> Value {
        let mut set = Map::new();
        let mut unset = Map::new();

        let mut record = |name: &str, change: Change<Value>| match change {
            Change::Keep => {}
            Change::Set(value) => {
                set.insert(name.to_string(), value);
            }
            Change::Unset => {
                unset.insert(name.to_string(), json!(""));
            }
        };

        record(fields::ENABLED, map_change(&self.enabled, |v| json!(v)));
        record(fields::START_AT, map_change(&self.start_at, |v| json!(timestamp(*v))));
        record(fields::LOCKED, map_change(&self.locked, |v| json!(v)));
        record(fields::STARTED_AT, map_change(&self.started_at, |v| json!(timestamp(*v))));
        record(fields::PROCESSED_AT, map_change(&self.processed_at, |v| json!(timestamp(*v))));
        record(fields::EXPIRED_AT, map_change(&self.expired_at, |v| json!(timestamp(*v))));
        record(fields::LAST_ERROR, map_change(&self.last_error, |v| json!(v)));

        let mut document = Map::new();
        if !set.is_empty() {
            document.insert("$set".to_string(), Value::Object(set));
        }
        if !unset.is_empty() {
            document.insert("$unset".to_string(), Value::Object(unset));
        }
        Value::Object(document)
    }
}

fn map_change<T>(change: &Change<T>, f: impl FnOnce(&T) -> Value) -> Change<Value> {
    match change {
        Change::Keep => Change::Keep,
        Change::Set(value) => Change::Set(f(value)),
        Change::Unset => Change::Unset,
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
