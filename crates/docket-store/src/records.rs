//! Job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::JobId;

/// Serialized names of the cron field group.
///
/// Store adapters that build native queries use these instead of
/// hard-coding document keys.
pub mod fields {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const ENABLED: &str = "enabled";
    pub const START_AT: &str = "startAt";
    pub const STOP_AT: &str = "stopAt";
    pub const INTERVAL: &str = "interval";
    pub const REMOVE_EXPIRED: &str = "removeExpired";
    pub const LOCKED: &str = "locked";
    pub const STARTED_AT: &str = "startedAt";
    pub const PROCESSED_AT: &str = "processedAt";
    pub const EXPIRED_AT: &str = "expiredAt";
    pub const LAST_ERROR: &str = "lastError";

    /// Every field contributed by [`CronFields`](super::CronFields).
    pub const CRON: &[&str] = &[
        ENABLED,
        START_AT,
        STOP_AT,
        INTERVAL,
        REMOVE_EXPIRED,
        LOCKED,
        STARTED_AT,
        PROCESSED_AT,
        EXPIRED_AT,
        LAST_ERROR,
    ];

    /// Whether `key` is owned by the record itself rather than its payload.
    pub fn is_reserved(key: &str) -> bool {
        key == ID || key == KIND || CRON.contains(&key)
    }
}

/// The scheduling field group merged into any job-bearing document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronFields {
    /// Master switch; disabled records are never claimed.
    #[serde(default)]
    pub enabled: bool,
    /// Earliest moment the job may run. Absent is treated as due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Latest moment the job may run. Absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at: Option<DateTime<Utc>>,
    /// Cron expression (seconds first). Absent means the job runs once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Delete the record instead of marking it expired.
    #[serde(default)]
    pub remove_expired: bool,
    /// Present and true while a worker holds the claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    /// Set every time a worker claims the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set every time processing finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Set when the engine found no further run and kept the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    /// Message of the last failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CronFields {
    /// An enabled one-shot job due at `start_at`.
    pub fn once(start_at: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            start_at: Some(start_at),
            ..Default::default()
        }
    }

    /// An enabled recurring job following `interval`, first due at `start_at`.
    pub fn recurring(interval: impl Into<String>, start_at: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            start_at: Some(start_at),
            interval: Some(interval.into()),
            ..Default::default()
        }
    }

    /// Bound the job by a latest run moment.
    pub fn until(mut self, stop_at: DateTime<Utc>) -> Self {
        self.stop_at = Some(stop_at);
        self
    }

    /// Delete the record once it has no further run.
    pub fn remove_when_expired(mut self) -> Self {
        self.remove_expired = true;
        self
    }

    /// Whether a worker currently holds the claim.
    pub fn is_locked(&self) -> bool {
        self.locked == Some(true)
    }

    /// Whether the record is recurring.
    pub fn is_recurring(&self) -> bool {
        self.interval.is_some()
    }

    /// Derive the lifecycle state of the record.
    pub fn state(&self) -> JobState {
        if self.is_locked() {
            JobState::Processing
        } else if self.expired_at.is_some() {
            JobState::Expired
        } else if self.enabled {
            JobState::Pending
        } else {
            JobState::Disabled
        }
    }

    /// Whether a claim issued at `now` would select this record.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && !self.is_locked()
            && self.start_at.is_none_or(|start| start <= now)
            && self.stop_at.is_none_or(|stop| stop >= now)
    }
}

/// Lifecycle state derived from the cron field group.
///
/// `Removed` is terminal and has no live record, so it only appears in
/// outcomes reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Enabled and waiting for its start time.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// No further run exists; kept for inspection.
    Expired,
    /// Switched off by the surrounding application.
    Disabled,
}

/// A job document: identity, optional subtype tag, the cron field group and
/// whatever else the owning entity stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Record key within the collection.
    pub id: JobId,
    /// Subtype discriminator for polymorphic job entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Scheduling fields.
    #[serde(flatten)]
    pub cron: CronFields,
    /// Remaining document fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl JobRecord {
    /// Create a record with a generated id and an empty payload.
    pub fn new(cron: CronFields) -> Self {
        Self {
            id: JobId::generate(),
            kind: None,
            cron,
            payload: Map::new(),
        }
    }

    /// Use an externally assigned id.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    /// Tag the record with a subtype.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Attach a payload field.
    ///
    /// Keys owned by the record (see [`fields::is_reserved`]) are ignored;
    /// set those through `id`, `kind` and `cron` instead.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !fields::is_reserved(&key) {
            self.payload.insert(key, value.into());
        }
        self
    }

    /// Derive the lifecycle state of the record.
    pub fn state(&self) -> JobState {
        self.cron.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_serializes_camel_case_and_flattens() {
        let at = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let record = JobRecord::new(CronFields::recurring("* * * * * *", at))
            .with_id("job-2")
            .with_kind("reminder")
            .with_field("description", "remind me every 1s");

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "job-2",
                "kind": "reminder",
                "enabled": true,
                "startAt": "2025-01-01T00:00:00Z",
                "interval": "* * * * * *",
                "removeExpired": false,
                "description": "remind me every 1s",
            })
        );

        let decoded: JobRecord = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_cron_keys_stay_out_of_payload() {
        let at = "2025-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let record = JobRecord::new(CronFields::once(at))
            .with_id("job-1")
            .with_field(fields::ENABLED, false)
            .with_field(fields::START_AT, "1970-01-01T00:00:00Z")
            .with_field(fields::ID, "other")
            .with_field("title", "kept");

        assert_eq!(record.payload.len(), 1);
        assert!(record.cron.enabled);

        // Every cron key the document carries is one the group declares.
        let value = serde_json::to_value(&record).unwrap();
        let document = value.as_object().unwrap();
        let cron_keys: Vec<&str> = document
            .keys()
            .map(String::as_str)
            .filter(|key| fields::is_reserved(key) && *key != fields::ID)
            .collect();
        assert_eq!(cron_keys, vec![fields::ENABLED, fields::REMOVE_EXPIRED, fields::START_AT]);
        assert!(cron_keys.iter().all(|key| fields::CRON.contains(key)));
        assert_eq!(document[fields::START_AT], json!("2025-01-01T00:00:00Z"));
        assert!(!fields::is_reserved("title"));
    }

    #[test]
    fn test_missing_fields_default() {
        let record: JobRecord =
            serde_json::from_value(json!({"id": "job-1", "name": "Job 1"})).unwrap();
        assert!(!record.cron.enabled);
        assert!(record.cron.start_at.is_none());
        assert_eq!(record.payload.get("name"), Some(&json!("Job 1")));
        assert_eq!(record.state(), JobState::Disabled);
    }

    #[test]
    fn test_state_derivation() {
        let now = Utc::now();
        let mut cron = CronFields::once(now);
        assert_eq!(cron.state(), JobState::Pending);

        cron.locked = Some(true);
        assert_eq!(cron.state(), JobState::Processing);

        cron.locked = None;
        cron.enabled = false;
        assert_eq!(cron.state(), JobState::Disabled);

        cron.expired_at = Some(now);
        assert_eq!(cron.state(), JobState::Expired);
    }

    #[test]
    fn test_is_due_bounds() {
        let now = Utc::now();

        assert!(CronFields::once(now).is_due(now));
        assert!(!CronFields::once(now + Duration::hours(1)).is_due(now));
        assert!(
            !CronFields::once(now - Duration::hours(2))
                .until(now - Duration::hours(1))
                .is_due(now)
        );

        let unbounded = CronFields {
            enabled: true,
            ..Default::default()
        };
        assert!(unbounded.is_due(now));

        let mut locked = CronFields::once(now);
        locked.locked = Some(true);
        assert!(!locked.is_due(now));

        // An explicit `false` is treated like an absent lock.
        locked.locked = Some(false);
        assert!(locked.is_due(now));
    }

    #[test]
    fn test_stop_before_start_never_due() {
        let now = Utc::now();
        let cron = CronFields::once(now + Duration::seconds(10)).until(now);
        for offset in [-20, 0, 5, 10, 20] {
            assert!(!cron.is_due(now + Duration::seconds(offset)));
        }
    }
}
