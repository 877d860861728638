//! Record identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Process-wide counter mixed into the low bits of generated ids.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier of a job record within its collection.
///
/// Generated ids are 13 characters of base32-sortable encoding:
/// - upper 53 bits: microseconds since the Unix epoch
/// - lower 10 bits: per-process counter (collision prevention)
///
/// Ids supplied by the surrounding application are accepted verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new time-ordered id.
    pub fn generate() -> Self {
        let micros = Utc::now().timestamp_micros().max(0) as u64;
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x3FF;
        Self::from_u64((micros << 10) | counter)
    }

    /// Wrap an externally assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_u64(val: u64) -> Self {
        const CHARSET: &[u8] = b"234567abcdefghijklmnopqrstuvwxyz";
        let mut id = String::with_capacity(13);

        let mut v = val;
        for _ in 0..13 {
            id.push(CHARSET[(v & 0x1f) as usize] as char);
            v >>= 5;
        }

        Self(id.chars().rev().collect())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
