//! Bounded log of queries that exceeded the slow threshold.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use cpgq_core::{defaults, logging};

/// One slow query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryRecord {
    /// Query text, truncated.
    pub query: String,
    pub duration_secs: f64,
    pub timestamp: DateTime<Utc>,
    /// Caller-supplied metadata such as complexity.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Ring buffer of the most recent slow queries.
pub struct SlowQueryLog {
    threshold: Duration,
    max_records: usize,
    records: Mutex<VecDeque<SlowQueryRecord>>,
}

impl Default for SlowQueryLog {
    fn default() -> Self {
        Self::new(
            Duration::from_secs_f64(defaults::SLOW_QUERY_THRESHOLD_SECS),
            defaults::SLOW_QUERY_MAX_RECORDS,
        )
    }
}

impl SlowQueryLog {
    pub fn new(threshold: Duration, max_records: usize) -> Self {
        Self {
            threshold,
            max_records: max_records.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SlowQueryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `query` if it took at least the threshold.
    ///
    /// Returns whether a record was kept.
    pub fn log(&self, query: &str, duration: Duration, extra: BTreeMap<String, Value>) -> bool {
        if duration < self.threshold {
            return false;
        }

        let record = SlowQueryRecord {
            query: truncate(query, defaults::SLOW_QUERY_TEXT_CHARS),
            duration_secs: duration.as_secs_f64(),
            timestamp: Utc::now(),
            extra,
        };

        warn!(
            duration_ms = duration.as_millis() as u64,
            query = %logging::preview(query),
            "Slow query"
        );

        let mut records = self.lock();
        records.push_back(record);
        while records.len() > self.max_records {
            records.pop_front();
        }
        true
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SlowQueryRecord> {
        let records = self.lock();
        let skip = records.len().saturating_sub(limit);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn truncate(query: &str, max_chars: usize) -> String {
    match query.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &query[..end]),
        None => query.to_string(),
    }
}
