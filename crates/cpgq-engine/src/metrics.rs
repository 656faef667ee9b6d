//! Query counters and latency percentiles.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;

use cpgq_core::defaults;

/// Aggregate view of recorded queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub successful_queries: u64,
    pub failed_queries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percent of queries that succeeded.
    pub success_rate: f64,
    /// Percent of queries answered from cache.
    pub cache_hit_rate: f64,
    pub avg_duration_secs: f64,
    /// Fastest recorded query in seconds, 0 before the first one.
    pub min_time: f64,
    /// Slowest recorded query in seconds.
    pub max_time: f64,
    pub p50_secs: f64,
    pub p95_secs: f64,
    pub p99_secs: f64,
    pub current_concurrent: usize,
    pub peak_concurrent: usize,
}

#[derive(Default)]
struct MetricsState {
    total_queries: u64,
    successful_queries: u64,
    failed_queries: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_secs: f64,
    min_secs: Option<f64>,
    max_secs: f64,
    durations: VecDeque<f64>,
    current_concurrent: usize,
    peak_concurrent: usize,
}

/// Thread-safe query metrics shared by the executor and its owner.
pub struct MetricsCollector {
    window: usize,
    state: Mutex<MetricsState>,
}

/// Marks one query as in flight until dropped.
pub struct InFlightGuard<'a> {
    metrics: &'a MetricsCollector,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.metrics.lock();
        state.current_concurrent = state.current_concurrent.saturating_sub(1);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(defaults::METRICS_WINDOW)
    }
}

impl MetricsCollector {
    /// Keep the last `window` durations for percentiles.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            state: Mutex::new(MetricsState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one finished query.
    pub fn record_query(&self, duration: Duration, success: bool, cached: bool) {
        let secs = duration.as_secs_f64();
        let mut state = self.lock();
        state.total_queries += 1;
        if success {
            state.successful_queries += 1;
        } else {
            state.failed_queries += 1;
        }
        if cached {
            state.cache_hits += 1;
        } else {
            state.cache_misses += 1;
        }
        state.total_secs += secs;
        state.min_secs = Some(state.min_secs.map_or(secs, |min| min.min(secs)));
        state.max_secs = state.max_secs.max(secs);
        if state.durations.len() == self.window {
            state.durations.pop_front();
        }
        state.durations.push_back(secs);
    }

    /// Count a query as in flight for the lifetime of the guard.
    pub fn begin_query(&self) -> InFlightGuard<'_> {
        let mut state = self.lock();
        state.current_concurrent += 1;
        state.peak_concurrent = state.peak_concurrent.max(state.current_concurrent);
        InFlightGuard { metrics: self }
    }

    /// `p`th percentile (0-100) of windowed durations in seconds.
    pub fn percentile(&self, p: f64) -> f64 {
        percentile_of(&self.lock().durations, p)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.lock();
        let total = state.total_queries;
        let rate = |n: u64, of: u64| {
            if of == 0 {
                0.0
            } else {
                round(n as f64 / of as f64 * 100.0, 2)
            }
        };
        let lookups = state.cache_hits + state.cache_misses;

        MetricsSnapshot {
            total_queries: total,
            successful_queries: state.successful_queries,
            failed_queries: state.failed_queries,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            success_rate: rate(state.successful_queries, total),
            cache_hit_rate: rate(state.cache_hits, lookups),
            avg_duration_secs: if total == 0 {
                0.0
            } else {
                round(state.total_secs / total as f64, 3)
            },
            min_time: round(state.min_secs.unwrap_or(0.0), 3),
            max_time: round(state.max_secs, 3),
            p50_secs: round(percentile_of(&state.durations, 50.0), 3),
            p95_secs: round(percentile_of(&state.durations, 95.0), 3),
            p99_secs: round(percentile_of(&state.durations, 99.0), 3),
            current_concurrent: state.current_concurrent,
            peak_concurrent: state.peak_concurrent,
        }
    }

    /// Zero every counter. Queries still in flight stay counted.
    pub fn reset(&self) {
        let mut state = self.lock();
        let in_flight = state.current_concurrent;
        *state = MetricsState {
            current_concurrent: in_flight,
            peak_concurrent: in_flight,
            ..MetricsState::default()
        };
    }
}

fn percentile_of(durations: &VecDeque<f64>, p: f64) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = durations.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let index = ((sorted.len() as f64 * p / 100.0) as usize).min(sorted.len() - 1);
    sorted[index]
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
