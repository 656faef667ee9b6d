//! Self-tuning admission control.
//!
//! The controller admits at most `current_limit` queries at once and moves
//! that limit between `min_limit` and `max_limit` based on observed latency:
//! every `adjustment_interval` completions the mean duration is compared with
//! the target and the limit is stepped down when queries are slow and up when
//! they are fast.
//!
//! The limit is applied to a single permit pool in place. Raising it adds
//! permits. Lowering it forgets idle permits and records any shortfall as
//! debt; permits returned while debt is outstanding are forgotten instead of
//! going back to the pool. Tasks already waiting in `acquire()` keep waiting
//! on the same pool, so none are lost across a resize.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use cpgq_core::{defaults, Error, Result};

/// Bounds and tuning for [`ConcurrencyController`].
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Starting limit.
    pub base_limit: usize,
    /// Floor for the limit.
    pub min_limit: usize,
    /// Ceiling for the limit.
    pub max_limit: usize,
    /// Mean latency the controller steers towards.
    pub target_latency: Duration,
    /// Completions between adjustments.
    pub adjustment_interval: usize,
    /// Permits added or removed per adjustment.
    pub step: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self::with_base(defaults::CONCURRENCY_BASE)
    }
}

impl ConcurrencyConfig {
    /// Defaults scaled from `base`: min = base, max = 4 × base.
    pub fn with_base(base: usize) -> Self {
        Self {
            base_limit: base,
            min_limit: base,
            max_limit: base * defaults::CONCURRENCY_MAX_FACTOR,
            target_latency: Duration::from_millis(defaults::CONCURRENCY_TARGET_MS),
            adjustment_interval: defaults::CONCURRENCY_ADJUST_INTERVAL,
            step: defaults::CONCURRENCY_STEP,
        }
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyStatus {
    pub current_limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub available_permits: usize,
}

struct LimitState {
    current_limit: usize,
    window: Vec<Duration>,
}

/// Adjustable admission gate for query execution.
pub struct ConcurrencyController {
    config: ConcurrencyConfig,
    permits: Arc<Semaphore>,
    /// Permits still to be removed once their holders release them.
    debt: Arc<AtomicUsize>,
    state: Mutex<LimitState>,
}

/// Admission slot held while a query runs. Released on drop.
#[derive(Debug)]
pub struct AdmissionPermit {
    permit: Option<OwnedSemaphorePermit>,
    debt: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let repaid = self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| d.checked_sub(1))
            .is_ok();
        if repaid {
            permit.forget();
        }
    }
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new(ConcurrencyConfig::default())
    }
}

impl ConcurrencyController {
    /// Create a controller starting at `base_limit`, clamped into bounds.
    pub fn new(config: ConcurrencyConfig) -> Self {
        let min_limit = config.min_limit.max(1);
        let max_limit = config.max_limit.max(min_limit);
        let config = ConcurrencyConfig {
            min_limit,
            max_limit,
            adjustment_interval: config.adjustment_interval.max(1),
            ..config
        };
        let current_limit = config.base_limit.clamp(min_limit, max_limit);

        Self {
            permits: Arc::new(Semaphore::new(current_limit)),
            debt: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(LimitState {
                current_limit,
                window: Vec::with_capacity(config.adjustment_interval),
            }),
            config,
        }
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    /// Wait for an admission slot.
    pub async fn acquire(&self) -> Result<AdmissionPermit> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("admission pool closed".to_string()))?;
        Ok(AdmissionPermit {
            permit: Some(permit),
            debt: Arc::clone(&self.debt),
        })
    }

    /// Current admission limit.
    pub fn current_limit(&self) -> usize {
        self.lock_state().current_limit
    }

    pub fn status(&self) -> ConcurrencyStatus {
        ConcurrencyStatus {
            current_limit: self.current_limit(),
            min_limit: self.config.min_limit,
            max_limit: self.config.max_limit,
            available_permits: self.permits.available_permits(),
        }
    }

    /// Report one completed query's duration.
    ///
    /// Returns the new limit when this report triggered a change.
    pub fn adjust(&self, duration: Duration) -> Option<usize> {
        let mut state = self.lock_state();
        state.window.push(duration);
        if state.window.len() < self.config.adjustment_interval {
            return None;
        }

        let total: Duration = state.window.iter().sum();
        let mean = total / state.window.len() as u32;
        state.window.clear();

        let target = self.config.target_latency;
        let old_limit = state.current_limit;
        let new_limit = if mean > target.mul_f64(1.5) {
            old_limit
                .saturating_sub(self.config.step)
                .max(self.config.min_limit)
        } else if mean < target.mul_f64(0.5) {
            (old_limit + self.config.step).min(self.config.max_limit)
        } else {
            old_limit
        };

        if new_limit == old_limit {
            debug!(mean_ms = mean.as_millis() as u64, limit = old_limit, "Concurrency limit unchanged");
            return None;
        }

        if new_limit > old_limit {
            self.grow(new_limit - old_limit);
        } else {
            self.shrink(old_limit - new_limit);
        }
        state.current_limit = new_limit;

        info!(
            mean_ms = mean.as_millis() as u64,
            old_limit, new_limit, "Adjusted concurrency limit"
        );
        Some(new_limit)
    }

    fn grow(&self, n: usize) {
        let previous = self
            .debt
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                Some(d.saturating_sub(n))
            })
            .unwrap_or(0);
        let repaid = previous.min(n);
        if n > repaid {
            self.permits.add_permits(n - repaid);
        }
    }

    fn shrink(&self, n: usize) {
        let forgotten = self.permits.forget_permits(n);
        if forgotten < n {
            self.debt.fetch_add(n - forgotten, Ordering::AcqRel);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LimitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
