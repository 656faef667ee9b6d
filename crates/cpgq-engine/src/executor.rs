//! Query execution pipeline.
//!
//! [`Executor::execute`] runs each request through:
//!
//! 1. validation (length and forbidden operations; no I/O on rejection)
//! 2. complexity scoring
//! 3. output-format rewriting
//! 4. cache lookup on the rewritten text
//! 5. admission, then the backend call under the effective timeout
//! 6. caching, metrics, limit adjustment, and the slow-query log

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use cpgq_core::{defaults, logging, Error, QueryBackend, QueryRequest, QueryResult, Result};

use crate::cache::{cache_key, CacheStats, HybridCache};
use crate::complexity::{self, ComplexityScore};
use crate::concurrency::{ConcurrencyController, ConcurrencyStatus};
use crate::config::EngineConfig;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::slow_log::{SlowQueryLog, SlowQueryRecord};
use crate::validation::QueryValidator;

/// Slow queries included in an [`EngineReport`].
const REPORT_SLOW_QUERIES: usize = 10;

/// Everything the engine knows about its own performance.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub metrics: MetricsSnapshot,
    pub cache: CacheStats,
    pub concurrency: ConcurrencyStatus,
    pub slow_queries: Vec<SlowQueryRecord>,
}

/// Runs queries against a [`QueryBackend`] with caching and admission control.
pub struct Executor {
    backend: Arc<dyn QueryBackend>,
    config: EngineConfig,
    validator: QueryValidator,
    cache: HybridCache,
    controller: ConcurrencyController,
    metrics: Arc<MetricsCollector>,
    slow_log: SlowQueryLog,
}

impl Executor {
    /// Create an executor with its own metrics collector.
    pub fn new(backend: Arc<dyn QueryBackend>, config: EngineConfig) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new(config.metrics_window));
        Self::with_metrics(backend, config, metrics)
    }

    /// Create an executor reporting into a shared metrics collector.
    pub fn with_metrics(
        backend: Arc<dyn QueryBackend>,
        config: EngineConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        config.validate()?;
        let validator =
            QueryValidator::new(config.max_query_length, config.forbidden_patterns.as_slice())?;

        Ok(Self {
            backend,
            validator,
            cache: HybridCache::new(config.cache.clone()),
            controller: ConcurrencyController::new(config.concurrency.clone()),
            slow_log: SlowQueryLog::new(config.slow_query_threshold, config.slow_query_max_records),
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute one query.
    ///
    /// Backend-reported failures surface as [`Error::Execution`] and are never
    /// cached. Every error is counted as a failed query.
    #[instrument(skip(self, request), fields(query = %logging::preview(request.query())))]
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResult> {
        let started = Instant::now();
        let outcome = self.run(request, started).await;

        if let Err(ref e) = outcome {
            self.metrics.record_query(started.elapsed(), false, false);
            match e {
                Error::Validation(_) => debug!(error = %e, "Query rejected"),
                _ => warn!(error = %e, "Query failed"),
            }
        }
        outcome
    }

    async fn run(&self, request: &QueryRequest, started: Instant) -> Result<QueryResult> {
        self.validator.validate(request.query())?;

        let complexity = complexity::score(request.query());
        let formatted = request.format().apply(request.query());
        let key = cache_key(&formatted);
        debug!(
            complexity = complexity.score,
            priority = complexity.priority,
            estimated_secs = complexity.estimated_seconds,
            "Scored query"
        );

        if request.use_cache() {
            if let Some(cached) = self.cache.get(&key) {
                self.metrics.record_query(started.elapsed(), true, true);
                debug!(cache_key = %key, "Cache hit");
                return Ok(cached);
            }
        }

        let _permit = self.controller.acquire().await?;

        let timeout = self.effective_timeout(request, &complexity);
        let sent = {
            let _in_flight = self.metrics.begin_query();
            tokio::time::timeout(timeout, self.backend.send(&formatted, timeout)).await
        };
        let result = sent.map_err(|_| Error::Timeout(timeout))??;

        if !result.ok {
            return Err(Error::Execution(result.error_text));
        }

        let duration = started.elapsed();
        if request.use_cache() {
            self.cache.set(&key, result.clone(), complexity.is_hot());
        }
        self.metrics.record_query(duration, true, false);
        self.controller.adjust(duration);

        let mut extra = BTreeMap::new();
        extra.insert("complexity".to_string(), json!(complexity.score));
        extra.insert("cached".to_string(), json!(false));
        self.slow_log.log(&formatted, duration, extra);

        debug!(duration_ms = duration.as_millis() as u64, "Query completed");
        Ok(result)
    }

    /// Caller timeout (or the default), stretched for complex queries.
    fn effective_timeout(&self, request: &QueryRequest, complexity: &ComplexityScore) -> Duration {
        let base = request.timeout().unwrap_or(self.config.default_timeout);
        if complexity.is_slow() {
            base.mul_f64(defaults::SLOW_COMPLEXITY_TIMEOUT_FACTOR)
        } else {
            base
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn performance_stats(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Most recent slow queries, oldest first.
    pub fn slow_queries(&self, limit: usize) -> Vec<SlowQueryRecord> {
        self.slow_log.recent(limit)
    }

    pub fn current_concurrent_limit(&self) -> usize {
        self.controller.current_limit()
    }

    pub fn concurrency_status(&self) -> ConcurrencyStatus {
        self.controller.status()
    }

    /// Combined metrics, cache, admission and slow-query view.
    pub fn report(&self) -> EngineReport {
        EngineReport {
            metrics: self.performance_stats(),
            cache: self.cache_stats(),
            concurrency: self.concurrency_status(),
            slow_queries: self.slow_queries(REPORT_SLOW_QUERIES),
        }
    }
}
