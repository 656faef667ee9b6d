//! Execution engine settings.

use std::time::Duration;

use cpgq_core::defaults;
use cpgq_core::{Error, Result};

use crate::cache::CacheConfig;
use crate::concurrency::ConcurrencyConfig;

/// Configuration for [`crate::Executor`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub concurrency: ConcurrencyConfig,
    /// Queries at or above this duration go to the slow-query log.
    pub slow_query_threshold: Duration,
    /// Slow-query log capacity.
    pub slow_query_max_records: usize,
    /// Duration samples kept for percentiles.
    pub metrics_window: usize,
    /// Longest accepted query, in characters.
    pub max_query_length: usize,
    /// Case-insensitive regexes rejected before execution.
    pub forbidden_patterns: Vec<String>,
    /// Timeout used when a request does not set one.
    pub default_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            slow_query_threshold: Duration::from_secs_f64(defaults::SLOW_QUERY_THRESHOLD_SECS),
            slow_query_max_records: defaults::SLOW_QUERY_MAX_RECORDS,
            metrics_window: defaults::METRICS_WINDOW,
            max_query_length: defaults::MAX_QUERY_LENGTH,
            forbidden_patterns: defaults::FORBIDDEN_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            default_timeout: defaults::query_timeout(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CPGQ_CACHE_HOT_SIZE` | `100` | Hot tier capacity |
    /// | `CPGQ_CACHE_COLD_SIZE` | `1000` | Cold tier capacity |
    /// | `CPGQ_CACHE_TTL_SECS` | `3600` | Cold tier TTL |
    /// | `CPGQ_CACHE_COMPRESS_THRESHOLD` | `10240` | Bytes above which values are compressed |
    /// | `CPGQ_CACHE_PROMOTION_THRESHOLD` | `3` | Cold hits before promotion |
    /// | `CPGQ_CONCURRENCY_BASE` | `5` | Starting admission limit |
    /// | `CPGQ_CONCURRENCY_MIN` | base | Lowest admission limit |
    /// | `CPGQ_CONCURRENCY_MAX` | 4 × base | Highest admission limit |
    /// | `CPGQ_CONCURRENCY_TARGET_MS` | `1000` | Target mean latency |
    /// | `CPGQ_CONCURRENCY_INTERVAL` | `10` | Completions between adjustments |
    /// | `CPGQ_SLOW_QUERY_THRESHOLD_SECS` | `5.0` | Slow-query threshold |
    /// | `CPGQ_SLOW_QUERY_MAX_RECORDS` | `100` | Slow-query log capacity |
    /// | `CPGQ_METRICS_WINDOW` | `1000` | Percentile sample window |
    /// | `CPGQ_MAX_QUERY_LENGTH` | `10000` | Longest accepted query |
    /// | `CPGQ_QUERY_TIMEOUT_SECS` | `300` | Default per-query timeout |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("CPGQ_CACHE_HOT_SIZE") {
            config.cache.hot_size = v;
        }
        if let Some(v) = env_parse("CPGQ_CACHE_COLD_SIZE") {
            config.cache.cold_size = v;
        }
        if let Some(v) = env_parse("CPGQ_CACHE_TTL_SECS") {
            config.cache.ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse("CPGQ_CACHE_COMPRESS_THRESHOLD") {
            config.cache.compress_threshold = v;
        }
        if let Some(v) = env_parse("CPGQ_CACHE_PROMOTION_THRESHOLD") {
            config.cache.promotion_threshold = v;
        }

        let base = env_parse("CPGQ_CONCURRENCY_BASE").unwrap_or(defaults::CONCURRENCY_BASE);
        config.concurrency = ConcurrencyConfig::with_base(base);
        if let Some(v) = env_parse("CPGQ_CONCURRENCY_MIN") {
            config.concurrency.min_limit = v;
        }
        if let Some(v) = env_parse("CPGQ_CONCURRENCY_MAX") {
            config.concurrency.max_limit = v;
        }
        if let Some(v) = env_parse("CPGQ_CONCURRENCY_TARGET_MS") {
            config.concurrency.target_latency = Duration::from_millis(v);
        }
        if let Some(v) = env_parse("CPGQ_CONCURRENCY_INTERVAL") {
            config.concurrency.adjustment_interval = v;
        }

        if let Some(v) = env_parse::<f64>("CPGQ_SLOW_QUERY_THRESHOLD_SECS") {
            if v.is_finite() && v >= 0.0 {
                config.slow_query_threshold = Duration::from_secs_f64(v);
            }
        }
        if let Some(v) = env_parse("CPGQ_SLOW_QUERY_MAX_RECORDS") {
            config.slow_query_max_records = v;
        }
        if let Some(v) = env_parse("CPGQ_METRICS_WINDOW") {
            config.metrics_window = v;
        }
        if let Some(v) = env_parse("CPGQ_MAX_QUERY_LENGTH") {
            config.max_query_length = v;
        }
        if let Some(v) = env_parse("CPGQ_QUERY_TIMEOUT_SECS") {
            config.default_timeout = Duration::from_secs(v);
        }

        config
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the concurrency configuration.
    pub fn with_concurrency(mut self, concurrency: ConcurrencyConfig) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the slow-query threshold.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Set the default per-query timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Add a forbidden pattern to the defaults.
    pub fn with_forbidden_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.forbidden_patterns.push(pattern.into());
        self
    }

    /// Set the maximum query length.
    pub fn with_max_query_length(mut self, max: usize) -> Self {
        self.max_query_length = max;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache.hot_size == 0 || self.cache.cold_size == 0 {
            return Err(Error::Config(
                "cache tier sizes must be at least 1".to_string(),
            ));
        }

        if self.cache.promotion_threshold == 0 {
            return Err(Error::Config(
                "promotion_threshold must be at least 1".to_string(),
            ));
        }

        let c = &self.concurrency;
        if c.min_limit == 0 {
            return Err(Error::Config(
                "concurrency min_limit must be at least 1".to_string(),
            ));
        }
        if c.min_limit > c.max_limit {
            return Err(Error::Config(format!(
                "concurrency min_limit ({}) exceeds max_limit ({})",
                c.min_limit, c.max_limit
            )));
        }
        if c.adjustment_interval == 0 {
            return Err(Error::Config(
                "adjustment_interval must be at least 1".to_string(),
            ));
        }
        if c.target_latency.is_zero() {
            return Err(Error::Config(
                "target_latency must be positive".to_string(),
            ));
        }

        if self.max_query_length == 0 {
            return Err(Error::Config(
                "max_query_length must be at least 1".to_string(),
            ));
        }

        if self.default_timeout.is_zero() {
            return Err(Error::Config(
                "default_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
