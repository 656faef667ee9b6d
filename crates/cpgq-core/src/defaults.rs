//! Centralized default constants for cpgq.
//!
//! **This module is the single source of truth** for all shared default values.
//! Configuration types in the client and engine crates fall back to these
//! constants when an environment variable is unset.

use std::time::Duration;

// =============================================================================
// BACKEND
// =============================================================================

/// Default backend host.
pub const SERVER_HOST: &str = "localhost";

/// Default backend port.
pub const SERVER_PORT: u16 = 8080;

/// Path of the notification WebSocket.
pub const CONNECT_PATH: &str = "/connect";

/// Path of the submit endpoint.
pub const QUERY_PATH: &str = "/query";

/// Path prefix of the result endpoint (`/result/{uuid}`).
pub const RESULT_PATH: &str = "/result";

/// First message the backend sends on a fresh notification channel.
pub const CONNECTED_MESSAGE: &str = "connected";

/// Per-exchange timeout in seconds.
pub const EXCHANGE_TIMEOUT_SECS: u64 = 3600;

/// Maximum simultaneous exchanges holding an open notification channel.
pub const MAX_EXCHANGES: usize = 5;

// =============================================================================
// EXECUTION
// =============================================================================

/// Default caller timeout for one query in seconds.
pub const QUERY_TIMEOUT_SECS: u64 = 300;

/// Maximum accepted query length in characters.
pub const MAX_QUERY_LENGTH: usize = 10_000;

/// Complexity at or above which the effective timeout is scaled.
pub const SLOW_COMPLEXITY: u8 = 7;

/// Timeout multiplier applied to complex queries.
pub const SLOW_COMPLEXITY_TIMEOUT_FACTOR: f64 = 1.5;

/// Complexity at or below which results go straight to the hot tier.
pub const HOT_COMPLEXITY: u8 = 3;

/// Patterns denoting destructive operations on the backend host.
pub const FORBIDDEN_PATTERNS: &[&str] = &[
    r"System\.exit",
    r"Runtime\.getRuntime",
    r"ProcessBuilder",
    r"File\.delete",
    r"Files\.delete",
    r"scala\.sys\.process",
];

// =============================================================================
// CACHE
// =============================================================================

/// Hot tier capacity (LRU).
pub const CACHE_HOT_SIZE: usize = 100;

/// Cold tier capacity.
pub const CACHE_COLD_SIZE: usize = 1000;

/// Cold tier time-to-live in seconds.
pub const CACHE_TTL_SECS: u64 = 3600;

/// Serialized size above which entries are compressed (10 KiB).
pub const CACHE_COMPRESS_THRESHOLD: usize = 10 * 1024;

/// Cold hits needed before an entry is promoted to the hot tier.
pub const CACHE_PROMOTION_THRESHOLD: u32 = 3;

// =============================================================================
// CONCURRENCY
// =============================================================================

/// Base (and minimum) number of queries admitted at once.
pub const CONCURRENCY_BASE: usize = 5;

/// Maximum limit as a multiple of the base.
pub const CONCURRENCY_MAX_FACTOR: usize = 4;

/// Latency the controller steers towards, in milliseconds.
pub const CONCURRENCY_TARGET_MS: u64 = 1000;

/// Completions between two limit adjustments.
pub const CONCURRENCY_ADJUST_INTERVAL: usize = 10;

/// Permits added or removed per adjustment.
pub const CONCURRENCY_STEP: usize = 2;

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// Queries at or above this duration (seconds) are recorded as slow.
pub const SLOW_QUERY_THRESHOLD_SECS: f64 = 5.0;

/// Slow-query ring buffer capacity.
pub const SLOW_QUERY_MAX_RECORDS: usize = 100;

/// Characters of query text kept in a slow-query record.
pub const SLOW_QUERY_TEXT_CHARS: usize = 200;

/// Duration samples kept for percentile computation.
pub const METRICS_WINDOW: usize = 1000;

/// Default caller timeout as a `Duration`.
pub fn query_timeout() -> Duration {
    Duration::from_secs(QUERY_TIMEOUT_SECS)
}
