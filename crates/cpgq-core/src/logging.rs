//! Logging helpers shared by the client and the engine.
//!
//! Query text is attached to spans through [`preview`], never in full.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Exchange failed, caller receives an error |
//! | WARN  | Degraded path taken (cache fallback, slow query) |
//! | INFO  | Lifecycle events, concurrency limit changes |
//! | DEBUG | Decision points (cache hit/miss, complexity, tokens) |
//! | TRACE | Per-message notification traffic |

/// Characters of query text included in log lines.
pub const QUERY_PREVIEW_CHARS: usize = 100;

/// Shorten query text for log output without splitting a character.
pub fn preview(query: &str) -> &str {
    match query.char_indices().nth(QUERY_PREVIEW_CHARS) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}
