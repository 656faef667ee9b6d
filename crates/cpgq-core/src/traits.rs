//! Core traits for cpgq abstractions.
//!
//! The engine talks to the analysis backend only through [`QueryBackend`],
//! which keeps the executor testable against an in-memory mock.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::QueryResult;

/// A backend able to run one already-formatted query.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run `query` and return the normalized result.
    ///
    /// Backend-reported failures come back as `Ok(QueryResult { ok: false, .. })`;
    /// only transport and protocol failures, and exceeding `timeout`, are `Err`.
    async fn send(&self, query: &str, timeout: Duration) -> Result<QueryResult>;
}
