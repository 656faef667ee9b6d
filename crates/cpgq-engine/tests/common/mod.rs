//! Shared test backend for executor scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cpgq_core::{QueryBackend, QueryResult, Result};

/// Scripted backend that counts calls and in-flight requests.
pub struct MockBackend {
    response: QueryResult,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Backend answering every query with `payload`.
    pub fn ok(payload: &str) -> Self {
        Self::responding(QueryResult::success(payload))
    }

    /// Backend reporting `message` as a failure for every query.
    pub fn failing(message: &str) -> Self {
        Self::responding(QueryResult::failure(message))
    }

    fn responding(response: QueryResult) -> Self {
        Self {
            response,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Queries as the backend received them.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for MockBackend {
    async fn send(&self, query: &str, _timeout: Duration) -> Result<QueryResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}
