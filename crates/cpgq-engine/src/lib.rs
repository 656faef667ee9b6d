//! # cpgq-engine
//!
//! Adaptive execution layer in front of a [`cpgq_core::QueryBackend`].
//!
//! The [`Executor`] validates and scores each query, rewrites it for the
//! requested output format, answers repeats from a two-tier cache, and admits
//! the rest through a concurrency limit that tunes itself from observed
//! latency. Metrics and a slow-query log record what happened.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cpgq_core::{QueryBackend, QueryRequest};
//! use cpgq_engine::{EngineConfig, Executor};
//!
//! # async fn run(backend: Arc<dyn QueryBackend>) -> cpgq_core::Result<()> {
//! let executor = Executor::new(backend, EngineConfig::from_env())?;
//! let result = executor.execute(&QueryRequest::new("cpg.method.name")).await?;
//! println!("{}", result.payload);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod complexity;
pub mod concurrency;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod slow_log;
pub mod validation;

pub use cache::{cache_key, CacheConfig, CacheStats, HybridCache};
pub use complexity::ComplexityScore;
pub use concurrency::{AdmissionPermit, ConcurrencyConfig, ConcurrencyController, ConcurrencyStatus};
pub use config::EngineConfig;
pub use executor::{EngineReport, Executor};
pub use metrics::{InFlightGuard, MetricsCollector, MetricsSnapshot};
pub use slow_log::{SlowQueryLog, SlowQueryRecord};
pub use validation::QueryValidator;
