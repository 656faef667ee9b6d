//! # cpgq-core
//!
//! Core types, traits, and the error taxonomy shared by the cpgq crates.
//!
//! This crate provides the foundational data structures (`QueryRequest`,
//! `QueryResult`, `OutputFormat`) and the `QueryBackend` trait that the
//! protocol client implements and the execution engine consumes.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, ProtocolError, Result};
pub use models::{OutputFormat, QueryRequest, QueryResult};
pub use traits::QueryBackend;
