//! # cpgq-client
//!
//! Client for the code-analysis backend's correlation protocol.
//!
//! The backend accepts a query over HTTP, announces completion on a
//! WebSocket notification channel, and serves the result over HTTP again.
//! [`ProtocolClient`] hides that exchange behind one awaitable call and
//! bounds how many exchanges may hold a notification channel at once.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cpgq_client::{ClientConfig, ProtocolClient};
//!
//! #[tokio::main]
//! async fn main() -> cpgq_core::Result<()> {
//!     let client = ProtocolClient::new(ClientConfig::for_endpoint("localhost", 8080))?;
//!     let result = client.execute("cpg.method.name.toJson", Duration::from_secs(30)).await?;
//!     println!("{}", result.payload);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod types;

pub use client::ProtocolClient;
pub use config::ClientConfig;
