//! cpgq: run code-property-graph queries through the adaptive engine.
//!
//! Backend and engine settings come from `CPGQ_*` environment variables
//! (a `.env` file is honored). Logs go to stderr so query output on stdout
//! stays clean.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cpgq_client::ProtocolClient;
use cpgq_core::{OutputFormat, QueryRequest};
use cpgq_engine::{EngineConfig, Executor};

#[derive(Parser)]
#[command(name = "cpgq")]
#[command(author, version, about = "Adaptive query runner for code-analysis backends")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one query and print its output
    Query {
        /// Query text
        query: String,

        /// Output format: raw, structured (json), or graph (dot)
        #[arg(short, long, default_value = "structured")]
        format: OutputFormat,

        /// Timeout in seconds (default: CPGQ_QUERY_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Run a query repeatedly and print the engine report as JSON
    Bench {
        /// Query text
        query: String,

        /// Total executions
        #[arg(short = 'n', long, default_value_t = 20)]
        iterations: usize,

        /// Executions in flight at once
        #[arg(short, long, default_value_t = 5)]
        concurrency: usize,

        /// Output format: raw, structured (json), or graph (dot)
        #[arg(short, long, default_value = "structured")]
        format: OutputFormat,

        /// Skip the result cache
        #[arg(long)]
        no_cache: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   RUST_LOG    - standard env filter (default: "cpgq=info")
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cpgq=info,cpgq_client=info,cpgq_engine=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format == "json" {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn build_executor() -> anyhow::Result<Executor> {
    let client = ProtocolClient::from_env().context("Failed to create protocol client")?;
    let executor = Executor::new(Arc::new(client), EngineConfig::from_env())
        .context("Failed to create executor")?;
    Ok(executor)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Query {
            query,
            format,
            timeout,
            no_cache,
        } => cmd_query(query, format, timeout, no_cache).await,
        Commands::Bench {
            query,
            iterations,
            concurrency,
            format,
            no_cache,
        } => cmd_bench(query, iterations, concurrency, format, no_cache).await,
    }
}

fn build_request(query: String, format: OutputFormat, no_cache: bool) -> QueryRequest {
    let request = QueryRequest::new(query).with_format(format);
    if no_cache {
        request.bypass_cache()
    } else {
        request
    }
}

async fn cmd_query(
    query: String,
    format: OutputFormat,
    timeout: Option<u64>,
    no_cache: bool,
) -> anyhow::Result<()> {
    let executor = build_executor()?;

    let mut request = build_request(query, format, no_cache);
    if let Some(secs) = timeout {
        request = request.with_timeout(Duration::from_secs(secs));
    }

    let result = executor.execute(&request).await?;
    println!("{}", result.payload);
    Ok(())
}

async fn cmd_bench(
    query: String,
    iterations: usize,
    concurrency: usize,
    format: OutputFormat,
    no_cache: bool,
) -> anyhow::Result<()> {
    anyhow::ensure!(concurrency > 0, "concurrency must be at least 1");

    let executor = build_executor()?;
    let request = build_request(query, format, no_cache);

    info!(iterations, concurrency, "Starting benchmark");
    let failures = stream::iter(0..iterations)
        .map(|_| executor.execute(&request))
        .buffer_unordered(concurrency)
        .filter(|outcome| {
            let failed = outcome.is_err();
            if let Err(e) = outcome {
                warn!(error = %e, "Benchmark iteration failed");
            }
            futures::future::ready(failed)
        })
        .count()
        .await;
    info!(failures, "Benchmark finished");

    println!("{}", serde_json::to_string_pretty(&executor.report())?);
    Ok(())
}
