//! Request and result models exchanged between the engine and a backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Output format requested from the backend.
///
/// Each variant owns exactly one rewrite rule in [`OutputFormat::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Send the query as written.
    Raw,
    /// Ask the backend to render the result as JSON.
    #[default]
    Structured,
    /// Ask the backend to render the result as a DOT graph.
    Graph,
}

impl OutputFormat {
    const JSON_SUFFIX: &'static str = ".toJson";
    const DOT_SUFFIX: &'static str = ".toDot";

    /// Rewrite `query` so the backend renders its result in this format.
    ///
    /// Surrounding whitespace is always trimmed. Applying the same format
    /// twice yields the same text as applying it once.
    pub fn apply(&self, query: &str) -> String {
        let query = query.trim();
        match self {
            OutputFormat::Raw => query.to_string(),
            OutputFormat::Structured => {
                if query.ends_with(Self::JSON_SUFFIX) {
                    query.to_string()
                } else if query.contains('\n') || query.contains(';') {
                    // Multi-statement bodies must be grouped before the suffix binds
                    format!("({}){}", query, Self::JSON_SUFFIX)
                } else {
                    format!("{}{}", query, Self::JSON_SUFFIX)
                }
            }
            OutputFormat::Graph => {
                if query.ends_with(Self::DOT_SUFFIX) {
                    query.to_string()
                } else {
                    format!("{}{}", query, Self::DOT_SUFFIX)
                }
            }
        }
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "structured" | "json" => Ok(Self::Structured),
            "graph" | "dot" => Ok(Self::Graph),
            _ => Err(Error::Validation(format!("unknown output format: {}", s))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Structured => write!(f, "structured"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// A query submitted to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    query: String,
    format: OutputFormat,
    timeout: Option<Duration>,
    use_cache: bool,
}

impl QueryRequest {
    /// Create a request for `query` with the default (structured) format.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            format: OutputFormat::default(),
            timeout: None,
            use_cache: true,
        }
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Override the engine's default timeout for this query.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Skip the cache for both lookup and store.
    pub fn bypass_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }
}

/// Normalized outcome of one backend query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Whether the backend reported success.
    pub ok: bool,
    /// Backend output (text or JSON) on success.
    pub payload: String,
    /// Backend error message on failure.
    pub error_text: String,
}

impl QueryResult {
    /// A successful result carrying `payload`.
    pub fn success(payload: impl Into<String>) -> Self {
        Self {
            ok: true,
            payload: payload.into(),
            error_text: String::new(),
        }
    }

    /// A backend-reported failure carrying `error_text`.
    pub fn failure(error_text: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: String::new(),
            error_text: error_text.into(),
        }
    }
}
