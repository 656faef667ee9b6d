//! Pre-flight checks run on the caller's raw query text.

use regex::{Regex, RegexBuilder};

use cpgq_core::{Error, Result};

/// Rejects oversized queries and queries naming destructive operations.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_length: usize,
    forbidden: Vec<Regex>,
}

impl QueryValidator {
    /// Compile `patterns` (case-insensitive regexes).
    ///
    /// An invalid pattern is a configuration error.
    pub fn new<S: AsRef<str>>(max_length: usize, patterns: &[S]) -> Result<Self> {
        let forbidden = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        Error::Config(format!("invalid forbidden pattern {:?}: {}", p.as_ref(), e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            max_length,
            forbidden,
        })
    }

    /// Check `query`; the error message names the violated rule.
    pub fn validate(&self, query: &str) -> Result<()> {
        let length = query.chars().count();
        if length > self.max_length {
            return Err(Error::Validation(format!(
                "Query too long ({} characters, max {})",
                length, self.max_length
            )));
        }

        if let Some(pattern) = self.forbidden.iter().find(|re| re.is_match(query)) {
            return Err(Error::Validation(format!(
                "Forbidden operation: {}",
                pattern.as_str()
            )));
        }

        Ok(())
    }
}
