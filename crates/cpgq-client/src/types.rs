//! Wire types for the submit and fetch endpoints.

use cpgq_core::{ProtocolError, QueryResult};
use serde::{Deserialize, Serialize};

/// Body of `POST /query`.
#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub query: &'a str,
}

/// Response of `POST /query`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Correlation token for the completion notification and the fetch.
    pub uuid: String,
}

/// Response of `GET /result/{uuid}`.
#[derive(Debug, Default, Deserialize)]
pub struct ResultEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub err: Option<String>,
}

impl ResultEnvelope {
    /// Normalize into a [`QueryResult`].
    ///
    /// An `err` field wins over everything else. Backend failures become
    /// `ok == false`; only an envelope with neither `err` nor `success` is a
    /// protocol error.
    pub fn into_result(self) -> Result<QueryResult, ProtocolError> {
        if let Some(err) = self.err {
            return Ok(QueryResult::failure(err));
        }

        match self.success {
            Some(true) => Ok(QueryResult::success(self.stdout.unwrap_or_default())),
            Some(false) => {
                let message = self
                    .stderr
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "backend reported failure".to_string());
                Ok(QueryResult::failure(message))
            }
            None => Err(ProtocolError::Envelope(
                "result has neither `success` nor `err`".to_string(),
            )),
        }
    }
}
