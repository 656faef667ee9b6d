//! Submit / notify / fetch exchange with the analysis backend.
//!
//! One call to [`ProtocolClient::execute`] performs the whole exchange:
//!
//! 1. open the notification WebSocket and read the `"connected"` handshake
//! 2. `POST /query` and receive a correlation token
//! 3. read notifications until one equals the token
//! 4. `GET /result/{token}` and normalize the envelope
//!
//! Every step runs against a single deadline, so the time left for the
//! notification wait shrinks with whatever the earlier steps consumed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, instrument, trace};

use cpgq_core::{defaults, logging, Error, ProtocolError, QueryBackend, QueryResult, Result};

use crate::config::ClientConfig;
use crate::types::{ResultEnvelope, SubmitRequest, SubmitResponse};

/// Client for the backend's correlation protocol.
pub struct ProtocolClient {
    http: Client,
    config: ClientConfig,
    gate: Arc<Semaphore>,
}

impl ProtocolClient {
    /// Create a new client with its own exchange gate of
    /// `config.max_exchanges` slots.
    ///
    /// The gate only bounds exchanges made through this client. Clients that
    /// must share one process-wide limit should be built with
    /// [`ProtocolClient::with_gate`].
    pub fn new(config: ClientConfig) -> Result<Self> {
        let gate = Arc::new(Semaphore::new(config.max_exchanges));
        Self::with_gate(config, gate)
    }

    /// Create a client that admits exchanges through a shared gate.
    ///
    /// `config.max_exchanges` is ignored; the gate's permits are the limit.
    pub fn with_gate(config: ClientConfig, gate: Arc<Semaphore>) -> Result<Self> {
        config.validate()?;

        // Proxies are bypassed: the backend is almost always on a private address
        let http = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            "Initializing protocol client: url={}, channel={}, max_exchanges={}",
            config.base_url, config.ws_url, config.max_exchanges
        );

        Ok(Self {
            http,
            gate,
            config,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Exchanges that could start right now without waiting for the gate.
    pub fn available_exchanges(&self) -> usize {
        self.gate.available_permits()
    }

    /// The gate this client admits exchanges through.
    pub fn gate(&self) -> &Arc<Semaphore> {
        &self.gate
    }

    /// Run one query and wait for its result.
    ///
    /// `timeout` is capped by the configured per-exchange timeout. Dropping
    /// the returned future abandons the exchange and frees its gate slot.
    #[instrument(skip(self, query), fields(query = %logging::preview(query)))]
    pub async fn execute(&self, query: &str, timeout: Duration) -> Result<QueryResult> {
        let budget = timeout.min(self.config.timeout());
        let started = Instant::now();
        let deadline = started + budget;

        let _slot = within(deadline, budget, self.gate.acquire())
            .await?
            .map_err(|_| Error::Internal("exchange gate closed".to_string()))?;

        let outcome = self.exchange(query, deadline, budget).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => debug!(duration_ms, success = result.ok, "Exchange completed"),
            Err(e) => error!(duration_ms, error = %e, "Exchange failed"),
        }
        outcome
    }

    async fn exchange(&self, query: &str, deadline: Instant, budget: Duration) -> Result<QueryResult> {
        let (mut channel, _) = within(deadline, budget, connect_async(self.config.ws_url.as_str()))
            .await?
            .map_err(transport_error)?;

        within(deadline, budget, expect_handshake(&mut channel)).await??;

        let token = self.submit(query, deadline, budget).await?;
        debug!(token = %token, "Query accepted");

        wait_for_token(&mut channel, &token, deadline, budget).await?;

        let envelope = self.fetch(&token, deadline, budget).await?;

        // Closing is best effort; the result is already in hand
        if let Ok(Err(e)) = within(deadline, budget, channel.close(None)).await {
            trace!(error = %e, "Notification channel close failed");
        }

        Ok(envelope.into_result()?)
    }

    async fn submit(&self, query: &str, deadline: Instant, budget: Duration) -> Result<String> {
        let url = format!("{}{}", self.base_url(), defaults::QUERY_PATH);
        let request = self.authorize(self.http.post(&url).json(&SubmitRequest { query }));

        let response = within(deadline, budget, request.send()).await??;
        let response = check_status(defaults::QUERY_PATH, response, deadline, budget).await?;

        let body: SubmitResponse = within(deadline, budget, response.json())
            .await?
            .map_err(|e| ProtocolError::Envelope(format!("submit response: {}", e)))?;
        Ok(body.uuid)
    }

    async fn fetch(&self, token: &str, deadline: Instant, budget: Duration) -> Result<ResultEnvelope> {
        let endpoint = format!("{}/{}", defaults::RESULT_PATH, token);
        let url = format!("{}{}", self.base_url(), endpoint);
        let request = self.authorize(self.http.get(&url));

        let response = within(deadline, budget, request.send()).await??;
        let response = check_status(&endpoint, response, deadline, budget).await?;

        let envelope = within(deadline, budget, response.json::<ResultEnvelope>())
            .await?
            .map_err(|e| ProtocolError::Envelope(format!("result response: {}", e)))?;
        Ok(envelope)
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.username {
            Some(ref username) => request.basic_auth(username, self.config.password.as_ref()),
            None => request,
        }
    }
}

#[async_trait]
impl QueryBackend for ProtocolClient {
    async fn send(&self, query: &str, timeout: Duration) -> Result<QueryResult> {
        self.execute(query, timeout).await
    }
}

/// Run `fut` against the exchange deadline.
async fn within<F>(deadline: Instant, budget: Duration, fut: F) -> Result<F::Output>
where
    F: std::future::Future,
{
    timeout_at(deadline, fut)
        .await
        .map_err(|_| Error::Timeout(budget))
}

fn transport_error(e: WsError) -> Error {
    ProtocolError::Transport(e.to_string()).into()
}

async fn check_status(
    endpoint: &str,
    response: Response,
    deadline: Instant,
    budget: Duration,
) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProtocolError::Unauthorized.into());
    }
    if status != StatusCode::OK {
        let body = within(deadline, budget, response.text())
            .await?
            .unwrap_or_default();
        return Err(ProtocolError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(response)
}

/// Next data message on the channel, skipping control frames.
///
/// `Ok(None)` means the channel closed.
async fn next_text<S>(channel: &mut S) -> Result<Option<String>>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(message) = channel.next().await {
        match message.map_err(transport_error)? {
            Message::Text(text) => return Ok(Some(text)),
            Message::Binary(bytes) => return Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Message::Close(_) => return Ok(None),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
    Ok(None)
}

async fn expect_handshake<S>(channel: &mut S) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    match next_text(channel).await? {
        Some(text) if text == defaults::CONNECTED_MESSAGE => Ok(()),
        Some(received) => Err(ProtocolError::Handshake { received }.into()),
        None => Err(ProtocolError::ChannelClosed.into()),
    }
}

/// Read until `token` arrives or the deadline passes.
///
/// The channel may carry completions for other exchanges; those are dropped.
async fn wait_for_token<S>(
    channel: &mut S,
    token: &str,
    deadline: Instant,
    budget: Duration,
) -> Result<()>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        match within(deadline, budget, next_text(channel)).await?? {
            Some(text) if text.trim() == token => return Ok(()),
            Some(other) => {
                debug!(token = %token, discarded = %other, "Ignoring completion for another exchange");
            }
            None => return Err(ProtocolError::ChannelClosed.into()),
        }
    }
}
