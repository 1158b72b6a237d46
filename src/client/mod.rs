//! SIFEN submission and polling client.
//!
//! The HTTP exchange lives behind the [`Transport`] trait so the pipeline
//! and the retry loop can be exercised without a network. The bundled
//! [`HttpTransport`] posts SOAP 1.2 over reqwest with a per-call timeout,
//! the way the receiving web services expect.

mod codes;
mod soap;

pub use codes::*;
pub use soap::{build_query_request, build_submit_request, parse_response};

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::batch::BatchEnvelope;
use crate::core::{EkuatiaError, Environment};

/// What came back from the backend for one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResult {
    /// HTTP status of the exchange.
    pub http_status: u16,
    /// Backend result code (`dCodRes`), verbatim.
    pub code: String,
    /// Backend result message (`dMsgRes`), verbatim.
    pub message: String,
    /// Batch tracking identifier (`dProtConsLote`) when processing is
    /// asynchronous.
    pub tracking_id: Option<String>,
}

impl SubmissionResult {
    /// Classify this result for the pipeline.
    pub fn disposition(&self) -> Disposition {
        codes::classify(&self.code, &self.message)
    }
}

/// Transport-level failure. The pipeline never auto-retries these; they are
/// surfaced as retryable at the caller's discretion.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Connection or protocol failure.
    Network(String),
    /// The per-call timeout elapsed.
    Timeout(Duration),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "transport network error: {e}"),
            Self::Timeout(d) => write!(f, "transport call timed out after {d:?}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Submission client failure.
#[derive(Debug)]
#[non_exhaustive]
pub enum SubmitError {
    /// The exchange itself failed.
    Transport(TransportError),
    /// The response body could not be understood.
    Protocol(EkuatiaError),
    /// The polling deadline elapsed while the backend still reported
    /// "in process".
    PollDeadline {
        /// How long the caller waited.
        waited: Duration,
        /// The last in-progress result observed.
        last: SubmissionResult,
    },
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "submission transport error: {e}"),
            Self::Protocol(e) => write!(f, "submission protocol error: {e}"),
            Self::PollDeadline { waited, last } => write!(
                f,
                "lote still in process after {waited:?} (last code {})",
                last.code
            ),
        }
    }
}

impl std::error::Error for SubmitError {}

impl From<TransportError> for SubmitError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<EkuatiaError> for SubmitError {
    fn from(e: EkuatiaError) -> Self {
        Self::Protocol(e)
    }
}

/// Request/response collaborator. One call, one exchange; connection
/// management and TLS are its concern, not the pipeline's.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// POST `body` to `endpoint`, returning HTTP status and response body.
    async fn exchange(
        &self,
        endpoint: &str,
        soap_action: &str,
        body: &[u8],
    ) -> Result<(u16, Vec<u8>), TransportError>;
}

/// reqwest-backed SOAP 1.2 transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with the given per-call timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

impl Transport for HttpTransport {
    async fn exchange(
        &self,
        endpoint: &str,
        soap_action: &str,
        body: &[u8],
    ) -> Result<(u16, Vec<u8>), TransportError> {
        let resp = self
            .client
            .post(endpoint)
            .header(
                "Content-Type",
                format!(r#"application/soap+xml; charset=utf-8; action="{soap_action}""#),
            )
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Network(e.to_string())
                }
            })?;

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }
}

/// Endpoints and environment for one client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target environment.
    pub environment: Environment,
    /// Lote reception endpoint (`siRecepLoteDE`).
    pub recv_endpoint: String,
    /// Lote result query endpoint (`siResultLoteDE`).
    pub query_endpoint: String,
}

impl ClientConfig {
    /// Official SIFEN endpoints for an environment.
    pub fn for_environment(environment: Environment) -> Self {
        let host = match environment {
            Environment::Test => "https://sifen-test.set.gov.py",
            Environment::Production => "https://sifen.set.gov.py",
        };
        Self {
            environment,
            recv_endpoint: format!("{host}/de/ws/async/recibe-lote.wsdl"),
            query_endpoint: format!("{host}/de/ws/consultas/consulta-lote.wsdl"),
        }
    }
}

/// Backoff and deadline bounds for [`SifenClient::poll_until_terminal`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Delay before the first status query.
    pub initial_backoff: Duration,
    /// Backoff ceiling; doubling stops here.
    pub max_backoff: Duration,
    /// Overall wall-clock bound for one polling sequence.
    pub deadline: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Submission/polling client over a pluggable [`Transport`].
#[derive(Debug)]
pub struct SifenClient<T> {
    transport: T,
    config: ClientConfig,
}

impl<T: Transport> SifenClient<T> {
    /// Build a client from a transport and configuration.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// The active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send one lote envelope. Returns either an immediate rejection or an
    /// acknowledgment carrying the tracking identifier for polling.
    pub async fn submit(&self, envelope: &BatchEnvelope) -> Result<SubmissionResult, SubmitError> {
        let body = build_submit_request(envelope)?;
        let (status, response) = self
            .transport
            .exchange(&self.config.recv_endpoint, "siRecepLoteDE", &body)
            .await?;
        Ok(parse_response(status, &response)?)
    }

    /// Query processing status for a tracking identifier once.
    pub async fn poll(&self, tracking_id: &str) -> Result<SubmissionResult, SubmitError> {
        let body = build_query_request(tracking_id)?;
        let (status, response) = self
            .transport
            .exchange(&self.config.query_endpoint, "siResultLoteDE", &body)
            .await?;
        Ok(parse_response(status, &response)?)
    }

    /// Poll with bounded exponential backoff until a terminal state.
    ///
    /// `StillProcessing` is never treated as failure; it only ever extends
    /// the wait, up to `options.deadline`, after which
    /// [`SubmitError::PollDeadline`] reports the last observed state.
    pub async fn poll_until_terminal(
        &self,
        tracking_id: &str,
        options: &PollOptions,
    ) -> Result<SubmissionResult, SubmitError> {
        let started = Instant::now();
        let mut backoff = options.initial_backoff;

        loop {
            if started.elapsed() + backoff > options.deadline {
                // One last look before giving up.
                let last = self.poll(tracking_id).await?;
                if last.disposition() != Disposition::StillProcessing {
                    return Ok(last);
                }
                return Err(SubmitError::PollDeadline {
                    waited: started.elapsed(),
                    last,
                });
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(options.max_backoff);

            let result = self.poll(tracking_id).await?;
            if result.disposition() != Disposition::StillProcessing {
                return Ok(result);
            }
        }
    }
}
