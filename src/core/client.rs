//! Imperva API client for the DDoS report service.
//!
//! This module owns the HTTP side of every upstream call: authentication
//! headers, timeouts, and the classification of responses into success,
//! retryable and fatal outcomes.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use metrics::increment_counter;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::core::fetcher::{parse_visits, FatalKind, PageRequest, PageResult, RetryReason, VisitsApi};
use crate::core::prober::ConnectivityProber;
use crate::core::session::Session;
use crate::models::Config;
use crate::utils::truncate_chars;

/// Visits endpoint path
pub const VISITS_PATH: &str = "/api/visits/v1";
/// Characters of an error body kept for diagnostics
const ERROR_BODY_CHARS: usize = 200;

/// Errors from single-attempt upstream operations
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Unable to establish connection to Imperva API")]
    Connectivity,
    #[error("{message}")]
    Fatal { kind: FatalKind, message: String },
    #[error("{0}")]
    Retryable(RetryReason),
}

impl UpstreamError {
    /// Short error name shown to the dashboard
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connectivity => "Connectivity Error",
            UpstreamError::Fatal {
                kind: FatalKind::AuthError,
                ..
            } => "Authentication Error",
            UpstreamError::Fatal {
                kind: FatalKind::EndpointError,
                ..
            } => "API Endpoint Error",
            UpstreamError::Retryable(RetryReason::Timeout(_)) => "Timeout Error",
            UpstreamError::Retryable(RetryReason::Connection(_)) => "Connection Error",
            UpstreamError::Retryable(_) => "API Error",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            UpstreamError::Connectivity => {
                "Try again in a few moments or check if the Imperva service is experiencing issues."
            }
            UpstreamError::Fatal {
                kind: FatalKind::AuthError,
                ..
            } => "Please check your API credentials and permissions",
            UpstreamError::Fatal {
                kind: FatalKind::EndpointError,
                ..
            } => "The API endpoint may have changed or the requested resource may not exist",
            UpstreamError::Retryable(_) => "The API may be temporarily unavailable",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, UpstreamError::Fatal { .. })
    }
}

/// Map an HTTP status to its outcome; `Ok(())` only for 200
pub fn classify_status(status: u16, body: &str) -> Result<(), UpstreamError> {
    match status {
        200 => Ok(()),
        429 => Err(UpstreamError::Retryable(RetryReason::RateLimited)),
        401 | 403 => Err(UpstreamError::Fatal {
            kind: FatalKind::AuthError,
            message: format!("HTTP {}", status),
        }),
        404 => Err(UpstreamError::Fatal {
            kind: FatalKind::EndpointError,
            message: format!("HTTP {}", status),
        }),
        _ => Err(UpstreamError::Retryable(RetryReason::Http {
            status,
            body: truncate_chars(body, ERROR_BODY_CHARS),
        })),
    }
}

/// Map a transport error to a retry reason
pub fn classify_transport_error(err: &reqwest::Error) -> RetryReason {
    if err.is_timeout() {
        RetryReason::Timeout(err.to_string())
    } else if err.is_connect() {
        RetryReason::Connection(err.to_string())
    } else if err.is_request() || err.is_body() {
        RetryReason::Request(err.to_string())
    } else {
        RetryReason::Unexpected(err.to_string())
    }
}

impl From<UpstreamError> for PageResult {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Fatal { kind, message } => PageResult::fatal(kind, message),
            UpstreamError::Retryable(reason) => PageResult::retryable(reason),
            UpstreamError::Connectivity => {
                PageResult::retryable(RetryReason::Connection("no reachable endpoint".to_string()))
            }
        }
    }
}

/// Build the shared HTTP client
pub fn build_http_client(config: &Config) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.api.user_agent.clone())
        .connect_timeout(Duration::from_secs(config.request.connect_timeout_secs))
        .build()
}

/// Imperva API client
#[derive(Debug, Clone)]
pub struct ImpervaClient {
    /// HTTP client
    client: Client,
    /// Endpoint prober sharing the HTTP client
    prober: ConnectivityProber,
    /// Read timeout for data requests
    read_timeout: Duration,
}

impl ImpervaClient {
    /// Create a new client instance
    pub fn new(client: Client, probe_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            prober: ConnectivityProber::new(client.clone(), probe_timeout),
            client,
            read_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self::new(
            build_http_client(config)?,
            Duration::from_secs(config.request.probe_timeout_secs),
            Duration::from_secs(config.request.read_timeout_secs),
        ))
    }

    /// Probe the session's endpoints, failing when none is reachable
    pub async fn ensure_connected(&self, session: &Session) -> Result<String, UpstreamError> {
        self.prober
            .probe(session)
            .await
            .ok_or(UpstreamError::Connectivity)
    }

    /// POST to `path` on the selected endpoint and return the JSON body of a 200 response
    ///
    /// # Arguments
    ///
    /// * `session` - Session supplying the endpoint and credentials
    /// * `path` - API path, e.g. `/api/visits/v1`
    /// * `query` - Query string parameters
    ///
    /// # Returns
    ///
    /// * `Ok(Value)` for HTTP 200 with a JSON body
    /// * `Err(UpstreamError)` classified as fatal or retryable
    pub async fn post_json(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, UpstreamError> {
        let credentials = session.credentials();
        let response = self
            .client
            .post(session.url(path))
            .header("accept", "application/json")
            .header("x-API-Key", credentials.api_key.as_str())
            .header("x-API-Id", credentials.api_id.as_str())
            .query(query)
            .body("")
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::Retryable(classify_transport_error(&e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Retryable(classify_transport_error(&e)))?;
        classify_status(status, &body)?;

        serde_json::from_str(&body).map_err(|e| {
            UpstreamError::Retryable(RetryReason::Unexpected(format!("Invalid JSON response: {}", e)))
        })
    }
}

#[async_trait]
impl VisitsApi for ImpervaClient {
    async fn probe(&self, session: &Session) -> Option<String> {
        self.prober.probe(session).await
    }

    async fn fetch_page(&self, session: &Session, request: &PageRequest) -> PageResult {
        let result = match self.post_json(session, VISITS_PATH, &request.query()).await {
            Ok(body) => PageResult::success(parse_visits(&body)),
            Err(err) => PageResult::from(err),
        };

        let outcome = match &result {
            PageResult::Success { records } => {
                debug!("Page {}: {} visits", request.page_index, records.len());
                "success"
            }
            PageResult::RetryableFailure { reason } => {
                debug!("Page {}: retryable failure: {}", request.page_index, reason);
                "retryable"
            }
            PageResult::FatalFailure { message, .. } => {
                debug!("Page {}: fatal failure: {}", request.page_index, message);
                "fatal"
            }
        };
        increment_counter!("upstream_requests_total", "outcome" => outcome);
        result
    }
}
