//! Connectivity probe for the candidate API endpoints.

use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::core::session::Session;

/// Why an endpoint failed the probe
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),
    #[error("DNS resolution failed: {0}")]
    Resolve(#[from] std::io::Error),
    #[error("Host resolved to no addresses")]
    NoAddress,
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Endpoint answered 404")]
    NotFound,
}

/// Finds the first reachable endpoint of a session
#[derive(Debug, Clone)]
pub struct ConnectivityProber {
    client: Client,
    timeout: Duration,
}

impl ConnectivityProber {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Try each endpoint in order and select the first one that resolves and
    /// answers with anything other than 404.
    ///
    /// # Returns
    ///
    /// * `Some(endpoint)` - the endpoint now selected on `session`
    /// * `None` - no candidate was reachable
    pub async fn probe(&self, session: &Session) -> Option<String> {
        for endpoint in session.endpoints() {
            match self.check(endpoint).await {
                Ok(()) => {
                    session.select_endpoint(endpoint);
                    return Some(endpoint.clone());
                }
                Err(e) => warn!("Failed to connect to {}: {}", endpoint, e),
            }
        }
        None
    }

    async fn check(&self, endpoint: &str) -> Result<(), ProbeError> {
        let url = Url::parse(endpoint).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::InvalidUrl(endpoint.to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(443);

        let mut addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
        let addr = addrs.next().ok_or(ProbeError::NoAddress)?;
        debug!("Resolved {} to {}", host, addr);

        let response = self.client.get(url).timeout(self.timeout).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ProbeError::NotFound);
        }
        Ok(())
    }
}
