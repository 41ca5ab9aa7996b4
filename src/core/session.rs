//! Per-report upstream session.
//!
//! Holds the credentials and candidate endpoints for one report request.
//! Only the selected endpoint changes after construction.

use std::sync::RwLock;
use log::{info, warn};
use crate::models::ApiConfig;

/// API credential pair sent as request headers
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_id", &self.api_id)
            .finish()
    }
}

/// Upstream session for one logical report-generation request
#[derive(Debug)]
pub struct Session {
    credentials: Credentials,
    account_id: String,
    endpoints: Vec<String>,
    selected: RwLock<String>,
}

impl Session {
    /// Create a session; the first endpoint is selected until a probe says otherwise
    pub fn new(credentials: Credentials, account_id: impl Into<String>, endpoints: Vec<String>) -> Self {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim_end_matches('/').to_string())
            .collect();
        let selected = endpoints.first().cloned().unwrap_or_default();
        Self {
            credentials,
            account_id: account_id.into(),
            endpoints,
            selected: RwLock::new(selected),
        }
    }

    pub fn from_config(api: &ApiConfig) -> Self {
        Self::new(
            Credentials {
                api_key: api.key.clone(),
                api_id: api.id.clone(),
            },
            api.account_id.clone(),
            api.base_urls.clone(),
        )
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Candidate endpoints in probe order
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Endpoint used for data requests
    pub fn selected_endpoint(&self) -> String {
        match self.selected.read() {
            Ok(selected) => selected.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn select_endpoint(&self, endpoint: &str) {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!("Using base URL: {}", endpoint);
        match self.selected.write() {
            Ok(mut selected) => *selected = endpoint,
            Err(poisoned) => *poisoned.into_inner() = endpoint,
        }
    }

    /// Toggle between the first two endpoints.
    ///
    /// Returns the newly selected endpoint, or `None` when there is nothing to
    /// switch to.
    pub fn swap_endpoint(&self) -> Option<String> {
        if self.endpoints.len() < 2 {
            return None;
        }
        let mut selected = match self.selected.write() {
            Ok(selected) => selected,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = if *selected == self.endpoints[0] {
            self.endpoints[1].clone()
        } else {
            self.endpoints[0].clone()
        };
        warn!("Switching from {} to {}", *selected, next);
        *selected = next.clone();
        Some(next)
    }

    /// Absolute URL for `path` on the selected endpoint
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.selected_endpoint(), path)
    }
}

#[cfg(test)]
pub(crate) fn test_session(endpoints: &[&str]) -> Session {
    Session::new(
        Credentials {
            api_key: "test-key".to_string(),
            api_id: "test-id".to_string(),
        },
        "1234",
        endpoints.iter().map(|e| e.to_string()).collect(),
    )
}
