//! Page-level types shared by the collectors.
//!
//! [`VisitsApi`] is the seam between the collectors and the wire: the HTTP
//! implementation lives in [`crate::core::client`], tests substitute
//! scripted upstreams.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::core::filter::Visit;
use crate::core::session::Session;

/// Records requested per page by default
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One page of visits to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub site_id: String,
    /// Millisecond epoch timestamps
    pub start_time: i64,
    pub end_time: i64,
    /// Zero-based page index
    pub page_index: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Same window, different page
    pub fn for_page(&self, page_index: u32) -> Self {
        Self {
            page_index,
            ..self.clone()
        }
    }

    /// Query parameters for the visits endpoint
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("site_id", self.site_id.clone()),
            ("time_range", "custom".to_string()),
            ("start", self.start_time.to_string()),
            ("end", self.end_time.to_string()),
            ("page_size", self.page_size.to_string()),
            ("page_num", self.page_index.to_string()),
        ]
    }
}

/// Failures that abort a whole collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FatalKind {
    /// HTTP 401/403
    AuthError,
    /// HTTP 404
    EndpointError,
}

/// Why a page attempt can be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    /// Non-2xx status other than the fatal ones, with the first 200 characters of the body
    Http { status: u16, body: String },
    Timeout(String),
    Connection(String),
    Request(String),
    Unexpected(String),
}

impl RetryReason {
    /// Connection-level failures trigger an endpoint swap on a page's first attempt
    pub fn is_connection(&self) -> bool {
        matches!(self, RetryReason::Connection(_))
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RateLimited => write!(f, "Rate limited (HTTP 429)"),
            RetryReason::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            RetryReason::Timeout(msg) => write!(f, "Timeout error: {}", msg),
            RetryReason::Connection(msg) => write!(f, "Connection error: {}", msg),
            RetryReason::Request(msg) => write!(f, "Request error: {}", msg),
            RetryReason::Unexpected(msg) => write!(f, "Unexpected error: {}", msg),
        }
    }
}

/// Outcome of one page fetch
#[derive(Debug, Clone, PartialEq)]
pub enum PageResult {
    Success { records: Vec<Visit> },
    RetryableFailure { reason: RetryReason },
    FatalFailure { kind: FatalKind, message: String },
}

impl PageResult {
    pub fn success(records: Vec<Visit>) -> Self {
        PageResult::Success { records }
    }

    pub fn retryable(reason: RetryReason) -> Self {
        PageResult::RetryableFailure { reason }
    }

    pub fn fatal(kind: FatalKind, message: impl Into<String>) -> Self {
        PageResult::FatalFailure {
            kind,
            message: message.into(),
        }
    }
}

/// Upstream operations the collectors depend on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisitsApi: Send + Sync {
    /// Select the first reachable endpoint for `session`, returning it
    async fn probe(&self, session: &Session) -> Option<String>;

    /// Fetch one page of visits on the session's selected endpoint
    async fn fetch_page(&self, session: &Session, request: &PageRequest) -> PageResult;
}

/// Extract the `visits` list from a response body; a missing list is empty
pub fn parse_visits(body: &Value) -> Vec<Visit> {
    body.get("visits")
        .and_then(Value::as_array)
        .map(|visits| visits.iter().cloned().map(Visit::new).collect())
        .unwrap_or_default()
}
