//! Visit collection entry point.
//!
//! This module defines the request/result/error contract of a collection and
//! dispatches to the sequential or concurrent collector.

use std::sync::Arc;
use std::time::Duration;

use metrics::{histogram, increment_counter};
use serde::Serialize;
use thiserror::Error;

use crate::core::concurrent::ConcurrentCollector;
use crate::core::fetcher::{FatalKind, PageRequest, VisitsApi, DEFAULT_PAGE_SIZE};
use crate::core::filter::{active_filter, Visit};
use crate::core::retry::RetryPolicy;
use crate::core::sequential::SequentialCollector;
use crate::core::session::Session;
use crate::models::RequestConfig;

/// Errors that end a collection
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("Unable to establish connection to Imperva API. Please check your internet connection.")]
    Connectivity,
    #[error("API authentication failed ({message})")]
    Auth { message: String },
    #[error("API endpoint not found ({message})")]
    Endpoint { message: String },
    #[error("Failed to fetch data after multiple attempts. Last error: {last_error}")]
    MultipleRequestFailures {
        last_error: String,
        partial_data: Option<PartialData>,
    },
}

impl CollectionError {
    pub fn fatal(kind: FatalKind, message: String) -> Self {
        match kind {
            FatalKind::AuthError => CollectionError::Auth { message },
            FatalKind::EndpointError => CollectionError::Endpoint { message },
        }
    }

    /// Short error name shown to the dashboard
    pub fn kind(&self) -> &'static str {
        match self {
            CollectionError::Connectivity => "Connectivity Error",
            CollectionError::Auth { .. } => "Authentication Error",
            CollectionError::Endpoint { .. } => "API Endpoint Error",
            CollectionError::MultipleRequestFailures { .. } => "Multiple Request Failures",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            CollectionError::Connectivity => {
                "Try again in a few moments or check if the Imperva service is experiencing issues."
            }
            CollectionError::Auth { .. } => "Please check your API credentials in the .env file",
            CollectionError::Endpoint { .. } => {
                "The API endpoint may have changed or the site ID may be incorrect"
            }
            CollectionError::MultipleRequestFailures { .. } => {
                "The service may be temporarily unavailable. Please try again later."
            }
        }
    }

    /// Visits collected before the failure; only set for `MultipleRequestFailures`
    pub fn partial_data(&self) -> Option<&PartialData> {
        match self {
            CollectionError::MultipleRequestFailures { partial_data, .. } => partial_data.as_ref(),
            _ => None,
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, CollectionError::Connectivity)
    }
}

/// Visits gathered before a collection gave up
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialData {
    pub visits: Vec<Visit>,
    pub total_visits: usize,
    pub note: String,
}

impl PartialData {
    /// `None` when nothing was collected
    pub fn from_visits(visits: Vec<Visit>) -> Option<Self> {
        if visits.is_empty() {
            return None;
        }
        let total_visits = visits.len();
        Some(Self {
            visits,
            total_visits,
            note: format!("Partial data collected ({} visits before failure)", total_visits),
        })
    }
}

/// Structured error returned to the route layer
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    pub message: String,
    pub suggestion: String,
    pub partial_data: Option<PartialData>,
}

impl From<&CollectionError> for ErrorPayload {
    fn from(err: &CollectionError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            suggestion: err.suggestion().to_string(),
            partial_data: err.partial_data().cloned(),
        }
    }
}

/// Diagnostics attached to a successful collection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub pages_processed: u32,
    pub base_url_used: String,
    pub filter_applied: Option<String>,
    pub concurrent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
}

/// Aggregated visits for one report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionResult {
    pub visits: Vec<Visit>,
    pub total_pages: u32,
    pub total_visits: usize,
    pub success: bool,
    pub collection_info: CollectionInfo,
}

impl CollectionResult {
    pub(crate) fn new(visits: Vec<Visit>, total_pages: u32, collection_info: CollectionInfo) -> Self {
        Self {
            total_visits: visits.len(),
            visits,
            total_pages,
            success: true,
            collection_info,
        }
    }
}

/// Parameters of one collection call
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub site_id: String,
    /// Millisecond epoch timestamps
    pub start_time: i64,
    pub end_time: i64,
    pub country_filter: Option<String>,
    pub concurrent: bool,
    pub max_concurrent: usize,
}

impl CollectionRequest {
    pub(crate) fn first_page(&self, page_size: u32) -> PageRequest {
        PageRequest {
            site_id: self.site_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            page_index: 0,
            page_size,
        }
    }

    /// The country filter in force, if any
    pub fn filter_applied(&self) -> Option<String> {
        active_filter(self.country_filter.as_deref()).map(str::to_string)
    }
}

/// Tunables shared by both collectors
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub policy: RetryPolicy,
    pub page_size: u32,
    /// Pause between concurrent batches
    pub batch_pause: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_pause: Duration::from_millis(300),
        }
    }
}

impl From<&RequestConfig> for CollectorOptions {
    fn from(config: &RequestConfig) -> Self {
        Self {
            policy: RetryPolicy::from(config),
            page_size: config.page_size.max(1),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
        }
    }
}

/// Collect every visit for `request` with the strategy it asks for
pub async fn collect_visits<A>(
    api: Arc<A>,
    session: Arc<Session>,
    options: CollectorOptions,
    request: &CollectionRequest,
) -> Result<CollectionResult, CollectionError>
where
    A: VisitsApi + 'static,
{
    let strategy = if request.concurrent { "concurrent" } else { "sequential" };
    log::info!(
        "Starting {} collection for site {} ({} to {})",
        strategy,
        request.site_id,
        request.start_time,
        request.end_time
    );

    let result = if request.concurrent {
        ConcurrentCollector::new(api, session, options, request.max_concurrent)
            .collect(request)
            .await
    } else {
        SequentialCollector::new(api, session, options).collect(request).await
    };

    match &result {
        Ok(collected) => {
            increment_counter!("collections_total", "strategy" => strategy, "result" => "success");
            histogram!("collection_visits", collected.total_visits as f64);
        }
        Err(err) => {
            increment_counter!("collections_total", "strategy" => strategy, "result" => "error");
            log::error!("Collection for site {} failed: {}", request.site_id, err);
        }
    }
    result
}
