//! Sequential visit collector.
//!
//! Pages are fetched one at a time in ascending order until an empty page
//! comes back. Each page gets a bounded number of attempts with exponential
//! backoff; a page that exhausts them is skipped, and too many skipped pages
//! in a row abort the collection with whatever was gathered so far.

use std::sync::Arc;

use log::{debug, info, warn};
use metrics::increment_counter;

use crate::core::collector::{
    CollectionError, CollectionInfo, CollectionRequest, CollectionResult, CollectorOptions,
    PartialData,
};
use crate::core::fetcher::{FatalKind, PageRequest, PageResult, RetryReason, VisitsApi};
use crate::core::filter::{filter_by_country, Visit};
use crate::core::retry::Decision;
use crate::core::session::Session;

/// Final state of one page after all its attempts
#[derive(Debug)]
enum PageOutcome {
    Fetched(Vec<Visit>),
    Failed(RetryReason),
    Fatal { kind: FatalKind, message: String },
}

/// Collector that walks pages in order with retries
pub struct SequentialCollector<A> {
    api: Arc<A>,
    session: Arc<Session>,
    options: CollectorOptions,
}

impl<A: VisitsApi> SequentialCollector<A> {
    pub fn new(api: Arc<A>, session: Arc<Session>, options: CollectorOptions) -> Self {
        Self { api, session, options }
    }

    /// Collect all visits for `request`
    ///
    /// # Returns
    ///
    /// * `Ok(CollectionResult)` once an empty page is reached
    /// * `Err(CollectionError::Connectivity)` if no endpoint is reachable
    /// * `Err(CollectionError::Auth | Endpoint)` on the first fatal response
    /// * `Err(CollectionError::MultipleRequestFailures)` when the consecutive
    ///   failure ceiling is hit, with any visits collected so far
    pub async fn collect(&self, request: &CollectionRequest) -> Result<CollectionResult, CollectionError> {
        if self.api.probe(&self.session).await.is_none() {
            return Err(CollectionError::Connectivity);
        }

        let first_page = request.first_page(self.options.page_size);
        let policy = &self.options.policy;
        let mut visits: Vec<Visit> = Vec::new();
        let mut page_index = 0u32;
        let mut pages_attempted = 0u32;
        let mut consecutive_failures = 0u32;

        loop {
            pages_attempted += 1;
            match self.fetch_with_retries(&first_page.for_page(page_index)).await {
                PageOutcome::Fetched(records) => {
                    consecutive_failures = 0;
                    if records.is_empty() {
                        info!("No more visits found. Collected {} total visits.", visits.len());
                        break;
                    }
                    visits.extend(records);
                    debug!("Page {}: total collected {}", page_index, visits.len());
                }
                PageOutcome::Failed(reason) => {
                    consecutive_failures += 1;
                    warn!(
                        "Page {} failed after {} attempts. Consecutive failures: {}",
                        page_index, policy.max_retries, consecutive_failures
                    );
                    if policy.ceiling_reached(consecutive_failures) {
                        return Err(CollectionError::MultipleRequestFailures {
                            last_error: reason.to_string(),
                            partial_data: PartialData::from_visits(visits),
                        });
                    }
                }
                PageOutcome::Fatal { kind, message } => {
                    return Err(CollectionError::fatal(kind, message));
                }
            }
            page_index += 1;
        }

        let filter_applied = request.filter_applied();
        let visits = filter_by_country(visits, filter_applied.as_deref());

        Ok(CollectionResult::new(
            visits,
            pages_attempted,
            CollectionInfo {
                pages_processed: pages_attempted,
                base_url_used: self.session.selected_endpoint(),
                filter_applied,
                concurrent: false,
                max_concurrent: None,
            },
        ))
    }

    async fn fetch_with_retries(&self, request: &PageRequest) -> PageOutcome {
        let mut attempt = 0u32;
        loop {
            debug!("Fetching page {}, attempt {}", request.page_index, attempt + 1);
            let result = self.api.fetch_page(&self.session, request).await;

            if attempt == 0 {
                if let PageResult::RetryableFailure { reason } = &result {
                    if reason.is_connection() && self.session.swap_endpoint().is_some() {
                        increment_counter!("endpoint_swaps_total");
                    }
                }
            }

            match self.options.policy.decide(attempt, result) {
                Decision::Accept(records) => {
                    debug!("Page {}: collected {} visits", request.page_index, records.len());
                    return PageOutcome::Fetched(records);
                }
                Decision::Abort { kind, message } => return PageOutcome::Fatal { kind, message },
                Decision::GiveUp(reason) => return PageOutcome::Failed(reason),
                Decision::Retry { delay, reason } => {
                    increment_counter!("page_retries_total");
                    debug!(
                        "Page {} attempt {} failed ({}), waiting {:.2} seconds before retry",
                        request.page_index,
                        attempt + 1,
                        reason,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fetcher::MockVisitsApi;
    use crate::core::retry::RetryPolicy;
    use crate::core::session::test_session;
    use crate::core::testing::{page_of, ScriptedApi};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn options() -> CollectorOptions {
        CollectorOptions {
            policy: RetryPolicy {
                max_retries: 3,
                max_consecutive_failures: 3,
                backoff_base: Duration::ZERO,
            },
            page_size: 100,
            batch_pause: Duration::ZERO,
        }
    }

    fn request(country_filter: Option<&str>) -> CollectionRequest {
        CollectionRequest {
            site_id: "S1".to_string(),
            start_time: 1_700_000_000_000,
            end_time: 1_700_086_400_000,
            country_filter: country_filter.map(str::to_string),
            concurrent: false,
            max_concurrent: 5,
        }
    }

    fn collector<A: VisitsApi>(api: A) -> (Arc<A>, SequentialCollector<A>) {
        let api = Arc::new(api);
        let session = Arc::new(test_session(&["https://a.example", "https://b.example"]));
        (api.clone(), SequentialCollector::new(api, session, options()))
    }

    fn server_error() -> PageResult {
        PageResult::retryable(RetryReason::Http {
            status: 500,
            body: "boom".to_string(),
        })
    }

    #[tokio::test]
    async fn test_three_pages_until_empty() {
        let (api, collector) = collector(ScriptedApi::with_pages(&[100, 100, 0]));

        let result = assert_ok!(collector.collect(&request(None)).await);

        assert_eq!(result.total_visits, 200);
        assert_eq!(result.total_pages, 3);
        assert!(result.success);
        assert!(!result.collection_info.concurrent);
        assert_eq!(api.requested_pages(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_result_is_concatenation_in_page_order() {
        let (_, collector) = collector(ScriptedApi::with_pages(&[3, 2, 4, 0]));

        let result = assert_ok!(collector.collect(&request(None)).await);

        let mut expected = page_of(0, 3);
        expected.extend(page_of(1, 2));
        expected.extend(page_of(2, 4));
        assert_eq!(result.visits, expected);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_connectivity_error() {
        let (api, collector) = collector(ScriptedApi::new().unreachable());

        let err = assert_err!(collector.collect(&request(None)).await);

        assert!(err.is_connectivity());
        assert!(api.requested_pages().is_empty());
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_without_partial_data() {
        let api = ScriptedApi::with_pages(&[100, 100, 0])
            .page(1, vec![PageResult::fatal(FatalKind::AuthError, "HTTP 401")]);
        let (api, collector) = collector(api);

        let err = assert_err!(collector.collect(&request(None)).await);

        assert!(matches!(err, CollectionError::Auth { .. }));
        assert!(err.partial_data().is_none());
        assert_eq!(api.requested_pages(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_not_found_on_first_page_is_not_retried() {
        let mut api = MockVisitsApi::new();
        api.expect_probe()
            .times(1)
            .returning(|_| Some("https://a.example".to_string()));
        api.expect_fetch_page()
            .times(1)
            .returning(|_, _| PageResult::fatal(FatalKind::EndpointError, "HTTP 404"));
        let (_, collector) = collector(api);

        let err = assert_err!(collector.collect(&request(None)).await);

        assert!(matches!(err, CollectionError::Endpoint { .. }));
    }

    #[tokio::test]
    async fn test_every_attempt_unauthorized() {
        let mut api = MockVisitsApi::new();
        api.expect_probe().returning(|_| Some("https://a.example".to_string()));
        api.expect_fetch_page()
            .withf(|_, request| request.page_index == 0)
            .times(1)
            .returning(|_, _| PageResult::fatal(FatalKind::AuthError, "HTTP 401"));
        let (_, collector) = collector(api);

        let err = assert_err!(collector.collect(&request(None)).await);

        assert_eq!(err.kind(), "Authentication Error");
        assert!(err.partial_data().is_none());
    }

    #[tokio::test]
    async fn test_failure_ceiling_returns_partial_data() {
        let api = ScriptedApi::with_pages(&[100, 50])
            .page(2, vec![server_error()])
            .page(3, vec![server_error()])
            .page(4, vec![server_error()]);
        let (api, collector) = collector(api);

        let err = assert_err!(collector.collect(&request(None)).await);

        match err {
            CollectionError::MultipleRequestFailures {
                last_error,
                partial_data,
            } => {
                assert_eq!(last_error, "HTTP 500: boom");
                let partial = partial_data.expect("visits from pages 0 and 1");
                let mut expected = page_of(0, 100);
                expected.extend(page_of(1, 50));
                assert_eq!(partial.visits, expected);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // three attempts for each failing page, one for each good one
        assert_eq!(api.requested_pages().len(), 2 + 3 * 3);
    }

    #[tokio::test]
    async fn test_failure_ceiling_without_visits_has_no_partial_data() {
        let api = ScriptedApi::new()
            .page(0, vec![server_error()])
            .page(1, vec![server_error()])
            .page(2, vec![server_error()]);
        let (_, collector) = collector(api);

        let err = assert_err!(collector.collect(&request(None)).await);

        assert!(matches!(err, CollectionError::MultipleRequestFailures { .. }));
        assert!(err.partial_data().is_none());
    }

    #[tokio::test]
    async fn test_failed_page_is_skipped_and_counter_resets() {
        let api = ScriptedApi::with_pages(&[10, 0, 10, 0, 10, 0])
            .page(1, vec![server_error()])
            .page(3, vec![server_error()])
            .page(5, vec![server_error()]);
        let (_, collector) = collector(api);

        let result = assert_ok!(collector.collect(&request(None)).await);

        // pages 1, 3 and 5 fail but never consecutively; page 6 is empty
        let mut expected = page_of(0, 10);
        expected.extend(page_of(2, 10));
        expected.extend(page_of(4, 10));
        assert_eq!(result.visits, expected);
        assert_eq!(result.total_pages, 7);
    }

    #[tokio::test]
    async fn test_retry_recovers_within_page() {
        let api = ScriptedApi::with_pages(&[5, 0]).page(
            0,
            vec![
                PageResult::retryable(RetryReason::RateLimited),
                PageResult::retryable(RetryReason::Timeout("read".to_string())),
                PageResult::success(page_of(0, 5)),
            ],
        );
        let (api, collector) = collector(api);

        let result = assert_ok!(collector.collect(&request(None)).await);

        assert_eq!(result.total_visits, 5);
        assert_eq!(api.requested_pages(), vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn test_connection_error_on_first_attempt_swaps_endpoint_once() {
        let connection = || PageResult::retryable(RetryReason::Connection("refused".to_string()));
        let api = ScriptedApi::with_pages(&[5, 0])
            .page(0, vec![connection(), connection(), PageResult::success(page_of(0, 5))]);
        let (api, collector) = collector(api);

        let result = assert_ok!(collector.collect(&request(None)).await);

        assert_eq!(
            api.endpoints_used(),
            vec![
                "https://a.example",
                "https://b.example",
                "https://b.example",
                "https://b.example"
            ]
        );
        assert_eq!(result.collection_info.base_url_used, "https://b.example");
    }

    #[tokio::test]
    async fn test_country_filter_applied_after_collection() {
        let (_, collector) = collector(ScriptedApi::with_pages(&[4, 0]));

        let result = assert_ok!(collector.collect(&request(Some("us"))).await);

        // even-numbered visits carry ["US", "CA"]
        assert_eq!(result.total_visits, 2);
        assert_eq!(result.collection_info.filter_applied.as_deref(), Some("us"));
    }
}
