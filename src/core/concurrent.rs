//! Concurrent visit collector with dynamic page discovery.
//!
//! After a single probing page shows there is more than one page of data,
//! pages are fetched in fixed-size batches of parallel workers until two
//! batches in a row come back entirely empty. Visits are accumulated in the
//! order pages complete, not in page order.
//!
//! Endpoint fallback is left to the sequential collector: workers never
//! change the session's selected endpoint.

use std::sync::Arc;

use log::{debug, info, warn};
use metrics::increment_counter;
use tokio::task::JoinSet;

use crate::core::collector::{
    CollectionError, CollectionInfo, CollectionRequest, CollectionResult, CollectorOptions,
};
use crate::core::fetcher::{PageRequest, PageResult, VisitsApi};
use crate::core::filter::{filter_by_country, Visit};
use crate::core::sequential::SequentialCollector;
use crate::core::session::Session;

/// Upper bound on pages fetched in parallel per batch
pub const MAX_BATCH_SIZE: usize = 10;
/// Discovery stops after this many pages regardless of content
pub const MAX_DISCOVERY_PAGES: u32 = 200;
/// Consecutive fully-empty batches that end discovery
const EMPTY_BATCHES_TO_STOP: u32 = 2;

/// Reasons the concurrent path stops early
#[derive(Debug)]
enum ConcurrentError {
    /// Reported to the caller as-is
    Collection(CollectionError),
    /// Abandon and rerun the request sequentially
    Fallback(String),
}

/// Visits and emptiness tally for one batch
#[derive(Debug, Default)]
struct BatchOutcome {
    visits: Vec<Visit>,
    empty_pages: usize,
    pages: usize,
}

/// Visits from the discovery phase
#[derive(Debug)]
struct Discovery {
    visits: Vec<Visit>,
    pages_processed: u32,
}

/// Collector that fetches batches of pages in parallel
pub struct ConcurrentCollector<A> {
    api: Arc<A>,
    session: Arc<Session>,
    options: CollectorOptions,
    max_concurrent: usize,
}

impl<A: VisitsApi + 'static> ConcurrentCollector<A> {
    pub fn new(api: Arc<A>, session: Arc<Session>, options: CollectorOptions, max_concurrent: usize) -> Self {
        Self {
            api,
            session,
            options,
            max_concurrent,
        }
    }

    /// Pages per batch, between 1 and [`MAX_BATCH_SIZE`]
    pub fn batch_size(&self) -> usize {
        self.max_concurrent.clamp(1, MAX_BATCH_SIZE)
    }

    /// Collect all visits for `request`, falling back to the sequential
    /// collector if discovery hits anything it cannot classify as an empty page.
    pub async fn collect(&self, request: &CollectionRequest) -> Result<CollectionResult, CollectionError> {
        match self.collect_concurrently(request).await {
            Ok(result) => Ok(result),
            Err(ConcurrentError::Collection(err)) => Err(err),
            Err(ConcurrentError::Fallback(reason)) => {
                warn!("Concurrent fetch failed, falling back to sequential: {}", reason);
                increment_counter!("concurrent_fallbacks_total");
                SequentialCollector::new(
                    Arc::clone(&self.api),
                    Arc::clone(&self.session),
                    self.options.clone(),
                )
                .collect(request)
                .await
            }
        }
    }

    async fn collect_concurrently(&self, request: &CollectionRequest) -> Result<CollectionResult, ConcurrentError> {
        if self.api.probe(&self.session).await.is_none() {
            return Err(ConcurrentError::Collection(CollectionError::Connectivity));
        }

        let first_page = request.first_page(self.options.page_size);
        let initial = match self.api.fetch_page(&self.session, &first_page).await {
            PageResult::Success { records } => records,
            PageResult::FatalFailure { kind, message } => {
                return Err(ConcurrentError::Collection(CollectionError::fatal(kind, message)));
            }
            PageResult::RetryableFailure { reason } => {
                return Err(ConcurrentError::Fallback(format!("first page failed: {}", reason)));
            }
        };

        if initial.is_empty() {
            info!("No data found on first page");
            return Ok(self.finish(request, Vec::new(), 0, false));
        }
        if initial.len() < self.options.page_size as usize {
            info!("Only 1 page found with {} visits", initial.len());
            return Ok(self.finish(request, initial, 1, false));
        }

        info!("First page has {} visits, discovering more pages...", initial.len());
        let discovery = self.discover(&first_page).await?;
        info!(
            "Dynamic discovery complete: {} visits from {} pages",
            discovery.visits.len(),
            discovery.pages_processed
        );
        Ok(self.finish(request, discovery.visits, discovery.pages_processed, true))
    }

    /// Fetch batches from page 0 until two consecutive batches are empty or the page ceiling is hit
    async fn discover(&self, first_page: &PageRequest) -> Result<Discovery, ConcurrentError> {
        let batch_size = self.batch_size();
        let mut visits = Vec::new();
        let mut current_page = 0u32;
        let mut pages_processed = 0u32;
        let mut consecutive_empty_batches = 0u32;

        debug!("Starting dynamic page discovery with batch_size={}", batch_size);

        while consecutive_empty_batches < EMPTY_BATCHES_TO_STOP {
            let batch = self.fetch_batch(first_page, current_page, batch_size).await?;
            debug!(
                "Batch pages [{}-{}]: {} visits, {} empty pages",
                current_page,
                current_page + batch_size as u32 - 1,
                batch.visits.len(),
                batch.empty_pages
            );

            visits.extend(batch.visits);
            pages_processed += batch.pages as u32;

            if batch.empty_pages >= batch.pages {
                consecutive_empty_batches += 1;
                debug!("All pages empty in batch (consecutive empty batches: {})", consecutive_empty_batches);
            } else {
                consecutive_empty_batches = 0;
            }

            current_page += batch_size as u32;

            if pages_processed >= MAX_DISCOVERY_PAGES {
                warn!("Reached safety limit of {} pages", MAX_DISCOVERY_PAGES);
                break;
            }
            if consecutive_empty_batches < EMPTY_BATCHES_TO_STOP && !self.options.batch_pause.is_zero() {
                tokio::time::sleep(self.options.batch_pause).await;
            }
        }

        Ok(Discovery {
            visits,
            pages_processed,
        })
    }

    /// Fetch `batch_size` pages starting at `start_page` in parallel.
    ///
    /// The batch resolves only once every worker has finished. Failed and
    /// crashed workers count as empty pages; a fatal response is held until
    /// the batch completes and then triggers the sequential fallback.
    async fn fetch_batch(
        &self,
        first_page: &PageRequest,
        start_page: u32,
        batch_size: usize,
    ) -> Result<BatchOutcome, ConcurrentError> {
        let mut workers = JoinSet::new();
        for page_index in start_page..start_page + batch_size as u32 {
            let api = Arc::clone(&self.api);
            let session = Arc::clone(&self.session);
            let request = first_page.for_page(page_index);
            workers.spawn(async move {
                let result = api.fetch_page(&session, &request).await;
                (request.page_index, result)
            });
        }

        let mut outcome = BatchOutcome {
            pages: batch_size,
            ..BatchOutcome::default()
        };
        let mut escaped: Option<String> = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((page_index, PageResult::Success { records })) => {
                    if records.is_empty() {
                        debug!("Page {}: empty page", page_index);
                        outcome.empty_pages += 1;
                    } else {
                        debug!("Page {}: collected {} visits", page_index, records.len());
                        outcome.visits.extend(records);
                    }
                }
                Ok((page_index, PageResult::RetryableFailure { reason })) => {
                    debug!("Page {}: failed - {}", page_index, reason);
                    outcome.empty_pages += 1;
                }
                Ok((page_index, PageResult::FatalFailure { kind, message })) => {
                    warn!("Page {}: fatal {:?} - {}", page_index, kind, message);
                    outcome.empty_pages += 1;
                    escaped.get_or_insert_with(|| format!("page {}: {}", page_index, message));
                }
                Err(join_error) => {
                    warn!("Page worker exception: {}", join_error);
                    outcome.empty_pages += 1;
                }
            }
        }

        match escaped {
            Some(reason) => Err(ConcurrentError::Fallback(reason)),
            None => Ok(outcome),
        }
    }

    fn finish(&self, request: &CollectionRequest, visits: Vec<Visit>, pages: u32, concurrent: bool) -> CollectionResult {
        let filter_applied = request.filter_applied();
        let visits = filter_by_country(visits, filter_applied.as_deref());
        CollectionResult::new(
            visits,
            pages,
            CollectionInfo {
                pages_processed: pages,
                base_url_used: self.session.selected_endpoint(),
                filter_applied,
                concurrent,
                max_concurrent: concurrent.then_some(self.max_concurrent),
            },
        )
    }
}
