//! Core functionality for the DDoS report service.
//!
//! This module contains the upstream data-collection engine: the connectivity
//! probe, the page fetcher and its retry policy, the sequential and
//! concurrent collectors, the country post-filter, and the single-attempt
//! rules, stats and sites operations.

pub mod client;
pub mod collector;
pub mod concurrent;
pub mod fetcher;
pub mod filter;
pub mod prober;
pub mod retry;
pub mod rules;
pub mod sequential;
pub mod session;
pub mod sites;
pub mod sites_cache;
pub mod stats;

#[cfg(test)]
mod testing;

pub use client::{ImpervaClient, UpstreamError};
pub use collector::{
    collect_visits, CollectionError, CollectionRequest, CollectionResult, CollectorOptions, ErrorPayload,
};
pub use concurrent::ConcurrentCollector;
pub use fetcher::{PageRequest, PageResult, VisitsApi};
pub use filter::{filter_by_country, Visit};
pub use prober::ConnectivityProber;
pub use retry::RetryPolicy;
pub use rules::SecurityRules;
pub use sequential::SequentialCollector;
pub use session::{Credentials, Session};
pub use sites::Site;
pub use sites_cache::{CacheStatus, ImpervaSitesLoader, SitesCache, SitesLoader};
pub use stats::{StatsData, StatsQuery};
