//! In-memory cache of the account's sites.
//!
//! The cache moves between `Loading`, `Ready` and `Error` as background
//! refreshes run. Previously loaded sites stay visible while a refresh is in
//! flight.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::core::client::ImpervaClient;
use crate::core::session::Session;
use crate::core::sites::Site;
use crate::models::ApiConfig;

/// Cache lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Loading,
    Ready,
    Error,
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Serialize)]
pub struct SitesSnapshot {
    pub status: CacheStatus,
    pub sites: Vec<Site>,
    pub total_sites: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Default for SitesSnapshot {
    fn default() -> Self {
        Self {
            status: CacheStatus::Loading,
            sites: Vec::new(),
            total_sites: 0,
            last_updated: None,
            error_message: None,
        }
    }
}

/// Source of the full site list
#[async_trait]
pub trait SitesLoader: Send + Sync {
    async fn load_sites(&self) -> Result<Vec<Site>>;
}

/// Loads sites from the Imperva API with a fresh session per load
pub struct ImpervaSitesLoader {
    client: ImpervaClient,
    api: ApiConfig,
}

impl ImpervaSitesLoader {
    pub fn new(client: ImpervaClient, api: ApiConfig) -> Self {
        Self { client, api }
    }
}

#[async_trait]
impl SitesLoader for ImpervaSitesLoader {
    async fn load_sites(&self) -> Result<Vec<Site>> {
        let session = Session::from_config(&self.api);
        self.client
            .get_all_sites(&session)
            .await
            .map_err(|err| anyhow!("{}: {}", err.kind(), err))
    }
}

/// Sites cache with an injectable loader
pub struct SitesCache {
    state: RwLock<SitesSnapshot>,
    loader: Arc<dyn SitesLoader>,
}

impl SitesCache {
    pub fn new(loader: Arc<dyn SitesLoader>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(SitesSnapshot::default()),
            loader,
        })
    }

    pub async fn snapshot(&self) -> SitesSnapshot {
        self.state.read().await.clone()
    }

    /// Mark the cache as loading and reload it in the background
    pub async fn refresh(self: &Arc<Self>) -> JoinHandle<()> {
        info!("Refreshing sites cache...");
        self.mark_loading().await;
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            cache.load().await;
        })
    }

    /// Reload in place
    pub async fn reload(&self) {
        self.mark_loading().await;
        self.load().await;
    }

    async fn mark_loading(&self) {
        let mut state = self.state.write().await;
        state.status = CacheStatus::Loading;
        state.error_message = None;
    }

    async fn load(&self) {
        let outcome = self.loader.load_sites().await;

        let mut state = self.state.write().await;
        match outcome {
            Ok(sites) => {
                info!("Loaded {} sites into cache", sites.len());
                state.total_sites = sites.len();
                state.sites = sites;
                state.status = CacheStatus::Ready;
                state.last_updated = Some(Utc::now());
                state.error_message = None;
            }
            Err(err) => {
                error!("Failed to load sites: {:#}", err);
                state.status = CacheStatus::Error;
                state.error_message = Some(err.to_string());
            }
        }
    }
}
