//! Aggregate statistics by category.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde_json::Value;

use crate::core::client::{ImpervaClient, UpstreamError};
use crate::core::session::Session;
use crate::models::StatsConfig;

/// Stats endpoint path
pub const STATS_PATH: &str = "/api/stats/v1";

/// Category name to the list of entries returned for it
pub type StatsData = BTreeMap<String, Value>;

/// Stats to fetch for one site and window
#[derive(Debug, Clone)]
pub struct StatsQuery {
    pub site_id: String,
    /// Millisecond epoch timestamps
    pub start_time: i64,
    pub end_time: i64,
    pub categories: Vec<String>,
    /// Bucket width in milliseconds for timeseries categories
    pub granularity_ms: u64,
}

impl StatsQuery {
    pub fn from_config(site_id: &str, start_time: i64, end_time: i64, config: &StatsConfig) -> Self {
        Self {
            site_id: site_id.to_string(),
            start_time,
            end_time,
            categories: config.categories.clone(),
            granularity_ms: config.granularity_ms,
        }
    }

    /// Query parameters for one category
    pub fn params(&self, account_id: &str, category: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("account_id", account_id.to_string()),
            ("time_range", "custom".to_string()),
            ("start", self.start_time.to_string()),
            ("end", self.end_time.to_string()),
            ("site_id", self.site_id.clone()),
            ("stats", category.to_string()),
        ];
        if category.contains("timeseries") {
            params.push(("granularity", self.granularity_ms.to_string()));
        }
        params
    }
}

/// Every category mapped to an empty list
pub fn empty_stats(categories: &[String]) -> StatsData {
    categories
        .iter()
        .map(|category| (category.clone(), Value::Array(Vec::new())))
        .collect()
}

impl ImpervaClient {
    /// Fetch each stats category in a single attempt.
    ///
    /// Fatal responses abort with the error; any other failure leaves that
    /// category empty.
    pub async fn get_stats_data(&self, session: &Session, query: &StatsQuery) -> Result<StatsData, UpstreamError> {
        self.ensure_connected(session).await?;

        let mut stats = StatsData::new();
        for category in &query.categories {
            debug!("Fetching {} stats for site {}", category, query.site_id);
            let params = query.params(session.account_id(), category);

            let entries = match self.post_json(session, STATS_PATH, &params).await {
                Ok(mut body) => body
                    .get_mut(category.as_str())
                    .map(Value::take)
                    .unwrap_or_else(|| Value::Array(Vec::new())),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!("Failed to fetch {} stats: {}", category, err);
                    Value::Array(Vec::new())
                }
            };
            debug!(
                "Retrieved {} {} entries",
                entries.as_array().map_or(0, Vec::len),
                category
            );
            stats.insert(category.clone(), entries);
        }
        Ok(stats)
    }
}
