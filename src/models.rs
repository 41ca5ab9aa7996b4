use serde::{Deserialize, Serialize};

/// Fixed User-Agent sent to the upstream API
pub const DEFAULT_USER_AGENT: &str = "Imperva-DDoS-Report-Generator/1.0";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Upstream API credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API key (sent as `x-API-Key`)
    #[serde(default)]
    pub key: String,
    /// API identifier (sent as `x-API-Id`)
    #[serde(default)]
    pub id: String,
    /// Account identifier used by the stats and sites endpoints
    #[serde(default)]
    pub account_id: String,
    /// Candidate base URLs, tried in order
    pub base_urls: Vec<String>,
    /// User-Agent header value
    pub user_agent: String,
}

/// Request, retry and pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Attempts per page before the page counts as failed
    pub max_retries: u32,
    /// Consecutive failed pages tolerated before aborting
    pub max_consecutive_failures: u32,
    /// Records requested per page
    pub page_size: u32,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds for data requests
    pub read_timeout_secs: u64,
    /// Timeout in seconds for the connectivity probe
    pub probe_timeout_secs: u64,
    /// Base delay in milliseconds for exponential backoff
    pub backoff_base_ms: u64,
    /// Pause in milliseconds between concurrent batches
    pub batch_pause_ms: u64,
}

/// Concurrent collection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Whether the concurrent collector is used for reports
    pub enabled: bool,
    /// Pages fetched in parallel per batch
    pub max_concurrent: usize,
}

/// Statistics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Stat categories requested for every report
    pub categories: Vec<String>,
    /// Timeseries granularity in milliseconds
    pub granularity_ms: u64,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream API configuration
    pub api: ApiConfig,
    /// Request configuration
    pub request: RequestConfig,
    /// Concurrency configuration
    pub concurrency: ConcurrencyConfig,
    /// Stats configuration
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            api: ApiConfig {
                key: String::new(),
                id: String::new(),
                account_id: String::new(),
                base_urls: vec![
                    "https://my.imperva.com".to_string(),
                    "https://my.incapsula.com".to_string(),
                ],
                user_agent: DEFAULT_USER_AGENT.to_string(),
            },
            request: RequestConfig {
                max_retries: 3,
                max_consecutive_failures: 3,
                page_size: 100,
                connect_timeout_secs: 15,
                read_timeout_secs: 60,
                probe_timeout_secs: 5,
                backoff_base_ms: 1000,
                batch_pause_ms: 300,
            },
            concurrency: ConcurrencyConfig {
                enabled: true,
                max_concurrent: 5,
            },
            stats: StatsConfig {
                categories: vec![
                    "incap_rules".to_string(),
                    "threats".to_string(),
                    "incap_rules_timeseries".to_string(),
                ],
                granularity_ms: 300_000,
            },
        }
    }
}
