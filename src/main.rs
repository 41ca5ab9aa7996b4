//! DDoS Report Service
//!
//! This is the main entry point for the DDoS report service.
//! It initializes the application components and starts the web server.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::info;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

use ddos_report_service::api::{self, ApiState};
use ddos_report_service::config;
use ddos_report_service::core::{ImpervaClient, ImpervaSitesLoader, SitesCache};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting DDoS Report Service...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    let config = Arc::new(config);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let client = ImpervaClient::from_config(&config).context("Failed to build HTTP client")?;

    // Sites are loaded in the background; the cache reports `loading` until then
    let loader = ImpervaSitesLoader::new(client.clone(), config.api.clone());
    let sites_cache = SitesCache::new(Arc::new(loader));
    sites_cache.refresh().await;

    // Create API state
    let state = web::Data::new(ApiState {
        config: config.clone(),
        client,
        sites_cache,
        metrics: Some(metrics),
    });

    info!("Listening on {}:{}", config.server.host, config.server.port);

    // Start HTTP server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    Ok(())
}
