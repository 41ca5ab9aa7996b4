//! API endpoints for the DDoS report service.
//!
//! This module provides the HTTP endpoints consumed by the dashboard: health
//! and metrics, the cached site list, and the DDoS report itself.

use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::collector::{collect_visits, CollectionRequest, CollectionResult, CollectorOptions, ErrorPayload};
use crate::core::rules::SecurityRule;
use crate::core::sites_cache::{CacheStatus, SitesCache, SitesSnapshot};
use crate::core::stats::{empty_stats, StatsData, StatsQuery};
use crate::core::{ImpervaClient, Session};
use crate::models::Config;
use crate::utils::{format_millis_range, parse_iso_timestamp_millis};

pub struct ApiState {
    pub config: Arc<Config>,
    pub client: ImpervaClient,
    pub sites_cache: Arc<SitesCache>,
    /// Absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health_check)))
        .service(web::resource("/metrics").route(web::get().to(render_metrics)))
        .service(
            web::scope("/api")
                .service(web::resource("/sites").route(web::get().to(list_sites)))
                .service(web::resource("/ddos-report").route(web::post().to(generate_report))),
        );
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
}

/// Query string of the sites endpoint
#[derive(Debug, Deserialize)]
pub struct SitesParams {
    pub refresh: Option<String>,
}

#[derive(Serialize)]
struct SitesResponse {
    #[serde(flatten)]
    snapshot: SitesSnapshot,
    timestamp: String,
    success: bool,
}

/// DDoS report request body
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Accepted as a string or a number
    pub site_id: Option<Value>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub country_filter: Option<String>,
}

#[derive(Serialize)]
struct RequestInfo {
    request_id: String,
    site_id: String,
    date_range: String,
    country_filter: Option<String>,
    timestamp: String,
}

#[derive(Serialize)]
struct ReportResponse {
    #[serde(flatten)]
    result: CollectionResult,
    request_info: RequestInfo,
    rules_map: BTreeMap<String, SecurityRule>,
    stats: StatsData,
}

#[derive(Serialize)]
struct ReportErrorResponse {
    #[serde(flatten)]
    payload: ErrorPayload,
    retry_recommended: bool,
    timestamp: String,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn site_id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now_iso(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus scrape endpoint
async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}

/// Cached site list, optionally triggering a background refresh
pub async fn list_sites(state: web::Data<ApiState>, params: web::Query<SitesParams>) -> impl Responder {
    let refresh = params
        .refresh
        .as_deref()
        .map_or(false, |value| value.eq_ignore_ascii_case("true"));
    if refresh {
        state.sites_cache.refresh().await;
    }

    let snapshot = state.sites_cache.snapshot().await;
    let status = snapshot.status;
    let response = SitesResponse {
        success: status == CacheStatus::Ready,
        snapshot,
        timestamp: now_iso(),
    };

    match status {
        CacheStatus::Loading => HttpResponse::Accepted().json(response),
        CacheStatus::Error => HttpResponse::ServiceUnavailable().json(response),
        CacheStatus::Ready => HttpResponse::Ok().json(response),
    }
}

/// Generate a DDoS report for one site and time window
pub async fn generate_report(state: web::Data<ApiState>, body: web::Bytes) -> impl Responder {
    if body.is_empty() {
        return HttpResponse::BadRequest().json(json!({ "error": "No data received" }));
    }
    let request: ReportRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::BadRequest().json(json!({ "error": format!("Invalid JSON body: {}", e) }));
        }
    };

    let site_id = request.site_id.as_ref().and_then(site_id_text);
    let start_date = non_empty(&request.start_date);
    let end_date = non_empty(&request.end_date);

    let (site_id, start_date, end_date) = match (site_id, start_date, end_date) {
        (Some(site_id), Some(start), Some(end)) => (site_id, start, end),
        (site_id, start, end) => {
            let missing: Vec<&str> = [
                ("site_id", site_id.is_none()),
                ("start_date", start.is_none()),
                ("end_date", end.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| *name)
            .collect();
            return HttpResponse::BadRequest().json(json!({
                "error": "Missing required parameters",
                "missing": missing,
            }));
        }
    };

    let (start_time, end_time) = match (
        parse_iso_timestamp_millis(start_date),
        parse_iso_timestamp_millis(end_date),
    ) {
        (Some(start), Some(end)) => (start, end),
        _ => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid date format",
                "message": "Dates must be ISO 8601, e.g. 2024-01-31T12:00:00Z",
            }));
        }
    };

    let config = &state.config;
    let request_id = Uuid::new_v4().to_string();
    info!("Report {} requested for site {} ({} to {})", request_id, site_id, start_date, end_date);

    let client = Arc::new(state.client.clone());
    let session = Arc::new(Session::from_config(&config.api));

    let rules = match client.get_security_rules(&session, &site_id).await {
        Ok(rules) => rules.rules_map,
        Err(e) => {
            warn!("Continuing without security rules for site {}: {}", site_id, e);
            BTreeMap::new()
        }
    };

    let collection = CollectionRequest {
        site_id: site_id.clone(),
        start_time,
        end_time,
        country_filter: request.country_filter.clone(),
        concurrent: config.concurrency.enabled,
        max_concurrent: config.concurrency.max_concurrent,
    };
    let result = collect_visits(
        Arc::clone(&client),
        Arc::clone(&session),
        CollectorOptions::from(&config.request),
        &collection,
    )
    .await;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            let response = ReportErrorResponse {
                payload: ErrorPayload::from(&err),
                retry_recommended: true,
                timestamp: now_iso(),
            };
            return if err.is_connectivity() {
                HttpResponse::ServiceUnavailable().json(response)
            } else {
                HttpResponse::InternalServerError().json(response)
            };
        }
    };

    let query = StatsQuery::from_config(&site_id, start_time, end_time, &config.stats);
    let stats = match client.get_stats_data(&session, &query).await {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Continuing without stats for site {}: {}", site_id, e);
            empty_stats(&config.stats.categories)
        }
    };

    info!(
        "Report {} complete: {} visits over {} pages",
        request_id, result.total_visits, result.total_pages
    );

    HttpResponse::Ok().json(ReportResponse {
        request_info: RequestInfo {
            request_id,
            site_id,
            date_range: format_millis_range(start_time, end_time),
            country_filter: collection.filter_applied(),
            timestamp: now_iso(),
        },
        result,
        rules_map: rules,
        stats,
    })
}
