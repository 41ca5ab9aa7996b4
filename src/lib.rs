//! DDoS Report Service
//!
//! Collects DDoS visit records, security rules and statistics from the
//! Imperva API and serves them as aggregated reports to the dashboard.

pub mod api;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;
