//! Visit records and the country post-filter.
//!
//! Visits are kept as the upstream JSON so the report can forward every field
//! to the dashboard; only `country` is interpreted here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter value meaning "no country restriction"
pub const ALL_COUNTRIES: &str = "all";

/// One upstream-reported traffic or attack event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Visit(Value);

impl Visit {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Countries attached to the visit.
    ///
    /// `country` may be absent, a single string, or a list of strings.
    pub fn countries(&self) -> Vec<&str> {
        match self.0.get("country") {
            Some(Value::String(country)) => vec![country.as_str()],
            Some(Value::Array(countries)) => countries.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether any of the visit's countries equals `country`, ignoring case
    pub fn matches_country(&self, country: &str) -> bool {
        let country = country.to_lowercase();
        self.countries()
            .into_iter()
            .any(|candidate| candidate.to_lowercase() == country)
    }
}

/// The filter actually in force, or `None` for empty and "all"
pub fn active_filter(country_filter: Option<&str>) -> Option<&str> {
    country_filter.filter(|filter| !filter.is_empty() && filter.to_lowercase() != ALL_COUNTRIES)
}

/// Keep only visits from `country_filter`.
///
/// Visits without a country are dropped while a filter is active.
pub fn filter_by_country(visits: Vec<Visit>, country_filter: Option<&str>) -> Vec<Visit> {
    let Some(filter) = active_filter(country_filter) else {
        return visits;
    };

    let before = visits.len();
    let filtered: Vec<Visit> = visits
        .into_iter()
        .filter(|visit| visit.matches_country(filter))
        .collect();
    log::info!("Country filter '{}' applied: {} -> {} visits", filter, before, filtered.len());
    filtered
}
