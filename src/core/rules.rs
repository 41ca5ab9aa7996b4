//! Security rule definitions for correlating attack codes.
//!
//! Rules come from the site's incap and rate rule lists. Incap rules are
//! further split into alert and block rules by their action code.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use crate::core::client::{ImpervaClient, UpstreamError};
use crate::core::session::Session;
use crate::utils::json_truthy;

/// Security rules endpoint path
pub const RULES_PATH: &str = "/api/prov/v1/sites/incapRules/list";

/// Rule origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RuleKind {
    #[serde(rename = "incap_rule")]
    Incap,
    #[serde(rename = "rate_rule")]
    Rate,
}

/// What a rule does when it matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `RULE_ACTION_ALERT`
    Alert,
    /// `RULE_ACTION_BLOCK`
    Block,
    /// Any other action code
    Other,
}

impl RuleAction {
    pub fn from_code(code: &str) -> Self {
        match code {
            "RULE_ACTION_ALERT" => RuleAction::Alert,
            "RULE_ACTION_BLOCK" => RuleAction::Block,
            _ => RuleAction::Other,
        }
    }
}

/// Rule definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityRule {
    /// Rule ID
    pub id: String,
    /// Rule name
    pub name: String,
    /// Upstream action code
    pub action: String,
    /// Whether the rule is enabled
    pub enabled: bool,
    /// Rule filter expression
    pub filter: String,
    /// Rule origin
    #[serde(rename = "type")]
    pub kind: RuleKind,
}

impl SecurityRule {
    fn from_json(rule: &Value, kind: RuleKind) -> Option<Self> {
        let id = match rule.get("id").filter(|id| json_truthy(id))? {
            Value::String(id) => id.clone(),
            other => other.to_string(),
        };
        let default_name = match kind {
            RuleKind::Incap => "Unknown Rule",
            RuleKind::Rate => "Unknown Rate Rule",
        };
        let text = |field: &str, default: &str| {
            rule.get(field)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        Some(Self {
            id,
            name: text("name", default_name),
            action: text("action", ""),
            enabled: rule.get("enabled").and_then(Value::as_str) == Some("true"),
            filter: text("filter", ""),
            kind,
        })
    }

    pub fn rule_action(&self) -> RuleAction {
        RuleAction::from_code(&self.action)
    }
}

/// Rules of one site, indexed and classified
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SecurityRules {
    pub rules_map: BTreeMap<String, SecurityRule>,
    pub alert_rules: Vec<SecurityRule>,
    pub block_rules: Vec<SecurityRule>,
    pub total_rules: usize,
}

/// Build the rule index from a rules response body.
///
/// Rules without an id are skipped. A rate rule sharing an id with an incap
/// rule replaces it in the map.
pub fn parse_security_rules(body: &Value) -> SecurityRules {
    let list = |section: &str, key: &str| -> Vec<Value> {
        body.get(section)
            .and_then(|s| s.get(key))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    let mut rules = SecurityRules::default();

    for raw in list("incap_rules", "All") {
        let Some(rule) = SecurityRule::from_json(&raw, RuleKind::Incap) else {
            continue;
        };
        match rule.rule_action() {
            RuleAction::Alert => rules.alert_rules.push(rule.clone()),
            RuleAction::Block => rules.block_rules.push(rule.clone()),
            RuleAction::Other => {}
        }
        rules.rules_map.insert(rule.id.clone(), rule);
    }

    for raw in list("rate_rules", "Rates") {
        if let Some(rule) = SecurityRule::from_json(&raw, RuleKind::Rate) {
            rules.rules_map.insert(rule.id.clone(), rule);
        }
    }

    rules.total_rules = rules.rules_map.len();
    rules
}

impl ImpervaClient {
    /// Fetch the security rules of a site in a single attempt
    ///
    /// # Arguments
    ///
    /// * `session` - Upstream session
    /// * `site_id` - The site to list rules for
    pub async fn get_security_rules(&self, session: &Session, site_id: &str) -> Result<SecurityRules, UpstreamError> {
        self.ensure_connected(session).await?;
        debug!("Fetching security rules for site {}", site_id);

        let query = [
            ("site_id", site_id.to_string()),
            ("include_incap_rules", "true".to_string()),
            ("include_ad_rules", "NO".to_string()),
            ("page_size", "100".to_string()),
            ("page_num", "0".to_string()),
        ];
        let body = self.post_json(session, RULES_PATH, &query).await?;
        let rules = parse_security_rules(&body);

        info!(
            "Retrieved {} security rules (alert: {}, block: {})",
            rules.total_rules,
            rules.alert_rules.len(),
            rules.block_rules.len()
        );
        Ok(rules)
    }
}
