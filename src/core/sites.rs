//! Paginated site listing.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::client::{ImpervaClient, UpstreamError};
use crate::core::session::Session;
use crate::utils::json_truthy;

/// Sites endpoint path
pub const SITES_PATH: &str = "/api/prov/v1/sites/list";
/// Listing stops after this many pages
pub const MAX_SITE_PAGES: u32 = 50;
const SITES_PAGE_SIZE: u32 = 100;

/// One protected site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub site_id: Value,
    pub domain: Value,
    pub account_id: Value,
}

/// Sites in a listing body; entries without an id or domain are dropped
pub fn parse_sites(body: &Value) -> Vec<Site> {
    body.get("sites")
        .and_then(Value::as_array)
        .map(|sites| {
            sites
                .iter()
                .filter_map(|site| {
                    let site_id = site.get("site_id").filter(|v| json_truthy(v))?;
                    let domain = site.get("domain").filter(|v| json_truthy(v))?;
                    Some(Site {
                        site_id: site_id.clone(),
                        domain: domain.clone(),
                        account_id: site.get("account_id").cloned().unwrap_or(Value::Null),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ImpervaClient {
    /// Fetch one page of the account's sites
    pub async fn get_sites(&self, session: &Session, page_num: u32) -> Result<Vec<Site>, UpstreamError> {
        self.ensure_connected(session).await?;
        self.fetch_sites_page(session, page_num).await
    }

    /// Fetch every site of the account.
    ///
    /// A failure on the first page is returned; a later failure ends the
    /// listing with the sites gathered so far.
    pub async fn get_all_sites(&self, session: &Session) -> Result<Vec<Site>, UpstreamError> {
        self.ensure_connected(session).await?;

        let mut all_sites = Vec::new();
        let mut page_num = 0u32;

        loop {
            let sites = match self.fetch_sites_page(session, page_num).await {
                Ok(sites) => sites,
                Err(err) if page_num == 0 => return Err(err),
                Err(err) => {
                    warn!("Sites page {} failed, keeping {} sites: {}", page_num, all_sites.len(), err);
                    break;
                }
            };
            if sites.is_empty() {
                break;
            }

            all_sites.extend(sites);
            page_num += 1;

            if page_num >= MAX_SITE_PAGES {
                warn!("Reached safety limit of {} pages for sites", MAX_SITE_PAGES);
                break;
            }
        }

        info!("Retrieved total of {} sites across {} pages", all_sites.len(), page_num);
        Ok(all_sites)
    }

    async fn fetch_sites_page(&self, session: &Session, page_num: u32) -> Result<Vec<Site>, UpstreamError> {
        debug!("Fetching sites list (page {})", page_num);
        let query = [
            ("account_id", session.account_id().to_string()),
            ("page_size", SITES_PAGE_SIZE.to_string()),
            ("page_num", page_num.to_string()),
        ];
        let body = self.post_json(session, SITES_PATH, &query).await?;
        Ok(parse_sites(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sites_without_id_or_domain_are_dropped() {
        let body = json!({
            "sites": [
                {"site_id": 1, "domain": "a.example", "account_id": 7},
                {"site_id": 2},
                {"domain": "c.example"},
                {"site_id": 4, "domain": ""}
            ]
        });
        let sites = parse_sites(&body);
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].domain, "a.example");
        assert_eq!(sites[0].account_id, 7);
    }

    #[test]
    fn test_missing_list_is_empty() {
        assert!(parse_sites(&json!({"res": 0})).is_empty());
    }
}
