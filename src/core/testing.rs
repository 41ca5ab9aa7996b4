//! Scripted upstream used by the collector tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::core::fetcher::{PageRequest, PageResult, VisitsApi};
use crate::core::filter::Visit;
use crate::core::session::Session;

/// `count` visits tagged with their page
pub(crate) fn page_of(page: u32, count: usize) -> Vec<Visit> {
    (0..count)
        .map(|i| {
            Visit::new(json!({
                "id": format!("p{}-{}", page, i),
                "country": if i % 2 == 0 { json!(["US", "CA"]) } else { json!("DE") },
            }))
        })
        .collect()
}

/// Upstream whose pages replay a fixed script.
///
/// The n-th fetch of a page returns the n-th scripted result, repeating the
/// last one once the script runs out. Unscripted pages are empty.
pub(crate) struct ScriptedApi {
    reachable: Option<String>,
    scripts: HashMap<u32, Vec<PageResult>>,
    served: Mutex<HashMap<u32, usize>>,
    calls: Mutex<Vec<(u32, String)>>,
}

impl ScriptedApi {
    pub(crate) fn new() -> Self {
        Self {
            reachable: Some("https://a.example".to_string()),
            scripts: HashMap::new(),
            served: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Pages `0..sizes.len()` holding `sizes[i]` visits each
    pub(crate) fn with_pages(sizes: &[usize]) -> Self {
        sizes
            .iter()
            .enumerate()
            .fold(Self::new(), |api, (page, size)| {
                api.page(page as u32, vec![PageResult::success(page_of(page as u32, *size))])
            })
    }

    pub(crate) fn page(mut self, page: u32, script: Vec<PageResult>) -> Self {
        self.scripts.insert(page, script);
        self
    }

    pub(crate) fn unreachable(mut self) -> Self {
        self.reachable = None;
        self
    }

    /// Page indices in the order they were requested
    pub(crate) fn requested_pages(&self) -> Vec<u32> {
        self.calls.lock().unwrap().iter().map(|(page, _)| *page).collect()
    }

    /// Endpoint used for each request, in order
    pub(crate) fn endpoints_used(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }
}

#[async_trait]
impl VisitsApi for ScriptedApi {
    async fn probe(&self, session: &Session) -> Option<String> {
        let endpoint = self.reachable.clone()?;
        session.select_endpoint(&endpoint);
        Some(endpoint)
    }

    async fn fetch_page(&self, session: &Session, request: &PageRequest) -> PageResult {
        self.calls
            .lock()
            .unwrap()
            .push((request.page_index, session.selected_endpoint()));

        let Some(script) = self.scripts.get(&request.page_index) else {
            return PageResult::success(Vec::new());
        };
        let mut served = self.served.lock().unwrap();
        let count = served.entry(request.page_index).or_insert(0);
        let result = script[(*count).min(script.len() - 1)].clone();
        *count += 1;
        result
    }
}
