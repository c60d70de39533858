use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::canon;
use crate::error::FetchError;
use crate::http::HttpClient;
use crate::retry::{with_retry, RetryPolicy};

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
/// Custom Search returns at most 10 items per request and 100 per query.
const PAGE_SIZE: usize = 10;
const MAX_RESULTS: usize = 100;

pub const DEFAULT_TEMPLATE: &str = "{category} in {city}";

/// Title separators; the business name is whatever precedes the first one.
const TITLE_SEPARATORS: &[&str] = &[" | ", " - ", " – ", " — ", " :: ", ": "];

/// A search query and the category it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub text: String,
    pub category: String,
}

/// Build one query per (template, category) pair, without duplicates.
///
/// Templates use `{category}` (or `{industry}`) and `{city}` placeholders.
/// First-seen order is kept; comparison ignores case and repeated whitespace.
pub fn build_queries(city: &str, categories: &[String], templates: &[String]) -> Vec<Query> {
    let city = collapse_ws(city);
    let default = [DEFAULT_TEMPLATE.to_string()];
    let templates = if templates.is_empty() { &default[..] } else { templates };

    let mut seen = HashSet::new();
    let mut queries = Vec::new();
    for template in templates {
        for category in categories {
            let category = collapse_ws(category);
            if category.is_empty() {
                continue;
            }
            let text = collapse_ws(
                &template
                    .replace("{category}", &category)
                    .replace("{industry}", &category)
                    .replace("{city}", &city),
            );
            if seen.insert(text.to_lowercase()) {
                queries.push(Query { text, category: category.clone() });
            }
        }
    }
    queries
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One organic result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

impl SearchHit {
    /// Business name from the result title, falling back to the domain.
    pub fn business_name(&self) -> String {
        let title = self.title.trim();
        let name = TITLE_SEPARATORS
            .iter()
            .filter_map(|sep| title.find(sep))
            .min()
            .map(|idx| &title[..idx])
            .unwrap_or(title)
            .trim();
        if name.is_empty() {
            canon::domain_of(&self.url).unwrap_or_else(|| self.url.clone())
        } else {
            name.to_string()
        }
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, FetchError>;
}

// ── Google Custom Search ──

#[derive(Debug, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    link: String,
    #[serde(default)]
    title: String,
}

impl From<CustomSearchItem> for SearchHit {
    fn from(item: CustomSearchItem) -> Self {
        SearchHit {
            url: item.link,
            title: item.title,
        }
    }
}

pub struct GoogleSearch {
    http: HttpClient,
    api_key: String,
    engine_id: String,
    retry: RetryPolicy,
}

impl GoogleSearch {
    pub fn new(http: HttpClient, api_key: String, engine_id: String, retry: RetryPolicy) -> Self {
        Self {
            http,
            api_key,
            engine_id,
            retry,
        }
    }

    async fn fetch_page(&self, query: &str, start: usize, num: usize) -> Result<Vec<SearchHit>, FetchError> {
        let params = [
            ("key", self.api_key.clone()),
            ("cx", self.engine_id.clone()),
            ("q", query.to_string()),
            ("num", num.to_string()),
            ("start", start.to_string()),
        ];
        let resp: CustomSearchResponse = with_retry(&self.retry, "search", || {
            self.http.get_json("custom search", CUSTOM_SEARCH_URL, &params)
        })
        .await?;
        Ok(resp.items.into_iter().map(SearchHit::from).collect())
    }
}

#[async_trait]
impl SearchProvider for GoogleSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, FetchError> {
        let limit = limit.min(MAX_RESULTS);
        let mut hits = Vec::new();
        while hits.len() < limit {
            let num = PAGE_SIZE.min(limit - hits.len());
            let page = self.fetch_page(query, hits.len() + 1, num).await?;
            let exhausted = page.len() < num;
            hits.extend(page);
            if exhausted {
                break;
            }
        }
        hits.truncate(limit);
        debug!("Query {:?} returned {} results", query, hits.len());
        Ok(hits)
    }
}
