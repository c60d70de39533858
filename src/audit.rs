use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::models::PageSpeedScores;
use crate::retry::{with_retry, RetryPolicy};

const PAGESPEED_URL: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";
const SOURCE: &str = "pagespeed";
const CATEGORIES: &[&str] = &["PERFORMANCE", "ACCESSIBILITY", "BEST_PRACTICES", "SEO"];

/// Remote performance audit, one attempt per call.
#[async_trait]
pub trait AuditSource: Send + Sync {
    async fn audit(&self, url: &str) -> Result<PageSpeedScores, FetchError>;
}

// ── PageSpeed Insights response schema ──

#[derive(Debug, Deserialize)]
struct RunPagespeedResponse {
    #[serde(rename = "lighthouseResult")]
    lighthouse_result: Option<LighthouseResult>,
}

#[derive(Debug, Deserialize)]
struct LighthouseResult {
    categories: Option<HashMap<String, LighthouseCategory>>,
}

#[derive(Debug, Deserialize)]
struct LighthouseCategory {
    score: Option<f64>,
}

/// Map a raw response onto 0–100 scores.
///
/// Lighthouse reports each category in [0, 1]; anything outside that range,
/// or a response without categories, is malformed.
fn map_response(resp: RunPagespeedResponse) -> Result<PageSpeedScores, FetchError> {
    let categories = resp
        .lighthouse_result
        .ok_or_else(|| FetchError::malformed(SOURCE, "missing lighthouseResult"))?
        .categories
        .ok_or_else(|| FetchError::malformed(SOURCE, "missing lighthouseResult.categories"))?;

    let score = |key: &str| -> Result<Option<f64>, FetchError> {
        match categories.get(key).and_then(|c| c.score) {
            None => Ok(None),
            Some(s) if (0.0..=1.0).contains(&s) => Ok(Some((s * 100.0).round())),
            Some(s) => Err(FetchError::malformed(
                SOURCE,
                format!("{} score {} out of range", key, s),
            )),
        }
    };

    Ok(PageSpeedScores {
        performance: score("performance")?,
        accessibility: score("accessibility")?,
        best_practices: score("best-practices")?,
        seo: score("seo")?,
    })
}

pub struct PageSpeedClient {
    http: HttpClient,
    api_key: Option<String>,
}

impl PageSpeedClient {
    pub fn new(http: HttpClient, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl AuditSource for PageSpeedClient {
    async fn audit(&self, url: &str) -> Result<PageSpeedScores, FetchError> {
        let mut params = vec![("url", url.to_string()), ("strategy", "mobile".to_string())];
        params.extend(CATEGORIES.iter().map(|c| ("category", c.to_string())));
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        let resp: RunPagespeedResponse = self.http.get_json(SOURCE, PAGESPEED_URL, &params).await?;
        map_response(resp)
    }
}

/// Audit Scorer: retries transient failures and never fails outward.
pub struct Scorer {
    source: Arc<dyn AuditSource>,
    retry: RetryPolicy,
}

impl Scorer {
    pub fn new(source: Arc<dyn AuditSource>, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Scores for `url`, or all-absent scores after a persistent failure.
    pub async fn score(&self, url: &str) -> PageSpeedScores {
        match with_retry(&self.retry, "audit", || self.source.audit(url)).await {
            Ok(scores) => {
                debug!("Audit {} → {:?}", url, scores);
                scores
            }
            Err(e) => {
                warn!("Audit failed for {}: {}", url, e);
                PageSpeedScores::absent()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn parse(body: &str) -> Result<PageSpeedScores, FetchError> {
        let resp: RunPagespeedResponse = serde_json::from_str(body).unwrap();
        map_response(resp)
    }

    #[test]
    fn maps_lighthouse_categories() {
        let s = parse(
            r#"{"lighthouseResult":{"categories":{
                "performance":{"id":"performance","score":0.3},
                "accessibility":{"score":0.85},
                "best-practices":{"score":0.9},
                "seo":{"score":0.95}}}}"#,
        )
        .unwrap();
        assert_eq!(s.performance, Some(30.0));
        assert_eq!(s.accessibility, Some(85.0));
        assert_eq!(s.best_practices, Some(90.0));
        assert_eq!(s.seo, Some(95.0));
    }

    #[test]
    fn null_or_missing_category_is_absent() {
        let s = parse(r#"{"lighthouseResult":{"categories":{"performance":{"score":null},"seo":{"score":1}}}}"#).unwrap();
        assert_eq!(s.performance, None);
        assert_eq!(s.accessibility, None);
        assert_eq!(s.seo, Some(100.0));
    }

    #[test]
    fn missing_result_is_malformed() {
        assert!(matches!(
            parse(r#"{"error":{"code":500}}"#),
            Err(FetchError::Malformed { .. })
        ));
        assert!(matches!(
            parse(r#"{"lighthouseResult":{}}"#),
            Err(FetchError::Malformed { .. })
        ));
    }

    #[test]
    fn out_of_range_score_is_malformed() {
        assert!(matches!(
            parse(r#"{"lighthouseResult":{"categories":{"performance":{"score":1.7}}}}"#),
            Err(FetchError::Malformed { .. })
        ));
    }

    /// Replays a fixed sequence of outcomes, then repeats the last one.
    struct Scripted {
        outcomes: Mutex<Vec<Result<PageSpeedScores, FetchError>>>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl AuditSource for Scripted {
        async fn audit(&self, _url: &str) -> Result<PageSpeedScores, FetchError> {
            *self.calls.lock().unwrap() += 1;
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                match &outcomes[0] {
                    Ok(s) => Ok(*s),
                    Err(_) => Err(FetchError::Server { status: 503 }),
                }
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn scorer_retries_rate_limit_then_succeeds() {
        let good = PageSpeedScores {
            performance: Some(42.0),
            ..Default::default()
        };
        let source = Arc::new(Scripted {
            outcomes: Mutex::new(vec![Err(FetchError::RateLimited), Ok(good)]),
            calls: Mutex::new(0),
        });
        let scorer = Scorer::new(source.clone(), fast_retry());
        assert_eq!(scorer.score("https://a.in").await, good);
        assert_eq!(*source.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn scorer_returns_absent_after_persistent_failure() {
        let source = Arc::new(Scripted {
            outcomes: Mutex::new(vec![Err(FetchError::Server { status: 503 })]),
            calls: Mutex::new(0),
        });
        let scorer = Scorer::new(source.clone(), fast_retry());
        assert!(scorer.score("https://a.in").await.is_absent());
        assert_eq!(*source.calls.lock().unwrap(), 3);
    }
}
