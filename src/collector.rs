use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::audit::Scorer;
use crate::canon;
use crate::contact::{ContactExtractor, ScannedPage};
use crate::error::FetchError;
use crate::issues::{self, Thresholds};
use crate::models::{BusinessInfo, ContactInfo, Lead, PageSpeedScores, SkippedUrl};
use crate::search::{Query, SearchHit, SearchProvider};

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub workers: usize,
    pub task_timeout: Duration,
    pub max_results_per_query: usize,
    pub max_leads: Option<usize>,
    pub query_delay: Duration,
    pub thresholds: Thresholds,
}

/// Everything a finished run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub leads: Vec<Lead>,
    pub skipped: Vec<SkippedUrl>,
    pub duplicates: usize,
    pub excluded: usize,
    pub failed_queries: usize,
}

/// Canonical URLs claimed so far in this run.
///
/// Owned by the coordinator; the only access is through [`UrlRegistry::claim`].
#[derive(Default)]
pub struct UrlRegistry {
    seen: Mutex<HashSet<String>>,
}

impl UrlRegistry {
    /// True the first time `canonical` is claimed, false afterwards.
    pub fn claim(&self, canonical: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.insert(canonical.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// One unique URL awaiting enrichment.
struct Target {
    canonical: String,
    hit: SearchHit,
    location: String,
}

enum TaskOutcome {
    Done(Box<Lead>),
    Skipped(SkippedUrl),
}

/// Shared by all enrichment tasks.
struct Enricher {
    scorer: Scorer,
    contacts: ContactExtractor,
    thresholds: Thresholds,
    task_timeout: Duration,
}

impl Enricher {
    /// Audit and scan concurrently under one deadline; whatever finished in
    /// time goes into the lead. An unreachable host abandons the audit.
    async fn enrich(&self, target: Target) -> TaskOutcome {
        let url = target.hit.url.as_str();
        let deadline = Instant::now() + self.task_timeout;

        let audit = timeout_at(deadline, self.scorer.score(url));
        let scan = timeout_at(deadline, self.contacts.scan(url));
        tokio::pin!(audit, scan);

        let (scores, scan) = tokio::select! {
            scan = &mut scan => {
                if let Ok(ScannedPage { error: Some(FetchError::Unreachable(reason)), .. }) = &scan {
                    debug!("{} unreachable, dropping its audit", url);
                    return TaskOutcome::Skipped(SkippedUrl {
                        url: target.canonical,
                        reason: reason.clone(),
                    });
                }
                (audit.await, scan)
            }
            scores = &mut audit => (scores, scan.await),
        };

        let scores = scores.unwrap_or_else(|_| {
            warn!("Audit for {} abandoned at task deadline", url);
            PageSpeedScores::absent()
        });
        let (contact_info, signals) = match scan {
            Ok(scan) => {
                if let Some(FetchError::Unreachable(reason)) = scan.error {
                    return TaskOutcome::Skipped(SkippedUrl {
                        url: target.canonical,
                        reason,
                    });
                }
                (scan.contact_info, scan.signals)
            }
            Err(_) => {
                warn!("Page scan for {} abandoned at task deadline", url);
                (ContactInfo::default(), None)
            }
        };

        if scores.is_absent() && contact_info.is_empty() {
            debug!("No scores or contacts for {}", url);
        }
        let design_issues = issues::classify(&scores, signals.as_ref(), &self.thresholds);
        TaskOutcome::Done(Box::new(Lead {
            business_info: BusinessInfo {
                business_name: target.hit.business_name(),
                location: Some(target.location),
                original_url: target.hit.url.clone(),
            },
            url: target.canonical,
            pagespeed: scores,
            contact_info,
            design_issues,
            analyzed_at: Utc::now(),
        }))
    }
}

pub struct Collector {
    search: Arc<dyn SearchProvider>,
    enricher: Arc<Enricher>,
    options: CollectorOptions,
}

impl Collector {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scorer: Scorer,
        contacts: ContactExtractor,
        options: CollectorOptions,
    ) -> Self {
        let enricher = Arc::new(Enricher {
            scorer,
            contacts,
            thresholds: options.thresholds,
            task_timeout: options.task_timeout,
        });
        Self {
            search,
            enricher,
            options,
        }
    }

    /// Run every query, enrich each unique result URL, and wait for all
    /// tasks to settle.
    pub async fn run(&self, city: &str, queries: &[Query]) -> RunReport {
        let registry = UrlRegistry::default();
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut report = RunReport::default();

        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        // Workers send outcomes, the coordinator collects them
        let (tx, mut rx) = mpsc::channel::<TaskOutcome>(self.options.workers.max(1) * 2);

        'queries: for (i, query) in queries.iter().enumerate() {
            if i > 0 && !self.options.query_delay.is_zero() {
                tokio::time::sleep(self.options.query_delay).await;
            }
            let hits = match self
                .search
                .search(&query.text, self.options.max_results_per_query)
                .await
            {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("Search failed for {:?}: {}", query.text, e);
                    report.failed_queries += 1;
                    continue;
                }
            };
            info!("Query {:?} [{}]: {} results", query.text, query.category, hits.len());

            for hit in hits.into_iter().take(self.options.max_results_per_query) {
                if self.options.max_leads.is_some_and(|max| registry.len() >= max) {
                    info!("Reached lead cap, skipping remaining results");
                    break 'queries;
                }
                let Some(canonical) = canon::canonicalize(&hit.url) else {
                    debug!("Unusable result URL {}", hit.url);
                    report.excluded += 1;
                    continue;
                };
                if canon::is_excluded(&canonical) {
                    debug!("Excluded result URL {}", hit.url);
                    report.excluded += 1;
                    continue;
                }
                if !registry.claim(&canonical) {
                    debug!("Duplicate result URL {}", canonical);
                    report.duplicates += 1;
                    continue;
                }

                pb.inc_length(1);
                self.dispatch(
                    Target {
                        canonical,
                        hit,
                        location: city.to_string(),
                    },
                    Arc::clone(&semaphore),
                    tx.clone(),
                );
            }
        }

        // Drop our copy of tx so rx closes when all spawned tasks finish
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            match outcome {
                TaskOutcome::Done(lead) => report.leads.push(*lead),
                TaskOutcome::Skipped(skipped) => {
                    warn!("Skipped {}: {}", skipped.url, skipped.reason);
                    report.skipped.push(skipped);
                }
            }
            pb.inc(1);
        }

        pb.finish_and_clear();
        info!(
            "Collected {} leads ({} skipped, {} duplicates, {} excluded)",
            report.leads.len(),
            report.skipped.len(),
            report.duplicates,
            report.excluded
        );
        report
    }

    fn dispatch(&self, target: Target, semaphore: Arc<Semaphore>, tx: mpsc::Sender<TaskOutcome>) {
        let enricher = Arc::clone(&self.enricher);
        tokio::spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return;
            };
            let url = target.canonical.clone();
            // Inner task so a panic is recorded instead of silently losing the URL
            let outcome = match tokio::spawn(async move { enricher.enrich(target).await }).await {
                Ok(outcome) => outcome,
                Err(e) => TaskOutcome::Skipped(SkippedUrl {
                    url,
                    reason: format!("enrichment task failed: {}", e),
                }),
            };
            // Free the slot before a possibly blocking send
            drop(permit);
            let _ = tx.send(outcome).await;
        });
    }
}
