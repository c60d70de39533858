use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Deserialize;

use crate::models::{DesignIssue, IssueType, PageSpeedScores, Severity};

static VIEWPORT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="viewport"]"#).unwrap());
static DESCRIPTION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static IMG_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static SCRIPT_SRC_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[src]").unwrap());
static STYLESHEET_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="stylesheet"]"#).unwrap());
/// Elements the browser fetches while loading the page. `link` only counts for
/// rels that load something; `canonical`, `profile` and friends are just metadata.
static SUBRESOURCE_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        "script[src], img[src], iframe[src], source[src], video[src], audio[src], \
         link[rel~=stylesheet][href], link[rel~=icon][href], link[rel~=preload][href]",
    )
    .unwrap()
});

const RASTER_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];
const OUTDATED_JQUERY: &[&str] = &["jquery-1", "jquery-2", "jquery/1.", "jquery/2.", "jquery.min.js?ver=1"];
const MODERN_CSS: &[&str] = &["tailwind", "bootstrap-5", "bootstrap@5", "bootstrap/5", "bulma"];

/// Score cutoffs: below `high_below` is high severity, below `medium_below` medium.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Thresholds {
    pub high_below: f64,
    pub medium_below: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_below: 50.0,
            medium_below: 80.0,
        }
    }
}

impl Thresholds {
    fn severity(&self, score: f64) -> Option<Severity> {
        if score < self.high_below {
            Some(Severity::High)
        } else if score < self.medium_below {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

/// Markup observations that feed non-score issues.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSignals {
    pub has_viewport: bool,
    pub has_meta_description: bool,
    pub has_title: bool,
    pub images_missing_alt: usize,
    pub images_without_lazy_loading: usize,
    pub outdated_jquery: Option<String>,
    pub mixed_content: usize,
    pub modern_css_framework: bool,
}

impl PageSignals {
    pub fn inspect(doc: &Html, page_url: &str) -> Self {
        let mut signals = PageSignals {
            has_viewport: doc.select(&VIEWPORT_SEL).next().is_some(),
            has_meta_description: doc.select(&DESCRIPTION_SEL).any(|m| {
                m.value()
                    .attr("content")
                    .is_some_and(|c| !c.trim().is_empty())
            }),
            has_title: doc
                .select(&TITLE_SEL)
                .any(|t| !t.text().collect::<String>().trim().is_empty()),
            ..Default::default()
        };

        for img in doc.select(&IMG_SEL) {
            let el = img.value();
            if el.attr("alt").map_or(true, |a| a.trim().is_empty()) {
                signals.images_missing_alt += 1;
            }
            let src = el.attr("src").unwrap_or("").to_ascii_lowercase();
            let src_path = src.split(['?', '#']).next().unwrap_or("");
            if RASTER_EXTENSIONS.iter().any(|ext| src_path.ends_with(ext))
                && !el
                    .attr("loading")
                    .is_some_and(|l| l.trim().eq_ignore_ascii_case("lazy"))
            {
                signals.images_without_lazy_loading += 1;
            }
        }

        signals.outdated_jquery = doc.select(&SCRIPT_SRC_SEL).find_map(|s| {
            let src = s.value().attr("src")?.to_ascii_lowercase();
            OUTDATED_JQUERY.iter().any(|m| src.contains(m)).then_some(src)
        });

        signals.modern_css_framework = doc.select(&STYLESHEET_SEL).any(|l| {
            let href = l.value().attr("href").unwrap_or("").to_ascii_lowercase();
            MODERN_CSS.iter().any(|fw| href.contains(fw))
        });

        if page_url.starts_with("https://") {
            signals.mixed_content = doc
                .select(&SUBRESOURCE_SEL)
                .filter(|el| {
                    let v = el.value();
                    v.attr("src")
                        .or_else(|| v.attr("href"))
                        .is_some_and(|u| u.trim().starts_with("http://"))
                })
                .count();
        }
        signals
    }
}

/// Ordered design issues: score-derived ones in category order, then heuristics.
///
/// A missing score yields no issue for its category.
pub fn classify(
    scores: &PageSpeedScores,
    signals: Option<&PageSignals>,
    thresholds: &Thresholds,
) -> Vec<DesignIssue> {
    let mut issues: Vec<DesignIssue> = scores
        .by_type()
        .into_iter()
        .filter_map(|(issue_type, score)| {
            let score = score?;
            let severity = thresholds.severity(score)?;
            let cutoff = match severity {
                Severity::High => thresholds.high_below,
                _ => thresholds.medium_below,
            };
            Some(DesignIssue {
                description: format!(
                    "{} score below {}: scored {}",
                    issue_type.label(),
                    cutoff,
                    score
                ),
                severity,
                issue_type,
            })
        })
        .collect();

    if let Some(signals) = signals {
        issues.extend(heuristic_issues(signals));
    }
    issues
}

fn heuristic_issues(s: &PageSignals) -> Vec<DesignIssue> {
    let mut out = Vec::new();
    let mut push = |issue_type, severity, description: String| {
        out.push(DesignIssue {
            description,
            severity,
            issue_type,
        })
    };

    if !s.has_viewport {
        push(
            IssueType::BestPractices,
            Severity::High,
            "No mobile viewport meta tag found".into(),
        );
    }
    if s.mixed_content > 0 {
        push(
            IssueType::BestPractices,
            Severity::High,
            format!("{} resource(s) loaded over insecure http on an https page", s.mixed_content),
        );
    }
    if let Some(src) = &s.outdated_jquery {
        push(
            IssueType::BestPractices,
            Severity::Medium,
            format!("Using outdated jQuery version: {}", src),
        );
    }
    if s.images_missing_alt > 0 {
        push(
            IssueType::Accessibility,
            Severity::Medium,
            format!("{} image(s) missing alt text", s.images_missing_alt),
        );
    }
    if !s.has_title {
        push(IssueType::Seo, Severity::Medium, "Missing page title".into());
    }
    if !s.has_meta_description {
        push(IssueType::Seo, Severity::Medium, "Missing meta description".into());
    }
    if s.images_without_lazy_loading > 0 {
        push(
            IssueType::Performance,
            Severity::Low,
            format!("{} image(s) missing lazy loading", s.images_without_lazy_loading),
        );
    }
    if !s.modern_css_framework {
        push(
            IssueType::BestPractices,
            Severity::Low,
            "No modern CSS framework detected".into(),
        );
    }
    out
}
