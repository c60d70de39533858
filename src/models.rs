use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One discovered business website with its enrichment data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lead {
    pub url: String,
    pub pagespeed: PageSpeedScores,
    pub contact_info: ContactInfo,
    pub design_issues: Vec<DesignIssue>,
    pub business_info: BusinessInfo,
    pub analyzed_at: DateTime<Utc>,
}

/// Category scores in [0, 100]; `None` when the audit could not be run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PageSpeedScores {
    pub performance: Option<f64>,
    pub accessibility: Option<f64>,
    pub best_practices: Option<f64>,
    pub seo: Option<f64>,
}

impl PageSpeedScores {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.performance.is_none()
            && self.accessibility.is_none()
            && self.best_practices.is_none()
            && self.seo.is_none()
    }

    /// Scores in classifier order.
    pub fn by_type(&self) -> [(IssueType, Option<f64>); 4] {
        [
            (IssueType::Performance, self.performance),
            (IssueType::Accessibility, self.accessibility),
            (IssueType::BestPractices, self.best_practices),
            (IssueType::Seo, self.seo),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub emails: BTreeSet<String>,
    pub phones: BTreeSet<String>,
    pub social_links: BTreeSet<String>,
}

impl ContactInfo {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty() && self.social_links.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueType {
    #[serde(rename = "performance")]
    Performance,
    #[serde(rename = "accessibility")]
    Accessibility,
    #[serde(rename = "best-practices")]
    BestPractices,
    #[serde(rename = "seo")]
    Seo,
}

impl IssueType {
    pub fn label(&self) -> &'static str {
        match self {
            IssueType::Performance => "Performance",
            IssueType::Accessibility => "Accessibility",
            IssueType::BestPractices => "Best practices",
            IssueType::Seo => "SEO",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignIssue {
    pub description: String,
    pub severity: Severity,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessInfo {
    pub business_name: String,
    pub location: Option<String>,
    /// Result URL exactly as the search provider returned it.
    pub original_url: String,
}

/// A URL whose enrichment task could not produce a lead.
#[derive(Debug, Clone)]
pub struct SkippedUrl {
    pub url: String,
    pub reason: String,
}
