use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;
use crate::http::PageFetcher;
use crate::issues::PageSignals;
use crate::models::ContactInfo;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());
/// North American: (555) 123-4567, 555.123.4567, +1 555 123 4567.
static NANP_PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+1[\s.-]?)?\(?\b[2-9]\d{2}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap()
});
/// Indian numbers: landline with country code (+91-141-2345678), mobile with
/// `+91`, trunk `0` or bare (98290 12345), and STD landline (0141-2345678).
static IN_PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\+91[\s-]?\d{2,4}[\s-]\d{6,8}\b",
        r"|(?:\+91[\s-]?|\b0|\b)[6-9]\d{4}[\s-]?\d{5}\b",
        r"|\b0\d{2,4}[\s-]\d{6,8}\b",
    ))
    .unwrap()
});
/// A whole string that is one Indian mobile number, optionally prefixed.
static IN_MOBILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\+91[\s-]?|0)?[6-9]\d{4}[\s-]?\d{5}$").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// File extensions that look like TLDs in `logo@2x.png`-style asset names.
const ASSET_SUFFIXES: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp", ".css", ".js"];

const SOCIAL_DOMAINS: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "youtube.com",
    "pinterest.com",
];
/// Share buttons point at the platform, not the business profile.
const SOCIAL_SHARE_MARKERS: &[&str] = &["sharer", "/share", "/intent/", "sharearticle"];

/// Result of scanning one page. Never an error: failures leave the sets empty.
#[derive(Debug, Default)]
pub struct ScannedPage {
    pub contact_info: ContactInfo,
    pub signals: Option<PageSignals>,
    pub error: Option<FetchError>,
}

pub struct ContactExtractor {
    fetcher: Arc<dyn PageFetcher>,
}

impl ContactExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch `url` and extract contacts plus heuristic page signals.
    pub async fn scan(&self, url: &str) -> ScannedPage {
        match self.fetcher.fetch_page(url).await {
            Ok(page) => {
                let doc = Html::parse_document(&page.body);
                let contact_info = extract_contacts(&doc, &page.final_url);
                debug!(
                    "{}: {} emails, {} phones, {} social links",
                    url,
                    contact_info.emails.len(),
                    contact_info.phones.len(),
                    contact_info.social_links.len()
                );
                ScannedPage {
                    contact_info,
                    signals: Some(PageSignals::inspect(&doc, &page.final_url)),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Page fetch failed for {}: {}", url, e);
                ScannedPage {
                    error: Some(e),
                    ..Default::default()
                }
            }
        }
    }
}

/// Emails, phones and social profile links from a parsed page.
///
/// Hrefs are resolved against `page_url`, so protocol-relative and relative
/// social links are recognized.
pub fn extract_contacts(doc: &Html, page_url: &str) -> ContactInfo {
    let base = Url::parse(page_url).ok();
    let text = visible_text(doc);
    let mut emails: BTreeSet<String> = EMAIL_RE
        .find_iter(&text)
        .filter_map(|m| clean_email(m.as_str()))
        .collect();
    let mut phones = find_phones(&text);
    let mut social_links = BTreeSet::new();

    for a in doc.select(&ANCHOR_SEL) {
        let Some(href) = a.value().attr("href").map(str::trim) else {
            continue;
        };
        let lower = href.to_ascii_lowercase();
        if lower.starts_with("mailto:") {
            let addr = href[7..].split('?').next().unwrap_or("");
            if let Some(email) = clean_email(addr) {
                emails.insert(email);
            }
        } else if lower.starts_with("tel:") {
            if let Some(phone) = normalize_phone(&href[4..]) {
                phones.insert(phone);
            }
        } else if let Some(profile) = social_profile(href, base.as_ref()) {
            social_links.insert(profile);
        }
    }

    ContactInfo {
        emails,
        phones,
        social_links,
    }
}

/// Text nodes outside `<script>`, `<style>` and `<noscript>`, space-joined.
fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        if !hidden {
            out.push_str(text.trim());
            out.push(' ');
        }
    }
    out
}

fn clean_email(raw: &str) -> Option<String> {
    let email = raw.trim().trim_end_matches('.').to_lowercase();
    if !EMAIL_RE.is_match(&email) || ASSET_SUFFIXES.iter().any(|s| email.ends_with(s)) {
        return None;
    }
    let (_, domain) = email.rsplit_once('@')?;
    (domain.contains('.') && domain.len() > 3).then_some(email)
}

fn find_phones(text: &str) -> BTreeSet<String> {
    IN_PHONE_RE
        .find_iter(text)
        .chain(NANP_PHONE_RE.find_iter(text))
        .filter_map(|m| normalize_phone(m.as_str()))
        .collect()
}

/// Canonical phone form: optional leading `+` followed by digits only.
///
/// Indian mobiles written bare or with the trunk `0` get the `+91` country
/// code, so every spelling of the same number collapses to one entry.
fn normalize_phone(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(10..=13).contains(&digits.len()) {
        return None;
    }
    if raw.starts_with('+') {
        return Some(format!("+{}", digits));
    }
    if IN_MOBILE_RE.is_match(raw) {
        let national = digits.strip_prefix('0').unwrap_or(&digits);
        return Some(format!("+91{}", national));
    }
    Some(digits)
}

/// Absolute profile URL when `href` points at a business page on a social platform.
fn social_profile(href: &str, base: Option<&Url>) -> Option<String> {
    let url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let on_platform = SOCIAL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)));
    let path = url.path().to_ascii_lowercase();
    let profile =
        on_platform && path.len() > 1 && !SOCIAL_SHARE_MARKERS.iter().any(|m| path.contains(m));
    profile.then(|| url.to_string())
}
