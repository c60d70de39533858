use url::Url;

/// Query parameters that only track campaigns or clicks.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "yclid", "dclid", "mc_cid", "mc_eid", "_ga", "_gl", "ref",
    "igshid",
];

/// Aggregators and social networks; never a business's own site.
const BLOCKED_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "instagram.com",
    "linkedin.com",
    "reddit.com",
    "github.com",
    "justdial.com",
    "quora.com",
];

const BLOCKED_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".csv",
];

const BLOCKED_PATH_PARTS: &[&str] = &["/careers", "/job"];

/// Normalize a URL so equivalent addresses compare equal.
///
/// Upgrades `http` to `https`, lowercases the host, drops userinfo, default
/// ports, fragments, tracking parameters and trailing slashes. Returns `None`
/// for anything that is not an absolute http(s) URL with a host.
pub fn canonicalize(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", raw)).ok()?,
        Err(_) => return None,
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return None;
    }

    let mut out = format!("https://{}", host);
    // `port()` already omits the scheme's default; 443 is implied by the upgrade.
    if let Some(port) = parsed.port().filter(|p| *p != 443) {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    Some(out)
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Whether a search result URL should be dropped before enrichment.
pub fn is_excluded(url: &str) -> bool {
    let lower = url.to_lowercase();
    let Ok(parsed) = Url::parse(&lower) else {
        return true;
    };
    let host = parsed.host_str().unwrap_or("");
    if BLOCKED_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    {
        return true;
    }
    let path = parsed.path().trim_end_matches('/');
    BLOCKED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        || BLOCKED_PATH_PARTS.iter().any(|p| path.contains(p))
}

/// Host without a leading `www.`.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}
