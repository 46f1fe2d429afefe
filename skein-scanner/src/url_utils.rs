//! URL resolution and normalization shared by the crawler, the policy engine and the cache.

use crate::error::{Result, ScanError};
use url::Url;

/// Parse and normalize an absolute URL.
///
/// Only `http` and `https` URLs are accepted. The fragment is dropped, query
/// pairs are sorted, an empty query is removed and a trailing slash is
/// stripped from any path other than the root. Scheme and host casing and
/// default ports are handled by [`Url`] itself.
pub fn normalize_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;
    normalize_parsed(parsed)
}

fn normalize_parsed(mut url: Url) -> Result<String> {
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ScanError::InvalidUrl(format!(
            "unsupported scheme '{}' in {}",
            url.scheme(),
            url
        )));
    }
    if url.host_str().is_none() {
        return Err(ScanError::InvalidUrl(format!("missing host in {}", url)));
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    Ok(url.to_string())
}

/// Resolve an href found on `base` into a normalized absolute URL.
///
/// Returns `None` for non-navigational links and anything that does not
/// resolve to an http(s) URL.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let resolved = base_url.join(href).ok()?;
    normalize_parsed(resolved).ok()
}

/// Lowercased host of a URL, if it has one.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// True when `host` is `domain` or one of its subdomains.
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches("*.");
    host == domain || host.ends_with(&format!(".{}", domain))
}

pub fn is_same_domain(url: &str, base_domain: &str) -> bool {
    host_of(url)
        .map(|host| host_matches_domain(&host, base_domain))
        .unwrap_or(false)
}

/// Path component of a URL, `/` for the root.
pub fn url_path(url: &str) -> String {
    Url::parse(url)
        .map(|u| {
            let path = u.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        })
        .unwrap_or_else(|_| "/".to_string())
}

/// Approximate registrable domain: the last two labels of the host.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 || host.parse::<std::net::IpAddr>().is_ok() {
        host.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}
