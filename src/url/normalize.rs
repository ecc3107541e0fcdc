use crate::UrlError;
use url::Url;

/// Query parameters that only track the visitor and never change the page
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_eid", "msclkid"];

/// Normalizes a URL before it is archived
///
/// # Normalization Steps
///
/// 1. Reject anything that is not HTTP(S) or has no host
/// 2. Lowercase the host (the scheme and `www.` prefix are kept as-is)
/// 3. Remove the fragment
/// 4. Remove tracking query parameters (`utm_*`, `fbclid`, ...)
/// 5. Sort the remaining query parameters, dropping an empty query
///
/// Dot segments are already resolved by the `url` parser.
///
/// # Examples
///
/// ```
/// use sumi_harvest::url::normalize_url;
/// use url::Url;
///
/// let url = Url::parse("https://EXAMPLE.com/a/../b?z=1&utm_source=x&a=2#top").unwrap();
/// assert_eq!(normalize_url(&url).unwrap().as_str(), "https://example.com/b?a=2&z=1");
/// ```
pub fn normalize_url(url: &Url) -> Result<Url, UrlError> {
    if !super::is_http(url) {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    let host = url.host_str().ok_or(UrlError::MissingHost)?;
    let mut normalized = url.clone();

    let lowered = host.to_lowercase();
    if lowered != host {
        normalized
            .set_host(Some(&lowered))
            .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;
    }

    normalized.set_fragment(None);

    if url.query().is_some() {
        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        if params.is_empty() {
            normalized.set_query(None);
        } else {
            normalized.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(normalized)
}

/// Parses and normalizes a URL string
pub fn normalize_str(url_str: &str) -> Result<Url, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    normalize_url(&url)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
