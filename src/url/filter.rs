use url::Url;

/// Set of host patterns the crawl never fetches
///
/// A pattern is either an exact host (`ads.example.com`) or a wildcard
/// (`*.example.com`) that matches the bare domain and every subdomain.
#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    patterns: Vec<String>,
}

impl HostFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Returns the pattern excluding `url`, if any
    pub fn excluded_by(&self, url: &Url) -> Option<&str> {
        let host = url.host_str()?.to_lowercase();
        self.patterns
            .iter()
            .find(|pattern| matches_wildcard(pattern, &host))
            .map(String::as_str)
    }

    pub fn is_excluded(&self, url: &Url) -> bool {
        self.excluded_by(url).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Checks if a lowercase host matches a pattern
///
/// ```
/// use sumi_harvest::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "cdn.static.example.com"));
/// assert!(!matches_wildcard("*.example.com", "notexample.com"));
/// assert!(!matches_wildcard("example.com", "www.example.com"));
/// ```
pub fn matches_wildcard(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => host == pattern,
    }
}
