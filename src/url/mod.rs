//! URL handling: normalization, scope checks and host exclusion

mod filter;
mod normalize;

pub use filter::{matches_wildcard, HostFilter};
pub use normalize::{normalize_str, normalize_url};

use url::Url;

/// Returns true for `http` and `https` URLs
pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Returns true if both URLs point at the same host and explicit port
///
/// The scheme is ignored, so an http page linking to its https twin stays
/// in scope.
pub fn same_host(a: &Url, b: &Url) -> bool {
    match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y) && a.port() == b.port(),
        _ => false,
    }
}
