//! URI and domain normalization shared by extraction, dedup and classification.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Leading `scheme://` of an already lowercased string.
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"^[a-z][a-z0-9+.\-]*://"));

/// Trailing `:port` on a host.
static PORT_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r":\d*$"));

/// Domains that show up in payloads as vocabulary or placeholder references,
/// never as real sources.
const DENYLISTED_DOMAINS: &[&str] = &[
    "schema.org",
    "w3.org",
    "purl.org",
    "xmlns.com",
    "ogp.me",
    "example.com",
    "example.org",
    "example.net",
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
];

/// Normalizes a URI into a dedup key.
///
/// Lowercases once, then strips fragment, scheme, leading `www.` and trailing
/// slashes until nothing changes. Every step only shortens the string, so the
/// loop terminates and `normalize_uri(normalize_uri(x)) == normalize_uri(x)`.
///
/// # Examples
///
/// ```
/// use citetrack_core::citation::normalize_uri;
///
/// assert_eq!(normalize_uri("https://WWW.Example.com/path/"), "example.com/path");
/// assert_eq!(normalize_uri("http://www.acme.com/a#section"), "acme.com/a");
/// ```
#[must_use]
pub fn normalize_uri(uri: &str) -> String {
    let mut current = uri.trim().to_lowercase();
    loop {
        let mut next = match current.find('#') {
            Some(fragment_start) => current[..fragment_start].to_string(),
            None => current.clone(),
        };
        next = SCHEME_RE.replace(&next, "").into_owned();
        if let Some(stripped) = next.strip_prefix("www.") {
            next = stripped.to_string();
        }
        let next = next.trim_end_matches('/').trim().to_string();

        if next == current {
            return next;
        }
        current = next;
    }
}

/// Normalizes a domain for brand/competitor comparison.
///
/// Accepts bare hosts or full URLs: lowercases, strips scheme, `www.`, any
/// path/query/fragment, port and trailing dot.
///
/// # Examples
///
/// ```
/// use citetrack_core::citation::normalize_domain;
///
/// assert_eq!(normalize_domain("https://WWW.Acme.com:443/pricing"), "acme.com");
/// assert_eq!(normalize_domain("acme.com."), "acme.com");
/// ```
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.trim().to_lowercase();
    let without_scheme = SCHEME_RE.replace(&lowered, "");
    let host = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = PORT_RE.replace(host, "");
    host.trim_end_matches('.').to_string()
}

/// Extracts the `www.`-less host of a URL.
///
/// Uses a full URL parse when possible and falls back to taking everything
/// before the first `/` once any scheme is removed.
#[must_use]
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed_host = Url::parse(url.trim())
        .ok()
        .and_then(|parsed| parsed.host_str().map(normalize_domain));
    let domain = parsed_host.unwrap_or_else(|| normalize_domain(url));
    if domain.is_empty() || domain.chars().any(char::is_whitespace) {
        return None;
    }
    Some(domain)
}

/// Returns `true` for vocabulary/placeholder hosts and their subdomains.
#[must_use]
pub fn is_denylisted_domain(domain: &str) -> bool {
    let domain = normalize_domain(domain);
    DENYLISTED_DOMAINS.iter().any(|denied| {
        domain == *denied
            || domain
                .strip_suffix(denied)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_uri_equivalences() {
        let expected = "example.com/path";
        for input in [
            "https://WWW.Example.com/path/",
            "http://example.com/path",
            "example.com/path#top",
            "  www.example.com/path//  ",
            "HTTPS://www.www.example.com/path/#x",
        ] {
            assert_eq!(normalize_uri(input), expected, "input: {input}");
        }
    }

    #[test]
    fn test_normalize_uri_is_idempotent() {
        for input in [
            "https://www.acme.com/a/b/?q=1#frag",
            "www.https://acme.com/",
            "http://http://www.acme.com///",
            "/",
            "",
            "#only-fragment",
            "ftp://files.acme.com/x",
            "Ünïcode.example/ПУТЬ/",
        ] {
            let once = normalize_uri(input);
            assert_eq!(normalize_uri(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_normalize_uri_keeps_query() {
        assert_eq!(normalize_uri("https://acme.com/search?q=Shoes"), "acme.com/search?q=shoes");
    }

    #[test]
    fn test_normalize_uri_degenerate_inputs_are_empty() {
        assert_eq!(normalize_uri("https://"), "");
        assert_eq!(normalize_uri("#frag"), "");
        assert_eq!(normalize_uri("   "), "");
    }

    #[test]
    fn test_normalize_domain_strips_everything_but_host() {
        assert_eq!(normalize_domain("https://WWW.Acme.com:8443/p?q#f"), "acme.com");
        assert_eq!(normalize_domain("blog.acme.com"), "blog.acme.com");
        assert_eq!(normalize_domain("www.acme.com."), "acme.com");
        assert_eq!(normalize_domain(""), "");
    }

    #[test]
    fn test_extract_domain_from_url_and_bare_host() {
        assert_eq!(extract_domain("https://www.acme.com/shoes").as_deref(), Some("acme.com"));
        assert_eq!(extract_domain("acme.com/shoes").as_deref(), Some("acme.com"));
        assert_eq!(extract_domain("http://localhost:8080/x").as_deref(), Some("localhost"));
        assert_eq!(extract_domain("  "), None);
        assert_eq!(extract_domain("not a url"), None);
    }

    #[test]
    fn test_denylist_matches_subdomains_only_on_label_boundary() {
        assert!(is_denylisted_domain("schema.org"));
        assert!(is_denylisted_domain("www.w3.org"));
        assert!(is_denylisted_domain("docs.example.com"));
        assert!(is_denylisted_domain("127.0.0.1"));
        assert!(!is_denylisted_domain("myschema.org"));
        assert!(!is_denylisted_domain("acme.com"));
    }
}
