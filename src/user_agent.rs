//! User-Agent string sent with every provider request.

/// Project URL for User-Agent identification (RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/fierce/citetrack";

/// Default User-Agent for provider API calls.
#[must_use]
pub(crate) fn default_provider_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("citetrack/{version} (citation-monitor; +{PROJECT_UA_URL})")
}
