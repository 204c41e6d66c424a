//! Per-provider citation extraction.
//!
//! Dispatch is on [`Provider`], never on probing the JSON for a shape. Each
//! extractor produces candidate citations; [`finalize_citation`] then applies
//! the rules every provider shares.

mod anthropic;
mod gemini;
mod openai;
mod perplexity;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::provider::Provider;

use super::normalize::{extract_domain, is_denylisted_domain};
use super::{ExtractError, RawCitation};

/// Extracts raw citations from a provider response body.
///
/// A malformed citation source is logged and yields an empty list; it never
/// fails the completion.
#[must_use]
pub fn extract_citations(
    provider: Provider,
    raw: &Value,
    response_text: &str,
) -> Vec<RawCitation> {
    let extracted = match provider {
        Provider::OpenAi => openai::extract(raw, response_text),
        Provider::Anthropic => anthropic::extract(raw),
        Provider::Gemini => gemini::extract(raw, response_text),
        Provider::Perplexity => perplexity::extract(raw, response_text),
    };

    match extracted {
        Ok(candidates) => {
            let total = candidates.len();
            let citations: Vec<RawCitation> =
                candidates.into_iter().filter_map(finalize_citation).collect();
            debug!(%provider, total, kept = citations.len(), "extracted citations");
            citations
        }
        Err(error) => {
            warn!(%provider, error = %error, "ignoring malformed citation source");
            Vec::new()
        }
    }
}

/// Deserializes a sub-tree of the payload, mapping failure to a malformed-source error.
fn parse_section<'a, T: Deserialize<'a>>(
    provider: Provider,
    section: &'a Value,
    what: &str,
) -> Result<T, ExtractError> {
    T::deserialize(section).map_err(|e| ExtractError::malformed(provider, format!("{what}: {e}")))
}

/// Applies the rules shared by every provider.
///
/// Drops citations with no link or a denylisted domain, fills in the domain,
/// and discards an inverted index pair.
fn finalize_citation(mut citation: RawCitation) -> Option<RawCitation> {
    let link = citation.link()?.to_string();

    let domain = citation
        .domain
        .as_deref()
        .and_then(extract_domain)
        .or_else(|| extract_domain(&link));
    if let Some(domain) = &domain
        && is_denylisted_domain(domain)
    {
        debug!(%domain, "dropping denylisted citation domain");
        return None;
    }
    citation.domain = domain;

    if let (Some(start), Some(end)) = (citation.start_index, citation.end_index)
        && start > end
    {
        citation.start_index = None;
        citation.end_index = None;
    }

    Some(citation)
}

/// Returns the characters of `text` in `[start, end)`, or `None` for an empty
/// or out-of-range span. `end` is clamped to the text length.
fn slice_chars(text: &str, start: usize, end: usize) -> Option<String> {
    if start >= end {
        return None;
    }
    let slice: String = text.chars().skip(start).take(end - start).collect();
    if slice.is_empty() { None } else { Some(slice) }
}

/// Builds a URL from a redirect chunk's title, which Gemini sets to the
/// source host. Only an empty title yields `None`; titles that are not hosts
/// still produce a URL and simply get no domain later.
fn url_from_title(title: &str) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        return None;
    }
    if title.starts_with("http://") || title.starts_with("https://") {
        return Some(title.to_string());
    }
    Some(format!("https://{title}"))
}

/// Counts characters in `text[..byte_offset]`.
fn char_offset(text: &str, byte_offset: usize) -> usize {
    text.get(..byte_offset).map_or(0, |prefix| prefix.chars().count())
}
