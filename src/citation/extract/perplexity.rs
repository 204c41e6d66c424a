//! Perplexity sources and inline `[n]` markers.
//!
//! Sources come from `search_results` when present, else the older
//! `citations` list of bare URLs. A marker `[n]` cites source `n` (1-based)
//! for the sentence it follows.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::citation::normalize::compile_static_regex;
use crate::citation::{ExtractError, RawCitation};
use crate::provider::Provider;

use super::{char_offset, parse_section};

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\[(\d{1,3})\]"));

/// Whitespace and earlier markers directly before a marker.
static TRAILING_MARKERS_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?:\s*\[\d{1,3}\])*\s*$"));

#[derive(Debug, Deserialize)]
struct SearchResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

struct Source {
    url: String,
    metadata: BTreeMap<String, String>,
}

pub(super) fn extract(raw: &Value, response_text: &str) -> Result<Vec<RawCitation>, ExtractError> {
    let sources = sources(raw)?;
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    let mut citations = Vec::new();
    let mut referenced = HashSet::new();

    for marker in MARKER_RE.captures_iter(response_text) {
        let (Some(whole), Some(number)) = (marker.get(0), marker.get(1)) else {
            continue;
        };
        let Some(index) = number
            .as_str()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
        else {
            continue;
        };
        let Some(source) = sources.get(index) else {
            continue;
        };
        referenced.insert(index);

        let span = preceding_sentence(response_text, whole.start());
        citations.push(RawCitation {
            url: Some(source.url.clone()),
            start_index: span.map(|(start, _, _)| start),
            end_index: span.map(|(_, end, _)| end),
            text: span.map(|(_, _, text)| text.to_string()),
            metadata: source.metadata.clone(),
            ..RawCitation::default()
        });
    }

    for (index, source) in sources.iter().enumerate() {
        if !referenced.contains(&index) {
            citations.push(RawCitation {
                url: Some(source.url.clone()),
                metadata: source.metadata.clone(),
                ..RawCitation::default()
            });
        }
    }

    Ok(citations)
}

fn sources(raw: &Value) -> Result<Vec<Source>, ExtractError> {
    let results = &raw["search_results"];
    if results.as_array().is_some_and(|list| !list.is_empty()) {
        let results: Vec<SearchResult> =
            parse_section(Provider::Perplexity, results, "search_results")?;
        return Ok(results
            .into_iter()
            .map(|result| {
                let mut metadata = BTreeMap::new();
                if let Some(title) = result.title.filter(|t| !t.trim().is_empty()) {
                    metadata.insert("title".to_string(), title);
                }
                if let Some(date) = result.date.filter(|d| !d.trim().is_empty()) {
                    metadata.insert("date".to_string(), date);
                }
                Source {
                    url: result.url,
                    metadata,
                }
            })
            .collect());
    }

    let urls = &raw["citations"];
    if urls.is_null() {
        return Ok(Vec::new());
    }
    let urls: Vec<String> = parse_section(Provider::Perplexity, urls, "citations")?;
    Ok(urls
        .into_iter()
        .map(|url| Source {
            url,
            metadata: BTreeMap::new(),
        })
        .collect())
}

/// Finds the sentence ending right before the marker at `marker_start` (bytes).
///
/// Returns character offsets `(start, end)` and the sentence text.
fn preceding_sentence(text: &str, marker_start: usize) -> Option<(usize, usize, &str)> {
    let before = text.get(..marker_start)?;
    let trimmed_len = TRAILING_MARKERS_RE
        .find(before)
        .map_or(before.len(), |m| m.start());
    let sentence_region = &before[..trimmed_len];

    // Ignore the region's own closing punctuation when looking for the boundary.
    let search_end = sentence_region
        .char_indices()
        .next_back()
        .map_or(0, |(i, _)| i);
    let start = sentence_region[..search_end]
        .rfind(['.', '!', '?', '\n'])
        .map_or(0, |i| i + 1);
    let leading_ws = sentence_region[start..].len() - sentence_region[start..].trim_start().len();
    let start = start + leading_ws;

    let sentence = &sentence_region[start..];
    if sentence.is_empty() {
        return None;
    }
    Some((
        char_offset(text, start),
        char_offset(text, trimmed_len),
        sentence,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_markers_map_to_preceding_sentence() {
        let text = "Acme is light [1]. Rival is cheap.[2][1] Nobody else.";
        let raw = json!({
            "search_results": [
                {"title": "Acme", "url": "https://acme.com/", "date": "2025-03-01"},
                {"title": "Rival", "url": "https://rival.com/"},
                {"title": "Unused", "url": "https://other.org/"}
            ]
        });
        let citations = extract(&raw, text).unwrap();

        assert_eq!(citations.len(), 4);
        assert_eq!(citations[0].url.as_deref(), Some("https://acme.com/"));
        assert_eq!(citations[0].text.as_deref(), Some("Acme is light"));
        assert_eq!(citations[0].start_index, Some(0));
        assert_eq!(citations[0].end_index, Some(13));
        assert_eq!(citations[0].metadata.get("date").map(String::as_str), Some("2025-03-01"));

        assert_eq!(citations[1].url.as_deref(), Some("https://rival.com/"));
        assert_eq!(citations[1].text.as_deref(), Some("Rival is cheap."));
        assert_eq!(citations[2].url.as_deref(), Some("https://acme.com/"));
        assert_eq!(citations[2].text.as_deref(), Some("Rival is cheap."));

        assert_eq!(citations[3].url.as_deref(), Some("https://other.org/"));
        assert_eq!(citations[3].start_index, None);
    }

    #[test]
    fn test_falls_back_to_citations_list() {
        let raw = json!({"citations": ["https://acme.com/a", "https://rival.com/b"]});
        let citations = extract(&raw, "Acme wins [2].").unwrap();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url.as_deref(), Some("https://rival.com/b"));
        assert_eq!(citations[1].url.as_deref(), Some("https://acme.com/a"));
    }

    #[test]
    fn test_out_of_range_marker_is_ignored() {
        let raw = json!({"citations": ["https://acme.com/a"]});
        let citations = extract(&raw, "Claim [0]. Other [7].").unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].start_index, None);
    }

    #[test]
    fn test_offsets_are_characters() {
        let raw = json!({"citations": ["https://acme.com/a"]});
        let citations = extract(&raw, "Café first. Zürich second [1]").unwrap();
        assert_eq!(citations[0].text.as_deref(), Some("Zürich second"));
        assert_eq!(citations[0].start_index, Some(12));
        assert_eq!(citations[0].end_index, Some(25));
    }

    #[test]
    fn test_no_sources_is_empty() {
        assert!(extract(&json!({"choices": []}), "text [1]").unwrap().is_empty());
    }

    #[test]
    fn test_citations_wrong_type_is_malformed() {
        assert!(extract(&json!({"citations": [1, 2]}), "").is_err());
    }
}
