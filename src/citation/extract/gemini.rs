//! Gemini grounding metadata.
//!
//! `groundingChunks` lists sources; `groundingSupports` ties response segments
//! to chunk indices. Chunk URIs are opaque `vertexaisearch` redirects, so the
//! real URL is rebuilt from the chunk title, which Gemini sets to the host.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::citation::{ExtractError, RawCitation};
use crate::provider::Provider;

use super::{parse_section, url_from_title};

/// Host of Gemini's grounding redirect URIs.
const REDIRECT_HOST: &str = "vertexaisearch.cloud.google.com";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    web_search_queries: Vec<String>,
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    grounding_supports: Vec<GroundingSupport>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebChunk>,
}

#[derive(Debug, Deserialize)]
struct WebChunk {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingSupport {
    #[serde(default)]
    segment: Option<Segment>,
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Segment {
    #[serde(default)]
    start_index: Option<usize>,
    #[serde(default)]
    end_index: Option<usize>,
    #[serde(default)]
    text: Option<String>,
}

/// Source resolved from one grounding chunk.
struct ChunkSource {
    uri: String,
    url: String,
    title: Option<String>,
}

pub(super) fn extract(raw: &Value, response_text: &str) -> Result<Vec<RawCitation>, ExtractError> {
    let section = &raw["candidates"][0]["groundingMetadata"];
    if section.is_null() {
        return Ok(Vec::new());
    }
    let metadata: GroundingMetadata =
        parse_section(Provider::Gemini, section, "groundingMetadata")?;

    let query = metadata.web_search_queries.first().cloned();
    let sources: Vec<Option<ChunkSource>> = metadata
        .grounding_chunks
        .iter()
        .map(resolve_chunk)
        .collect();

    let mut citations = Vec::new();
    let mut referenced = HashSet::new();

    for support in &metadata.grounding_supports {
        for &index in &support.grounding_chunk_indices {
            let Some(source) = sources.get(index) else {
                debug!(index, "grounding support references missing chunk");
                continue;
            };
            referenced.insert(index);
            let Some(source) = source else {
                continue;
            };

            let (start_index, end_index, text) = match &support.segment {
                Some(segment) => {
                    let end = segment.end_index;
                    let start = segment.start_index.or(end.map(|_| 0));
                    let text = segment
                        .text
                        .clone()
                        .or_else(|| span_from_bytes(response_text, start, end));
                    (start, end, text)
                }
                None => (None, None, None),
            };

            citations.push(RawCitation {
                web_search_query: query.clone(),
                start_index,
                end_index,
                text,
                ..citation_for(source)
            });
        }
    }

    for (index, source) in sources.iter().enumerate() {
        if referenced.contains(&index) {
            continue;
        }
        if let Some(source) = source {
            citations.push(RawCitation {
                web_search_query: query.clone(),
                ..citation_for(source)
            });
        }
    }

    Ok(citations)
}

fn resolve_chunk(chunk: &GroundingChunk) -> Option<ChunkSource> {
    let web = chunk.web.as_ref()?;
    let uri = web.uri.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
    let title = web.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let url = if is_redirect(uri) {
        match title.and_then(url_from_title) {
            Some(url) => url,
            None => {
                debug!(%uri, "dropping grounding chunk without a title");
                return None;
            }
        }
    } else {
        uri.to_string()
    };

    Some(ChunkSource {
        uri: uri.to_string(),
        url,
        title: title.map(str::to_string),
    })
}

fn is_redirect(uri: &str) -> bool {
    url::Url::parse(uri)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.eq_ignore_ascii_case(REDIRECT_HOST)))
        .unwrap_or(false)
}

fn citation_for(source: &ChunkSource) -> RawCitation {
    let mut metadata = BTreeMap::new();
    if let Some(title) = &source.title {
        metadata.insert("title".to_string(), title.clone());
    }
    RawCitation {
        uri: Some(source.uri.clone()),
        url: Some(source.url.clone()),
        metadata,
        ..RawCitation::default()
    }
}

/// Gemini segment offsets are UTF-8 byte offsets.
fn span_from_bytes(text: &str, start: Option<usize>, end: Option<usize>) -> Option<String> {
    let (start, end) = (start?, end?);
    text.get(start..end)
        .filter(|span| !span.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> Value {
        json!({
            "candidates": [{
                "content": {"parts": [{"text": "Acme makes shoes. Rival sells boots."}]},
                "groundingMetadata": {
                    "webSearchQueries": ["best shoes", "best boots"],
                    "groundingChunks": [
                        {"web": {"uri": "https://vertexaisearch.cloud.google.com/grounding-api-redirect/AAA", "title": "acme.com"}},
                        {"web": {"uri": "https://vertexaisearch.cloud.google.com/grounding-api-redirect/BBB", "title": "rival.com"}},
                        {"web": {"uri": "https://vertexaisearch.cloud.google.com/grounding-api-redirect/CCC"}},
                        {"web": {"uri": "https://reviews.net/boots", "title": "Boot reviews"}}
                    ],
                    "groundingSupports": [
                        {"segment": {"endIndex": 17, "text": "Acme makes shoes."}, "groundingChunkIndices": [0]},
                        {"segment": {"startIndex": 18, "endIndex": 36}, "groundingChunkIndices": [1, 2, 9]}
                    ]
                }
            }]
        })
    }

    #[test]
    fn test_supports_expand_per_chunk_index() {
        let citations = extract(&payload(), "Acme makes shoes. Rival sells boots.").unwrap();
        let urls: Vec<_> = citations.iter().map(|c| c.url.as_deref().unwrap()).collect();
        assert_eq!(urls, vec!["https://acme.com", "https://rival.com", "https://reviews.net/boots"]);
    }

    #[test]
    fn test_missing_start_index_defaults_to_zero() {
        let citations = extract(&payload(), "").unwrap();
        assert_eq!(citations[0].start_index, Some(0));
        assert_eq!(citations[0].end_index, Some(17));
        assert_eq!(citations[0].text.as_deref(), Some("Acme makes shoes."));
    }

    #[test]
    fn test_segment_without_text_is_sliced_from_response() {
        let citations = extract(&payload(), "Acme makes shoes. Rival sells boots.").unwrap();
        assert_eq!(citations[1].text.as_deref(), Some("Rival sells boots."));
    }

    #[test]
    fn test_first_query_attached_and_redirect_kept_as_uri() {
        let citations = extract(&payload(), "").unwrap();
        assert!(citations.iter().all(|c| c.web_search_query.as_deref() == Some("best shoes")));
        assert!(citations[0].uri.as_deref().unwrap().contains("grounding-api-redirect"));
        assert_eq!(citations[0].metadata.get("title").map(String::as_str), Some("acme.com"));
    }

    #[test]
    fn test_unreferenced_chunk_emitted_once_without_span() {
        let citations = extract(&payload(), "").unwrap();
        let review = citations
            .iter()
            .filter(|c| c.url.as_deref() == Some("https://reviews.net/boots"))
            .collect::<Vec<_>>();
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].start_index, None);
        assert_eq!(review[0].text, None);
    }

    #[test]
    fn test_redirect_with_descriptive_title_is_kept() {
        let raw = json!({
            "candidates": [{
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://vertexaisearch.cloud.google.com/grounding-api-redirect/DDD", "title": "Acme Running Shoes"}}
                    ],
                    "groundingSupports": [
                        {"segment": {"startIndex": 0, "endIndex": 4, "text": "Acme"}, "groundingChunkIndices": [0]}
                    ]
                }
            }]
        });
        let citations = extract(&raw, "Acme").unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].url.as_deref(), Some("https://Acme Running Shoes"));
        assert_eq!(citations[0].text.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_no_grounding_metadata_is_empty() {
        let raw = json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]});
        assert!(extract(&raw, "hi").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        let raw = json!({"candidates": [{"groundingMetadata": {"groundingSupports": {"a": 1}}}]});
        assert!(matches!(
            extract(&raw, "").unwrap_err(),
            ExtractError::MalformedCitationSource { provider: Provider::Gemini, .. }
        ));
    }
}
