//! Anthropic text-block citations from the web search tool.
//!
//! Each `text` block may carry `web_search_result_location` citations. The
//! block's position in the concatenated response text becomes the span.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::citation::{ExtractError, RawCitation};
use crate::provider::Provider;

use super::parse_section;

const WEB_SEARCH_CITATION: &str = "web_search_result_location";

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    citations: Option<Vec<BlockCitation>>,
    #[serde(default)]
    input: Option<ToolInput>,
}

#[derive(Debug, Deserialize)]
struct BlockCitation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    cited_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolInput {
    #[serde(default)]
    query: Option<String>,
}

pub(super) fn extract(raw: &Value) -> Result<Vec<RawCitation>, ExtractError> {
    let section = &raw["content"];
    if section.is_null() {
        return Ok(Vec::new());
    }
    let blocks: Vec<ContentBlock> = parse_section(Provider::Anthropic, section, "content")?;

    let mut citations = Vec::new();
    let mut offset = 0usize;
    let mut query: Option<String> = None;

    for block in blocks {
        match block.kind.as_str() {
            "server_tool_use" => {
                if let Some(next) = block.input.and_then(|input| input.query) {
                    query = Some(next);
                }
            }
            "text" => {
                let text = block.text.unwrap_or_default();
                let len = text.chars().count();
                for cited in block.citations.unwrap_or_default() {
                    if cited.kind != WEB_SEARCH_CITATION {
                        continue;
                    }
                    let mut metadata = BTreeMap::new();
                    if let Some(title) = cited.title.filter(|t| !t.trim().is_empty()) {
                        metadata.insert("title".to_string(), title);
                    }
                    if let Some(cited_text) = cited.cited_text.filter(|t| !t.trim().is_empty()) {
                        metadata.insert("cited_text".to_string(), cited_text);
                    }
                    citations.push(RawCitation {
                        web_search_query: query.clone(),
                        url: cited.url,
                        start_index: Some(offset),
                        end_index: Some(offset + len),
                        text: (!text.trim().is_empty()).then(|| text.clone()),
                        metadata,
                        ..RawCitation::default()
                    });
                }
                offset += len;
            }
            _ => {}
        }
    }

    Ok(citations)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> Value {
        json!({
            "content": [
                {"type": "text", "text": "Let me search. "},
                {"type": "server_tool_use", "id": "s1", "name": "web_search", "input": {"query": "trail shoes 2025"}},
                {"type": "web_search_tool_result", "tool_use_id": "s1", "content": [
                    {"type": "web_search_result", "url": "https://acme.com/trail", "title": "Acme"}
                ]},
                {"type": "text", "text": "Acme Trail is light.", "citations": [
                    {"type": "web_search_result_location", "url": "https://acme.com/trail",
                     "title": "Acme Trail", "cited_text": "Weighs 200g", "encrypted_index": "xyz"},
                    {"type": "char_location", "document_index": 0}
                ]},
                {"type": "text", "text": " Rival is cheap.", "citations": [
                    {"type": "web_search_result_location", "url": "https://rival.com/", "title": ""}
                ]}
            ]
        })
    }

    #[test]
    fn test_spans_follow_block_offsets() {
        let citations = extract(&payload()).unwrap();
        assert_eq!(citations.len(), 2);

        assert_eq!(citations[0].url.as_deref(), Some("https://acme.com/trail"));
        assert_eq!(citations[0].start_index, Some(15));
        assert_eq!(citations[0].end_index, Some(35));
        assert_eq!(citations[0].text.as_deref(), Some("Acme Trail is light."));
        assert_eq!(
            citations[0].metadata.get("cited_text").map(String::as_str),
            Some("Weighs 200g")
        );

        assert_eq!(citations[1].start_index, Some(35));
        assert_eq!(citations[1].end_index, Some(51));
        assert!(citations[1].metadata.get("title").is_none());
    }

    #[test]
    fn test_query_from_preceding_tool_use() {
        let citations = extract(&payload()).unwrap();
        assert!(citations
            .iter()
            .all(|c| c.web_search_query.as_deref() == Some("trail shoes 2025")));
    }

    #[test]
    fn test_no_content_is_empty() {
        assert!(extract(&json!({"id": "msg"})).unwrap().is_empty());
    }

    #[test]
    fn test_content_not_a_list_is_malformed() {
        assert!(extract(&json!({"content": 5})).is_err());
    }
}
