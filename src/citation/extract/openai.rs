//! OpenAI `url_citation` annotations on the first choice's message.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::citation::{ExtractError, RawCitation};
use crate::provider::Provider;

use super::{parse_section, slice_chars};

/// Tracking parameter OpenAI appends to every cited URL.
const TRACKING_PARAM: &str = "utm_source";

#[derive(Debug, Deserialize)]
struct Annotation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url_citation: Option<UrlCitation>,
}

#[derive(Debug, Deserialize)]
struct UrlCitation {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    start_index: Option<usize>,
    #[serde(default)]
    end_index: Option<usize>,
}

pub(super) fn extract(raw: &Value, response_text: &str) -> Result<Vec<RawCitation>, ExtractError> {
    let section = &raw["choices"][0]["message"]["annotations"];
    if section.is_null() {
        return Ok(Vec::new());
    }
    let annotations: Vec<Annotation> = parse_section(Provider::OpenAi, section, "annotations")?;

    let citations = annotations
        .into_iter()
        .filter(|annotation| annotation.kind == "url_citation")
        .filter_map(|annotation| annotation.url_citation)
        .map(|cited| {
            let text = match (cited.start_index, cited.end_index) {
                (Some(start), Some(end)) => slice_chars(response_text, start, end),
                _ => None,
            };
            let mut metadata = BTreeMap::new();
            if let Some(title) = cited.title.filter(|t| !t.trim().is_empty()) {
                metadata.insert("title".to_string(), title);
            }
            RawCitation {
                url: Some(strip_tracking(&cited.url)),
                start_index: cited.start_index,
                end_index: cited.end_index,
                text,
                metadata,
                ..RawCitation::default()
            }
        })
        .collect();

    Ok(citations)
}

/// Removes the `utm_source` query parameter, keeping everything else.
fn strip_tracking(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.query_pairs().any(|(key, _)| key == TRACKING_PARAM) {
        return url.to_string();
    }

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != TRACKING_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(kept);
    }
    parsed.to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    const TEXT: &str = "Acme Trail is light. Rival Road is cheap.";

    fn payload() -> Value {
        json!({
            "choices": [{
                "message": {
                    "content": TEXT,
                    "annotations": [
                        {"type": "url_citation", "url_citation": {
                            "url": "https://acme.com/trail?utm_source=openai",
                            "title": "Acme Trail", "start_index": 0, "end_index": 20}},
                        {"type": "file_citation", "file_citation": {"file_id": "f"}},
                        {"type": "url_citation", "url_citation": {
                            "url": "https://rival.com/road?ref=x&utm_source=openai",
                            "start_index": 21, "end_index": 41}}
                    ]
                }
            }]
        })
    }

    #[test]
    fn test_extracts_url_citations_with_spans() {
        let citations = extract(&payload(), TEXT).unwrap();
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].url.as_deref(), Some("https://acme.com/trail"));
        assert_eq!(citations[0].text.as_deref(), Some("Acme Trail is light."));
        assert_eq!(citations[0].metadata.get("title").map(String::as_str), Some("Acme Trail"));
        assert_eq!(citations[1].url.as_deref(), Some("https://rival.com/road?ref=x"));
        assert_eq!(citations[1].text.as_deref(), Some("Rival Road is cheap."));
        assert!(citations[1].metadata.is_empty());
    }

    #[test]
    fn test_no_annotations_is_empty() {
        let raw = json!({"choices": [{"message": {"content": "plain"}}]});
        assert!(extract(&raw, "plain").unwrap().is_empty());
    }

    #[test]
    fn test_annotations_not_a_list_is_malformed() {
        let raw = json!({"choices": [{"message": {"annotations": "x"}}]});
        assert!(extract(&raw, "").is_err());
    }

    #[test]
    fn test_strip_tracking_leaves_other_urls_alone() {
        assert_eq!(strip_tracking("not a url"), "not a url");
        assert_eq!(strip_tracking("https://acme.com/?a=1"), "https://acme.com/?a=1");
    }
}
