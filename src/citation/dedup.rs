//! Merges raw citations that point at the same normalized URI.

use std::collections::HashMap;

use tracing::debug;

use super::normalize::normalize_uri;
use super::{DeduplicatedCitation, RawCitation};

/// Collapses `citations` into one entry per normalized URI, in first-seen order.
///
/// Citations whose link normalizes to an empty key are dropped. The sum of
/// `occurrence_count` equals the number of citations that had a non-empty key.
#[must_use]
pub fn deduplicate(citations: Vec<RawCitation>) -> Vec<DeduplicatedCitation> {
    let input_len = citations.len();
    let mut merged: Vec<DeduplicatedCitation> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for citation in citations {
        let Some(link) = citation.link() else {
            continue;
        };
        let key = normalize_uri(link);
        if key.is_empty() {
            continue;
        }

        let position = match positions.get(&key) {
            Some(&position) => position,
            None => {
                let url = link.to_string();
                positions.insert(key.clone(), merged.len());
                merged.push(DeduplicatedCitation {
                    uri: key,
                    url,
                    domain: None,
                    text_fragments: Vec::new(),
                    start_indices: Vec::new(),
                    end_indices: Vec::new(),
                    occurrence_count: 0,
                    metadata: Default::default(),
                });
                merged.len() - 1
            }
        };

        merge_into(&mut merged[position], citation);
    }

    debug!(input = input_len, unique = merged.len(), "deduplicated citations");
    merged
}

fn merge_into(entry: &mut DeduplicatedCitation, citation: RawCitation) {
    entry.occurrence_count += 1;

    if entry.domain.is_none()
        && let Some(domain) = citation.domain.filter(|d| !d.trim().is_empty())
    {
        entry.domain = Some(domain);
    }

    if let Some(text) = citation.text.filter(|t| !t.trim().is_empty())
        && entry.text_fragments.last() != Some(&text)
    {
        entry.text_fragments.push(text);
    }

    if let (Some(start), Some(end)) = (citation.start_index, citation.end_index) {
        entry.start_indices.push(start);
        entry.end_indices.push(end);
    }

    entry.metadata.extend(citation.metadata);
}
