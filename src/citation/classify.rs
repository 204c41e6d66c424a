//! Brand / competitor / other classification by cited domain.

use super::normalize::{extract_domain, normalize_domain};
use super::{
    Classification, ClassificationContext, ClassifiedCitation, DeduplicatedCitation,
};

/// Classifies one citation against the project's registry.
///
/// The citation's own domain is used when present, else one derived from its
/// URL. Brand wins over competitors; among competitors the first registered
/// match wins. Always returns a classification.
#[must_use]
pub fn classify(citation: &DeduplicatedCitation, context: &ClassificationContext) -> Classification {
    let domain = citation
        .domain
        .as_deref()
        .map(normalize_domain)
        .filter(|domain| !domain.is_empty())
        .or_else(|| extract_domain(&citation.url));

    let Some(domain) = domain else {
        return Classification::Other;
    };

    if context.brand_domain.as_deref() == Some(domain.as_str()) {
        return Classification::Brand;
    }

    context
        .competitors
        .iter()
        .find(|competitor| competitor.domain == domain)
        .map_or(Classification::Other, |competitor| Classification::Competitor {
            competitor_id: competitor.id.clone(),
        })
}

/// Classifies a batch, preserving order.
#[must_use]
pub fn classify_all(
    citations: Vec<DeduplicatedCitation>,
    context: &ClassificationContext,
) -> Vec<ClassifiedCitation> {
    citations
        .into_iter()
        .map(|citation| {
            let classification = classify(&citation, context);
            ClassifiedCitation {
                citation,
                classification,
            }
        })
        .collect()
}
