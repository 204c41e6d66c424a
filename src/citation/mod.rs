//! Citation normalization: extract, deduplicate, classify.
//!
//! Every provider embeds provenance differently. This module turns those
//! shapes into one record type and decides, per cited domain, whether it is
//! the tracked brand, a registered competitor or something else.
//!
//! # Architecture
//!
//! - [`extract_citations`] - Per-provider extraction into [`RawCitation`]s
//! - [`deduplicate`] - Merges raw citations by [`normalize_uri`] key
//! - [`classify`] / [`classify_all`] - Brand/competitor/other decision
//!
//! All functions here are pure and synchronous.

mod classify;
mod dedup;
mod error;
mod extract;
mod normalize;

pub use classify::{classify, classify_all};
pub use dedup::deduplicate;
pub use error::ExtractError;
pub use extract::extract_citations;
pub use normalize::{extract_domain, is_denylisted_domain, normalize_domain, normalize_uri};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One citation as found in a provider payload, before merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCitation {
    /// Search query the provider ran to find this source.
    pub web_search_query: Option<String>,
    /// Provider-side identifier (may be an opaque redirect).
    pub uri: Option<String>,
    /// Resolved, human-facing URL.
    pub url: Option<String>,
    /// Host of the cited page, `www.` stripped.
    pub domain: Option<String>,
    /// Character offset where the supported span begins.
    pub start_index: Option<usize>,
    /// Character offset where the supported span ends.
    pub end_index: Option<usize>,
    /// Text of the supported span.
    pub text: Option<String>,
    /// Free-form extras such as `title`.
    pub metadata: BTreeMap<String, String>,
}

impl RawCitation {
    /// Creates a citation pointing at `url`.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// The value used for dedup keys: `url`, else `uri`, ignoring blanks.
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        non_blank(self.url.as_deref()).or_else(|| non_blank(self.uri.as_deref()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// All raw citations sharing one normalized URI, merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicatedCitation {
    /// Normalized URI, the merge key.
    pub uri: String,
    /// First occurrence's `url`, else its `uri`.
    pub url: String,
    /// First non-empty domain seen in the group.
    pub domain: Option<String>,
    /// Distinct consecutive span texts, in encounter order.
    pub text_fragments: Vec<String>,
    /// Span starts, paired index-for-index with `end_indices`.
    pub start_indices: Vec<usize>,
    /// Span ends, paired index-for-index with `start_indices`.
    pub end_indices: Vec<usize>,
    /// How many raw citations merged into this entry.
    pub occurrence_count: u32,
    /// Merged metadata; later values win.
    pub metadata: BTreeMap<String, String>,
}

/// Flat classification label as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationType {
    Brand,
    Competitor,
    Other,
}

impl CitationType {
    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Brand => "brand",
            Self::Competitor => "competitor",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CitationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "brand" => Ok(Self::Brand),
            "competitor" => Ok(Self::Competitor),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown citation type '{other}'")),
        }
    }
}

/// Outcome of classifying one cited domain.
///
/// A competitor id exists exactly when the citation is a competitor's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "citation_type", rename_all = "lowercase")]
pub enum Classification {
    /// The project's own brand domain.
    Brand,
    /// A registered competitor's domain.
    Competitor {
        /// Id of the matching competitor.
        competitor_id: String,
    },
    /// Anything else, including citations with no resolvable domain.
    Other,
}

impl Classification {
    /// Flat label for this classification.
    #[must_use]
    pub fn citation_type(&self) -> CitationType {
        match self {
            Self::Brand => CitationType::Brand,
            Self::Competitor { .. } => CitationType::Competitor,
            Self::Other => CitationType::Other,
        }
    }

    /// Competitor id, present only for [`Classification::Competitor`].
    #[must_use]
    pub fn competitor_id(&self) -> Option<&str> {
        match self {
            Self::Competitor { competitor_id } => Some(competitor_id),
            Self::Brand | Self::Other => None,
        }
    }
}

/// A deduplicated citation plus its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedCitation {
    #[serde(flatten)]
    pub citation: DeduplicatedCitation,
    #[serde(flatten)]
    pub classification: Classification,
}

/// A competitor registered against a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Competitor {
    pub id: String,
    /// Normalized domain.
    pub domain: String,
}

impl Competitor {
    /// Creates a competitor, normalizing its domain.
    #[must_use]
    pub fn new(id: impl Into<String>, domain: &str) -> Self {
        Self {
            id: id.into(),
            domain: normalize_domain(domain),
        }
    }
}

/// Brand and competitor registry used while classifying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationContext {
    /// Normalized brand domain, if the project has one.
    pub brand_domain: Option<String>,
    /// Competitors in registration order.
    pub competitors: Vec<Competitor>,
}

impl ClassificationContext {
    /// Creates a context, normalizing the brand domain and dropping it when blank.
    #[must_use]
    pub fn new(brand_domain: Option<&str>, competitors: Vec<Competitor>) -> Self {
        Self {
            brand_domain: brand_domain
                .map(normalize_domain)
                .filter(|domain| !domain.is_empty()),
            competitors,
        }
    }
}
