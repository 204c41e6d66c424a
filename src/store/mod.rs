//! Persistence boundary for responses and classified citations.
//!
//! The pipeline depends only on [`CitationStore`]; [`SqliteCitationStore`] is
//! the bundled implementation. Citation writes are idempotent on
//! `(response_id, normalized_uri)`, so re-running a step never duplicates rows.

mod error;
mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteCitationStore;

use async_trait::async_trait;
use serde::Serialize;

use crate::citation::{ClassificationContext, ClassifiedCitation};
use crate::completion::CompletionResult;
use crate::provider::Provider;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome recorded for a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    /// Stable lowercase label as stored.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// A response row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResponse {
    pub project_id: String,
    pub provider: Provider,
    pub prompt: String,
    pub status: ResponseStatus,
    pub model: Option<String>,
    pub response_text: Option<String>,
    pub tokens_used: Option<u32>,
    pub cost_estimate: Option<f64>,
    pub execution_time_ms: Option<u64>,
    pub has_web_search: bool,
    pub error_message: Option<String>,
}

impl NewResponse {
    /// Row for a successful completion.
    #[must_use]
    pub fn success(project_id: &str, prompt: &str, result: &CompletionResult) -> Self {
        Self {
            project_id: project_id.to_string(),
            provider: result.provider,
            prompt: prompt.to_string(),
            status: ResponseStatus::Success,
            model: Some(result.model.clone()),
            response_text: Some(result.text.clone()),
            tokens_used: Some(result.tokens_used),
            cost_estimate: Some(result.cost_estimate),
            execution_time_ms: Some(result.execution_time_ms),
            has_web_search: result.has_web_search,
            error_message: None,
        }
    }

    /// Row for a failed call.
    #[must_use]
    pub fn failure(project_id: &str, provider: Provider, prompt: &str, error: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            provider,
            prompt: prompt.to_string(),
            status: ResponseStatus::Error,
            model: None,
            response_text: None,
            tokens_used: None,
            cost_estimate: None,
            execution_time_ms: None,
            has_web_search: false,
            error_message: Some(error.to_string()),
        }
    }
}

/// A classified citation read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredCitation {
    pub response_id: i64,
    #[serde(flatten)]
    pub citation: ClassifiedCitation,
}

/// Data-access contract used by the citation pipeline.
#[async_trait]
pub trait CitationStore: Send + Sync {
    /// Loads the brand domain and active competitors for `project_id`.
    ///
    /// Fails with [`StoreError::ProjectNotFound`] when the project is missing.
    async fn classification_context(&self, project_id: &str) -> Result<ClassificationContext>;

    /// Inserts a response row and returns its id.
    async fn record_response(&self, response: &NewResponse) -> Result<i64>;

    /// Inserts citations for a response, skipping ones already stored.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_citations(
        &self,
        response_id: i64,
        citations: &[ClassifiedCitation],
    ) -> Result<u64>;

    /// Reads a response's citations in insertion order.
    async fn citations_for_response(&self, response_id: i64) -> Result<Vec<StoredCitation>>;
}
