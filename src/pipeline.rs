//! Batch orchestration: one prompt fanned out to several providers.
//!
//! Each requested provider runs in its own Tokio task. A task calls the
//! [`RetryingCaller`], records the response row (success or error), then
//! deduplicates, classifies and persists the citations. Per-provider failures
//! are reported in the [`BatchReport`] and never abort sibling tasks.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use citetrack_core::{
//!     CitationPipeline, Database, Provider, ProviderCallConfig, RateLimiter, RetryingCaller,
//!     SqliteCitationStore,
//! };
//! use citetrack_core::provider::{HttpTimeouts, build_adapter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteCitationStore::new(Database::new_in_memory().await?);
//! store.upsert_project("acme", Some("acme.com")).await?;
//!
//! let caller = RetryingCaller::new(Arc::new(RateLimiter::with_default_ceilings()));
//! let pipeline = CitationPipeline::new(Arc::new(caller), Arc::new(store)).with_provider(
//!     build_adapter(Provider::Perplexity, None, HttpTimeouts::default())?,
//!     ProviderCallConfig::new("pplx-key", "sonar"),
//! );
//!
//! let report = pipeline.run("acme", "best CRM tools?", &[Provider::Perplexity]).await?;
//! println!("{} succeeded, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::citation::{ClassificationContext, ClassifiedCitation, classify_all, deduplicate};
use crate::completion::{CompletionResult, RetryingCaller};
use crate::provider::{Provider, ProviderAdapter, ProviderCallConfig};
use crate::store::{CitationStore, NewResponse, StoreError};

/// Result of one provider within a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderOutcome {
    pub provider: Provider,
    /// Id of the stored response row, when one was written.
    pub response_id: Option<i64>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
}

/// Terminal status of a provider task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Completion stored; `citations` rows were classified.
    Succeeded { citations: usize },
    /// The call or a store write failed.
    Failed { error: String },
}

/// Per-provider outcomes of [`CitationPipeline::run`], in request order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<ProviderOutcome>,
}

impl BatchReport {
    /// Number of providers whose completion was stored.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Succeeded { .. }))
            .count()
    }

    /// Number of providers that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Total citations classified across all providers.
    #[must_use]
    pub fn citations(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                OutcomeStatus::Succeeded { citations } => citations,
                OutcomeStatus::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Fans prompts out to configured providers and persists what comes back.
pub struct CitationPipeline {
    caller: Arc<RetryingCaller>,
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
    configs: HashMap<Provider, ProviderCallConfig>,
    store: Arc<dyn CitationStore>,
}

impl std::fmt::Debug for CitationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<_> = self.adapters.keys().map(|p| p.as_str()).collect();
        providers.sort_unstable();
        f.debug_struct("CitationPipeline")
            .field("caller", &self.caller)
            .field("providers", &providers)
            .finish_non_exhaustive()
    }
}

impl CitationPipeline {
    /// Creates a pipeline with no providers configured.
    #[must_use]
    pub fn new(caller: Arc<RetryingCaller>, store: Arc<dyn CitationStore>) -> Self {
        Self {
            caller,
            adapters: HashMap::new(),
            configs: HashMap::new(),
            store,
        }
    }

    /// Registers an adapter and the call settings used with it.
    ///
    /// A second registration for the same provider replaces the first.
    #[must_use]
    pub fn with_provider(
        mut self,
        adapter: Arc<dyn ProviderAdapter>,
        config: ProviderCallConfig,
    ) -> Self {
        let provider = adapter.provider();
        self.adapters.insert(provider, adapter);
        self.configs.insert(provider, config);
        self
    }

    /// Providers with a registered adapter, in [`Provider::ALL`] order.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.adapters.contains_key(p))
            .collect()
    }

    /// Deduplicates and classifies a completion's citations.
    #[must_use]
    #[instrument(skip(result, context), fields(provider = %result.provider))]
    pub fn process_completion(
        response_id: i64,
        result: &CompletionResult,
        context: &ClassificationContext,
    ) -> Vec<ClassifiedCitation> {
        let raw = result.raw_citations.clone().unwrap_or_default();
        let raw_count = raw.len();
        let classified = classify_all(deduplicate(raw), context);
        debug!(raw = raw_count, unique = classified.len(), "classified citations");
        classified
    }

    /// Runs `prompt` against every provider in `providers`.
    ///
    /// Duplicate providers are run once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when the project's classification context
    /// cannot be loaded. Everything after that is reported per provider.
    #[instrument(skip(self, prompt, providers), fields(requested = providers.len()))]
    pub async fn run(
        &self,
        project_id: &str,
        prompt: &str,
        providers: &[Provider],
    ) -> Result<BatchReport, StoreError> {
        let context = Arc::new(self.store.classification_context(project_id).await?);

        let mut requested: Vec<Provider> = Vec::with_capacity(providers.len());
        for provider in providers {
            if !requested.contains(provider) {
                requested.push(*provider);
            }
        }

        info!(project_id, providers = requested.len(), "starting batch");

        let mut handles = Vec::with_capacity(requested.len());
        for provider in requested {
            let task = ProviderTask {
                provider,
                project_id: project_id.to_string(),
                prompt: prompt.to_string(),
                adapter: self.adapters.get(&provider).cloned(),
                config: self.configs.get(&provider).cloned(),
                caller: Arc::clone(&self.caller),
                store: Arc::clone(&self.store),
                context: Arc::clone(&context),
            };
            handles.push((provider, tokio::spawn(task.run())));
        }

        let mut report = BatchReport::default();
        for (provider, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%provider, error = %e, "provider task panicked");
                    ProviderOutcome {
                        provider,
                        response_id: None,
                        status: OutcomeStatus::Failed {
                            error: format!("task failed: {e}"),
                        },
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        info!(
            project_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            citations = report.citations(),
            "batch complete"
        );
        Ok(report)
    }
}

/// Everything one spawned provider task owns.
struct ProviderTask {
    provider: Provider,
    project_id: String,
    prompt: String,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    config: Option<ProviderCallConfig>,
    caller: Arc<RetryingCaller>,
    store: Arc<dyn CitationStore>,
    context: Arc<ClassificationContext>,
}

impl ProviderTask {
    async fn run(self) -> ProviderOutcome {
        let provider = self.provider;
        let (Some(adapter), Some(config)) = (self.adapter.as_deref(), self.config.as_ref()) else {
            let error = format!("provider {provider} is not configured");
            warn!(%provider, "skipping unconfigured provider");
            return self.record_failure(error).await;
        };

        let result = match self.caller.call(adapter, &self.prompt, config).await {
            Ok(result) => result,
            Err(e) => {
                warn!(%provider, error = %e, "provider call failed");
                return self.record_failure(e.to_string()).await;
            }
        };

        let response = NewResponse::success(&self.project_id, &self.prompt, &result);
        let response_id = match self.store.record_response(&response).await {
            Ok(id) => id,
            Err(e) => {
                warn!(%provider, error = %e, "failed to store response");
                return failed(provider, None, format!("store error: {e}"));
            }
        };

        let classified = CitationPipeline::process_completion(response_id, &result, &self.context);
        match self.store.insert_citations(response_id, &classified).await {
            Ok(inserted) => {
                info!(
                    %provider,
                    response_id,
                    citations = classified.len(),
                    inserted,
                    tokens = result.tokens_used,
                    "provider completed"
                );
                ProviderOutcome {
                    provider,
                    response_id: Some(response_id),
                    status: OutcomeStatus::Succeeded {
                        citations: classified.len(),
                    },
                }
            }
            Err(e) => {
                warn!(%provider, response_id, error = %e, "failed to store citations");
                failed(provider, Some(response_id), format!("store error: {e}"))
            }
        }
    }

    /// Records an error row; the outcome carries its id when the write works.
    async fn record_failure(&self, error: String) -> ProviderOutcome {
        let row = NewResponse::failure(&self.project_id, self.provider, &self.prompt, &error);
        let response_id = match self.store.record_response(&row).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(provider = %self.provider, error = %e, "failed to store error response");
                None
            }
        };
        failed(self.provider, response_id, error)
    }
}

fn failed(provider: Provider, response_id: Option<i64>, error: String) -> ProviderOutcome {
    ProviderOutcome {
        provider,
        response_id,
        status: OutcomeStatus::Failed { error },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::citation::{Classification, Competitor, RawCitation};
    use crate::completion::RateLimiter;
    use crate::db::Database;
    use crate::provider::{ProviderError, ProviderResponse};
    use crate::store::SqliteCitationStore;

    fn context() -> ClassificationContext {
        ClassificationContext::new(
            Some("acme.com"),
            vec![Competitor::new("rival", "rival.com")],
        )
    }

    fn completion(citations: Vec<RawCitation>) -> CompletionResult {
        CompletionResult {
            provider: Provider::Perplexity,
            text: "text".to_string(),
            tokens_used: 10,
            model: "sonar".to_string(),
            cost_estimate: 0.0,
            execution_time_ms: 5,
            raw_citations: (!citations.is_empty()).then_some(citations),
            has_web_search: true,
        }
    }

    #[test]
    fn test_process_completion_dedups_and_classifies() {
        let result = completion(vec![
            RawCitation::from_url("https://www.acme.com/pricing"),
            RawCitation::from_url("http://acme.com/pricing/"),
            RawCitation::from_url("https://rival.com/blog"),
            RawCitation::from_url("https://news.example.org/a"),
        ]);

        let classified = CitationPipeline::process_completion(1, &result, &context());
        assert_eq!(classified.len(), 3);
        assert_eq!(classified[0].classification, Classification::Brand);
        assert_eq!(classified[0].citation.occurrence_count, 2);
        assert_eq!(
            classified[1].classification,
            Classification::Competitor {
                competitor_id: "rival".to_string()
            }
        );
        assert_eq!(classified[2].classification, Classification::Other);
    }

    #[test]
    fn test_process_completion_without_citations_is_empty() {
        let classified = CitationPipeline::process_completion(1, &completion(vec![]), &context());
        assert!(classified.is_empty());
    }

    /// Adapter returning a fixed Perplexity-shaped body or a fixed error.
    struct FixedAdapter {
        provider: Provider,
        fail: bool,
    }

    #[async_trait]
    impl ProviderAdapter for FixedAdapter {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn complete(
            &self,
            _prompt: &str,
            _config: &ProviderCallConfig,
        ) -> Result<ProviderResponse, ProviderError> {
            if self.fail {
                return Err(ProviderError::http(self.provider, 401, "bad key"));
            }
            Ok(ProviderResponse {
                text: "Acme leads [1]. Rival follows [2].".to_string(),
                tokens_used: 12,
                model: "sonar".to_string(),
                web_search_used: true,
                raw: json!({
                    "citations": ["https://acme.com/", "https://rival.com/x"]
                }),
            })
        }
    }

    async fn pipeline() -> (CitationPipeline, Arc<SqliteCitationStore>) {
        let store = SqliteCitationStore::new(Database::new_in_memory().await.unwrap());
        store.upsert_project("acme", Some("acme.com")).await.unwrap();
        store.add_competitor("acme", "rival", "rival.com").await.unwrap();
        let store = Arc::new(store);

        let caller = Arc::new(RetryingCaller::new(Arc::new(RateLimiter::new(100))));
        let pipeline = CitationPipeline::new(caller, store.clone())
            .with_provider(
                Arc::new(FixedAdapter {
                    provider: Provider::Perplexity,
                    fail: false,
                }),
                ProviderCallConfig::new("k", "sonar"),
            )
            .with_provider(
                Arc::new(FixedAdapter {
                    provider: Provider::OpenAi,
                    fail: true,
                }),
                ProviderCallConfig::new("k", "gpt-4o"),
            );
        (pipeline, store)
    }

    #[tokio::test]
    async fn test_run_reports_each_provider_in_request_order() {
        let (pipeline, store) = pipeline().await;
        let report = pipeline
            .run(
                "acme",
                "who leads?",
                &[Provider::Perplexity, Provider::OpenAi, Provider::Gemini, Provider::Perplexity],
            )
            .await
            .unwrap();

        let providers: Vec<_> = report.outcomes.iter().map(|o| o.provider).collect();
        assert_eq!(providers, vec![Provider::Perplexity, Provider::OpenAi, Provider::Gemini]);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.citations(), 2);

        let ok = &report.outcomes[0];
        assert_eq!(ok.status, OutcomeStatus::Succeeded { citations: 2 });
        let stored = store
            .citations_for_response(ok.response_id.unwrap())
            .await
            .unwrap();
        assert_eq!(stored[0].citation.classification, Classification::Brand);

        let OutcomeStatus::Failed { error } = &report.outcomes[1].status else {
            panic!("expected openai failure");
        };
        assert!(error.contains("401"));
        assert!(report.outcomes[1].response_id.is_some());

        let OutcomeStatus::Failed { error } = &report.outcomes[2].status else {
            panic!("expected gemini failure");
        };
        assert!(error.contains("not configured"));
    }

    #[tokio::test]
    async fn test_run_unknown_project_is_batch_error() {
        let (pipeline, _store) = pipeline().await;
        let err = pipeline
            .run("ghost", "p", &[Provider::Perplexity])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_providers_lists_registered_adapters() {
        let (pipeline, _store) = pipeline().await;
        assert_eq!(pipeline.providers(), vec![Provider::OpenAi, Provider::Perplexity]);
    }
}
