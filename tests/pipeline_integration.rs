//! Integration tests for the citation pipeline.
//!
//! These tests run real provider adapters against mock HTTP servers and
//! persist into a file-backed SQLite database.

use std::sync::Arc;
use std::time::Duration;

use citetrack_core::provider::{
    AnthropicAdapter, GeminiAdapter, HttpTimeouts, OpenAiAdapter, PerplexityAdapter,
};
use citetrack_core::{
    CitationPipeline, CitationStore, Classification, Database, OutcomeStatus, Provider,
    ProviderCallConfig, RateLimiter, RetryingCaller, SqliteCitationStore,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a seeded store backed by a temp file.
async fn setup_store() -> Result<(Arc<SqliteCitationStore>, TempDir), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let db = Database::new(&temp_dir.path().join("citetrack.db")).await?;
    let store = SqliteCitationStore::new(db);
    store.upsert_project("acme", Some("acme.com")).await?;
    store.add_competitor("acme", "rival", "rival.com").await?;
    Ok((Arc::new(store), temp_dir))
}

fn caller(max_retries: u32) -> Arc<RetryingCaller> {
    Arc::new(
        RetryingCaller::new(Arc::new(RateLimiter::new(100)))
            .with_max_retries(max_retries)
            .with_jitter(Duration::ZERO),
    )
}

fn perplexity_body() -> serde_json::Value {
    json!({
        "model": "sonar",
        "choices": [{"message": {"role": "assistant", "content": "Acme is light [1]. Rival is cheap [2]. Acme again [1]."}}],
        "usage": {"total_tokens": 30},
        "citations": ["https://www.acme.com/trail/", "https://rival.com/road"]
    })
}

fn openai_body() -> serde_json::Value {
    json!({
        "model": "gpt-4o-search-preview",
        "choices": [{"message": {
            "role": "assistant",
            "content": "Reviews favour Acme.",
            "annotations": [{"type": "url_citation", "url_citation": {
                "url": "https://news.example.org/review?utm_source=openai",
                "title": "Review", "start_index": 0, "end_index": 20}}]
        }}],
        "usage": {"total_tokens": 18}
    })
}

fn gemini_quota_body() -> serde_json::Value {
    json!({
        "error": {
            "code": 429,
            "message": "Resource has been exhausted",
            "status": "RESOURCE_EXHAUSTED",
            "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "0.01s"}]
        }
    })
}

#[tokio::test]
async fn test_fan_out_persists_successes_and_reports_exhausted_provider() {
    let (store, _dir) = setup_store().await.unwrap();

    let perplexity = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(perplexity_body()))
        .expect(1)
        .mount(&perplexity)
        .await;

    let openai = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(openai_body()))
        .expect(1)
        .mount(&openai)
        .await;

    let gemini = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(gemini_quota_body()))
        .expect(2)
        .mount(&gemini)
        .await;

    let timeouts = HttpTimeouts::default();
    let pipeline = CitationPipeline::new(caller(2), store.clone())
        .with_provider(
            Arc::new(PerplexityAdapter::with_base_url(perplexity.uri(), timeouts).unwrap()),
            ProviderCallConfig::new("pplx", "sonar"),
        )
        .with_provider(
            Arc::new(OpenAiAdapter::with_base_url(openai.uri(), timeouts).unwrap()),
            ProviderCallConfig::new("sk", "gpt-4o-search-preview"),
        )
        .with_provider(
            Arc::new(GeminiAdapter::with_base_url(gemini.uri(), timeouts).unwrap()),
            ProviderCallConfig::new("g", "gemini-2.0-flash"),
        );

    let report = pipeline
        .run(
            "acme",
            "lightest trail shoe?",
            &[Provider::Perplexity, Provider::OpenAi, Provider::Gemini],
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);

    // Perplexity: two unique sources, brand first with both markers merged
    let pplx = &report.outcomes[0];
    assert_eq!(pplx.status, OutcomeStatus::Succeeded { citations: 2 });
    let stored = store
        .citations_for_response(pplx.response_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].citation.citation.uri, "acme.com/trail");
    assert_eq!(stored[0].citation.citation.occurrence_count, 2);
    assert_eq!(stored[0].citation.classification, Classification::Brand);
    assert_eq!(
        stored[1].citation.classification,
        Classification::Competitor {
            competitor_id: "rival".to_string()
        }
    );

    // OpenAI: tracking parameter stripped, classified as other
    let oai = &report.outcomes[1];
    let stored = store
        .citations_for_response(oai.response_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].citation.citation.url, "https://news.example.org/review");
    assert_eq!(stored[0].citation.classification, Classification::Other);

    // Gemini: retries exhausted, error row still written
    let gem = &report.outcomes[2];
    let OutcomeStatus::Failed { error } = &gem.status else {
        panic!("gemini should fail");
    };
    assert!(error.contains("2 attempts"), "unexpected error: {error}");
    assert!(gem.response_id.is_some());
    assert!(
        store
            .citations_for_response(gem.response_id.unwrap())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_rate_limited_provider_recovers_on_retry() {
    let (store, _dir) = setup_store().await.unwrap();

    let anthropic = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after-ms", "20"))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&anthropic)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "server_tool_use", "id": "t1", "name": "web_search", "input": {"query": "crm tools"}},
                {"type": "web_search_tool_result", "tool_use_id": "t1", "content": []},
                {"type": "text", "text": "Rival leads.", "citations": [
                    {"type": "web_search_result_location", "url": "https://rival.com/crm", "title": "Rival CRM"}
                ]}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        })))
        .expect(1)
        .mount(&anthropic)
        .await;

    let pipeline = CitationPipeline::new(caller(3), store.clone()).with_provider(
        Arc::new(
            AnthropicAdapter::with_base_url(anthropic.uri(), HttpTimeouts::default()).unwrap(),
        ),
        ProviderCallConfig::new("sk-ant", "claude-sonnet-4-20250514"),
    );

    let report = pipeline
        .run("acme", "best crm?", &[Provider::Anthropic])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, OutcomeStatus::Succeeded { citations: 1 });
    let stored = store
        .citations_for_response(outcome.response_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored[0].citation.citation.domain.as_deref(), Some("rival.com"));
    assert_eq!(
        stored[0].citation.citation.metadata.get("title").map(String::as_str),
        Some("Rival CRM")
    );
}

#[tokio::test]
async fn test_non_rate_limit_failure_is_not_retried() {
    let (store, _dir) = setup_store().await.unwrap();

    let perplexity = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .expect(1)
        .mount(&perplexity)
        .await;

    let pipeline = CitationPipeline::new(caller(3), store.clone()).with_provider(
        Arc::new(
            PerplexityAdapter::with_base_url(perplexity.uri(), HttpTimeouts::default()).unwrap(),
        ),
        ProviderCallConfig::new("bad", "sonar"),
    );

    let report = pipeline
        .run("acme", "p", &[Provider::Perplexity])
        .await
        .unwrap();
    let OutcomeStatus::Failed { error } = &report.outcomes[0].status else {
        panic!("expected failure");
    };
    assert!(error.contains("401"));
}

#[tokio::test]
async fn test_deactivated_competitor_is_classified_other() {
    let (store, _dir) = setup_store().await.unwrap();
    assert!(store.deactivate_competitor("acme", "rival").await.unwrap());

    let perplexity = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(perplexity_body()))
        .mount(&perplexity)
        .await;

    let pipeline = CitationPipeline::new(caller(1), store.clone()).with_provider(
        Arc::new(
            PerplexityAdapter::with_base_url(perplexity.uri(), HttpTimeouts::default()).unwrap(),
        ),
        ProviderCallConfig::new("pplx", "sonar"),
    );

    let report = pipeline
        .run("acme", "p", &[Provider::Perplexity])
        .await
        .unwrap();
    let stored = store
        .citations_for_response(report.outcomes[0].response_id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored[1].citation.classification, Classification::Other);
}
