//! Citetrack Core Library
//!
//! Sends prompts to web-grounded language-model providers and turns the
//! citations in their answers into a normalized, deduplicated, classified
//! record.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`provider`] - Provider adapters (OpenAI, Anthropic, Gemini, Perplexity)
//! - [`completion`] - Per-provider rate limiting and rate-limit retries
//! - [`citation`] - Citation extraction, URI normalization, dedup and classification
//! - [`pipeline`] - Fan-out of one prompt to many providers
//! - [`store`] - Persistence boundary and its SQLite implementation
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod citation;
pub mod completion;
pub mod db;
pub mod pipeline;
pub mod provider;
pub mod store;
mod user_agent;

// Re-export commonly used types
pub use citation::{
    CitationType, Classification, ClassificationContext, ClassifiedCitation, Competitor,
    DeduplicatedCitation, RawCitation, normalize_uri,
};
pub use completion::{CallError, CompletionResult, RateLimiter, RetryingCaller};
pub use db::Database;
pub use pipeline::{BatchReport, CitationPipeline, OutcomeStatus, ProviderOutcome};
pub use provider::{
    Provider, ProviderAdapter, ProviderCallConfig, ProviderError, ProviderResponse,
};
pub use store::{CitationStore, NewResponse, SqliteCitationStore, StoreError, StoredCitation};
