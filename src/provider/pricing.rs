//! Rough per-call cost estimates.
//!
//! Prices are blended input/output USD per million tokens. They drift; the
//! figures here are informational and only feed the `cost_estimate` column.

use super::Provider;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Blended price per million tokens for a provider/model pair.
fn price_per_million(provider: Provider, model: &str) -> f64 {
    let model = model.to_ascii_lowercase();
    match provider {
        Provider::OpenAi if model.contains("mini") => 0.40,
        Provider::OpenAi => 6.25,
        Provider::Anthropic if model.contains("haiku") => 2.40,
        Provider::Anthropic => 9.00,
        Provider::Gemini if model.contains("flash") => 0.25,
        Provider::Gemini => 5.60,
        Provider::Perplexity if model.contains("sonar-pro") => 9.00,
        Provider::Perplexity => 1.00,
    }
}

/// Estimates the USD cost of `tokens` tokens on `model`.
#[must_use]
pub fn estimate_cost(provider: Provider, model: &str, tokens: u32) -> f64 {
    f64::from(tokens) / TOKENS_PER_MILLION * price_per_million(provider, model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tokens_cost_nothing() {
        for provider in Provider::ALL {
            assert!(estimate_cost(provider, provider.default_model(), 0).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_family_overrides_are_cheaper() {
        assert!(
            estimate_cost(Provider::OpenAi, "gpt-4o-mini-search-preview", 1000)
                < estimate_cost(Provider::OpenAi, "gpt-4o-search-preview", 1000)
        );
        assert!(
            estimate_cost(Provider::Anthropic, "claude-3-5-haiku-latest", 1000)
                < estimate_cost(Provider::Anthropic, "claude-sonnet-4-20250514", 1000)
        );
        assert!(
            estimate_cost(Provider::Perplexity, "sonar", 1000)
                < estimate_cost(Provider::Perplexity, "sonar-pro", 1000)
        );
    }

    #[test]
    fn test_million_tokens_equals_table_price() {
        let cost = estimate_cost(Provider::Gemini, "gemini-2.0-flash", 1_000_000);
        assert!((cost - 0.25).abs() < 1e-9);
    }
}
