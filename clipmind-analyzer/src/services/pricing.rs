//! Static per-model price table
//!
//! Prices are USD per 1K tokens. An unknown provider is an error; an unknown
//! model of a known provider is free.

use crate::providers::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

const FREE: Pricing = Pricing {
    input_per_1k: 0.0,
    output_per_1k: 0.0,
};

/// Groq bills Whisper per audio minute
const GROQ_WHISPER_PER_MINUTE: f64 = 0.006;

pub fn pricing(provider: &str, model: &str) -> Result<Pricing, ProviderError> {
    let price = match (provider, model) {
        ("gemini", "gemini-1.5-flash") => Pricing {
            input_per_1k: 0.000075,
            output_per_1k: 0.0003,
        },
        ("gemini", "gemini-1.5-pro") => Pricing {
            input_per_1k: 0.00125,
            output_per_1k: 0.005,
        },
        ("gemini", _) => FREE,
        // Local and self-hosted backends, platform captions
        ("ollama", _) | ("local", _) | ("huggingface", _) | ("youtube", _) => FREE,
        ("groq", _) => FREE,
        (other, _) => return Err(ProviderError::UnknownProvider(other.to_string())),
    };
    Ok(price)
}

/// Token-priced cost of one call
pub fn cost(
    provider: &str,
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
) -> Result<f64, ProviderError> {
    let price = pricing(provider, model)?;
    Ok((input_tokens as f64 / 1000.0) * price.input_per_1k
        + (output_tokens as f64 / 1000.0) * price.output_per_1k)
}

/// Per-minute cost for Groq transcription
///
/// Token counts stand in for minutes (one minute per 1K tokens).
pub fn groq_transcription_cost(total_tokens: i64) -> f64 {
    (total_tokens as f64 / 1000.0) * GROQ_WHISPER_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gemini_flash_cost() {
        let cost = cost("gemini", "gemini-1.5-flash", 1000, 1000).unwrap();
        assert!((cost - 0.000375).abs() < 1e-12);
    }

    #[test]
    fn test_local_models_are_free() {
        assert_eq!(cost("ollama", "llama3.2", 50_000, 10_000).unwrap(), 0.0);
        assert_eq!(cost("local", "faster-whisper", 1_000, 0).unwrap(), 0.0);
    }

    #[test]
    fn test_unknown_model_free_unknown_provider_error() {
        assert_eq!(cost("gemini", "gemini-9", 1000, 1000).unwrap(), 0.0);
        assert!(matches!(
            cost("openai", "gpt-4", 1, 1),
            Err(ProviderError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_groq_per_minute() {
        assert!((groq_transcription_cost(2000) - 0.012).abs() < 1e-12);
    }
}
