//! Google Gemini client (Generative Language REST API)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    http_client, CompletionRequest, CompletionResponse, LlmProvider, ModelInfo, ProviderError,
};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const EMBEDDING_MODEL: &str = "text-embedding-004";

/// Gemini completion + embedding handle
pub struct GeminiProvider {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    /// Create a handle; an empty `model` selects the default model
    pub fn new(api_key: &str, model: Option<&str>) -> Result<Self, ProviderError> {
        if api_key.trim().is_empty() {
            return Err(ProviderError::InvalidKey);
        }

        let model = model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_GEMINI_MODEL);

        Ok(Self {
            http_client: http_client(Duration::from_secs(120))?,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);

        // Key travels in a header so it never appears in URLs or error strings
        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        Ok(response.json().await?)
    }
}

fn completion_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "temperature": request.temperature,
            "topP": request.top_p,
            "maxOutputTokens": request.max_tokens,
        }
    });

    if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    body
}

fn embed_content(text: &str) -> Value {
    json!({
        "model": format!("models/{}", EMBEDDING_MODEL),
        "content": { "parts": [{ "text": text }] }
    })
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: i64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: i64,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

fn parse_completion(value: Value, prompt_chars: usize) -> Result<CompletionResponse, ProviderError> {
    let parsed: GenerateResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("no candidates in response".to_string()))?;

    let content: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    // Usage metadata is optional; fall back to the chars/4 estimate
    let (input_tokens, output_tokens) = match parsed.usage_metadata {
        Some(usage) => (usage.prompt_token_count, usage.candidates_token_count),
        None => ((prompt_chars / 4) as i64, (content.chars().count() / 4) as i64),
    };

    Ok(CompletionResponse {
        content,
        input_tokens,
        output_tokens,
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = completion_body(request);
        let value = self
            .post(&format!("models/{}:generateContent", self.model), &body)
            .await?;

        let prompt_chars = request.prompt.chars().count()
            + request.system_prompt.as_deref().map(|s| s.chars().count()).unwrap_or(0);
        parse_completion(value, prompt_chars)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let value = self
            .post(
                &format!("models/{}:embedContent", EMBEDDING_MODEL),
                &embed_content(text),
            )
            .await?;

        let parsed: EmbedResponse = serde_json::from_value(value)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.embedding.values)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<Value> = texts.iter().map(|t| embed_content(t)).collect();
        let value = self
            .post(
                &format!("models/{}:batchEmbedContents", EMBEDDING_MODEL),
                &json!({ "requests": requests }),
            )
            .await?;

        let parsed: BatchEmbedResponse = serde_json::from_value(value)
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider: "gemini".to_string(),
            max_tokens: 8192,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            GeminiProvider::new("  ", None),
            Err(ProviderError::InvalidKey)
        ));
    }

    #[test]
    fn test_blank_model_uses_default() {
        let provider = GeminiProvider::new("key", Some("")).unwrap();
        assert_eq!(provider.model_info().name, DEFAULT_GEMINI_MODEL);

        let provider = GeminiProvider::new("key", Some("gemini-1.5-pro")).unwrap();
        assert_eq!(provider.model_info().name, "gemini-1.5-pro");
    }

    #[test]
    fn test_completion_body_includes_system_instruction() {
        let mut request = CompletionRequest::new("Summarize this");
        request.system_prompt = Some("Be brief".to_string());
        request.max_tokens = 256;

        let body = completion_body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Summarize this");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_parse_completion_concatenates_parts() {
        let value = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 3 }
        });

        let response = parse_completion(value, 48).unwrap();
        assert_eq!(response.content, "Hello world");
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 3);
    }

    #[test]
    fn test_parse_completion_estimates_tokens_without_usage() {
        let value = json!({ "candidates": [{ "content": { "parts": [{ "text": "abcdefgh" }] } }] });
        let response = parse_completion(value, 40).unwrap();
        assert_eq!(response.input_tokens, 10);
        assert_eq!(response.output_tokens, 2);
    }

    #[test]
    fn test_parse_completion_without_candidates_fails() {
        let result = parse_completion(json!({ "candidates": [] }), 0);
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }
}
