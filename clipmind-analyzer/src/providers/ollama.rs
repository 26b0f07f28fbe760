//! Ollama client (local LLM server)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{
    http_client, CompletionRequest, CompletionResponse, LlmProvider, ModelInfo, ProviderError,
};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
const EMBEDDING_MODEL: &str = "nomic-embed-text";

pub struct OllamaProvider {
    http_client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    options: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: i64,
    #[serde(default)]
    eval_count: i64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    /// Blank url/model fall back to the local defaults
    pub fn new(base_url: &str, model: &str) -> Result<Self, ProviderError> {
        let base_url = if base_url.trim().is_empty() {
            DEFAULT_OLLAMA_URL
        } else {
            base_url.trim()
        };
        let model = if model.trim().is_empty() {
            DEFAULT_OLLAMA_MODEL
        } else {
            model.trim()
        };

        Ok(Self {
            // Local generation is slow on modest hardware
            http_client: http_client(Duration::from_secs(300))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn generate_request<'a>(&'a self, request: &'a CompletionRequest) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt: &request.prompt,
            system: request.system_prompt.as_deref().filter(|s| !s.is_empty()),
            stream: false,
            options: json!({
                "temperature": request.temperature,
                "top_p": request.top_p,
                "num_predict": request.max_tokens,
                "num_thread": 2,
            }),
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(ProviderError::from_status(status.as_u16(), &text))
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&self.generate_request(request))
            .send()
            .await?;

        let parsed: GenerateResponse = check_status(response).await?.json().await?;

        Ok(CompletionResponse {
            content: parsed.response,
            input_tokens: parsed.prompt_eval_count,
            output_tokens: parsed.eval_count,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let response = self
            .http_client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&json!({ "model": EMBEDDING_MODEL, "prompt": text }))
            .send()
            .await?;

        let parsed: EmbeddingResponse = check_status(response).await?.json().await?;
        if parsed.embedding.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "empty embedding returned".to_string(),
            ));
        }
        Ok(parsed.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        // No batch endpoint; sequential calls keep index order
        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            debug!(index = i, total = texts.len(), "Embedding chunk via Ollama");
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.model.clone(),
            provider: "ollama".to_string(),
            max_tokens: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_settings_use_defaults() {
        let provider = OllamaProvider::new("", " ").unwrap();
        assert_eq!(provider.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(provider.model_info().name, DEFAULT_OLLAMA_MODEL);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let provider = OllamaProvider::new("http://gpu-box:11434/", "mistral").unwrap();
        assert_eq!(provider.base_url, "http://gpu-box:11434");
        assert_eq!(provider.model_info().provider, "ollama");
    }

    #[test]
    fn test_generate_request_shape() {
        let provider = OllamaProvider::new("", "mistral").unwrap();
        let mut request = CompletionRequest::new("hello");
        request.max_tokens = 64;

        let value = serde_json::to_value(provider.generate_request(&request)).unwrap();
        assert_eq!(value["model"], "mistral");
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["num_predict"], 64);
        assert!(value.get("system").is_none());
    }

    #[test]
    fn test_generate_response_defaults_counts() {
        let parsed: GenerateResponse =
            serde_json::from_value(json!({ "response": "hi", "done": true })).unwrap();
        assert_eq!(parsed.prompt_eval_count, 0);
        assert_eq!(parsed.eval_count, 0);
    }
}
