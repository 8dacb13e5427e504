//! Text-generation backend
//!
//! [`GenerationBackend`] is the seam every model-calling node goes through.
//! [`GeminiClient`] is the production implementation and keeps one
//! long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use crate::models::GenerationParams;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Given a prompt, produce a completion
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> crate::Result<String>;
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> crate::Result<Self> {
        Self::with_base_url(api_key, GEMINI_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/{}:generateContent?key={}", self.base_url, model, self.api_key)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        };

        info!(model = %params.model, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint(&params.model))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                OrchestrationError::LlmError(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(OrchestrationError::LlmError(format!(
                "Gemini API error ({}): {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            OrchestrationError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                completion_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        extract_text(gemini_response)
    }
}

fn extract_text(response: GeminiResponse) -> crate::Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| OrchestrationError::LlmError("No response from Gemini API".to_string()))?;

    let text = candidate
        .content
        .parts
        .into_iter()
        .next()
        .map(|p| p.text)
        .ok_or_else(|| OrchestrationError::LlmError("Empty response from Gemini".to_string()))?;

    debug!(finish_reason = ?candidate.finish_reason, "Gemini response received");
    Ok(text)
}

/// Strip a Markdown code fence around a model answer
pub fn strip_code_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
