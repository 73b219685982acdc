//! Structuring model seam and the Gemini implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{InvxError, ModelError};
use crate::models::config::StructuringConfig;

/// A text-in, text-out generative model.
#[async_trait]
pub trait StructuringModel: Send + Sync {
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "model"
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiModel {
    pub fn new(api_key: impl Into<String>, config: &StructuringConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Build a client with the key read from `config.api_key_env`.
    pub fn from_env(config: &StructuringConfig) -> Result<Self, InvxError> {
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim(), config)),
            _ => Err(InvxError::Config(format!(
                "environment variable {} is not set; it must hold the structuring model API key",
                config.api_key_env
            ))),
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait]
impl StructuringModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        debug!("Calling {} with {} prompt chars", self.model, prompt.len());

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Response(e.to_string()))?;
        let text = body.into_text()?;
        trace!("{} answered with {} chars", self.model, text.len());
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Text of the first candidate, parts concatenated.
    fn into_text(self) -> Result<String, ModelError> {
        let content = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .ok_or_else(|| ModelError::Response("no candidates in response".to_string()))?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            return Err(ModelError::Response("candidate has no text".to_string()));
        }
        Ok(text)
    }
}
