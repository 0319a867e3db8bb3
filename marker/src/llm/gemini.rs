//! # Gemini Client
//!
//! Calls `{base}/models/{model}:generateContent?key=...`. Thinking is disabled
//! (budget 0) for faster, cheaper calls, and JSON output is requested since
//! every stage's contract is a JSON document.

use super::{check_status, http_client, send_error};
use crate::traits::model::{LanguageModel, ModelError, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Request body for the Gemini API.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
    thinking_config: ThinkingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    /// 0 disables thinking.
    thinking_budget: u32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    #[serde(default)]
    text: String,
}

pub struct GeminiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiModel {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        if api_key.trim().is_empty() {
            return Err(ModelError::MissingCredentials(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        }
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request_body(prompt: &Prompt) -> GeminiRequest {
        GeminiRequest {
            system_instruction: (!prompt.system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: prompt.system.clone(),
                }],
            }),
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: prompt.user.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: prompt.temperature,
                response_mime_type: "application/json",
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        debug!(stage = %prompt.stage, module = %prompt.module_id, model = %self.model, "calling gemini");

        let response = self
            .client
            .post(url)
            .json(&Self::request_body(prompt))
            .send()
            .await
            .map_err(send_error)?;
        let response = check_status(response).await?;

        let body = response.text().await.map_err(send_error)?;
        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            ModelError::Malformed(format!("error decoding response body: {e}"))
        })?;
        extract_text(parsed)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn extract_text(response: GeminiResponse) -> Result<String, ModelError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(ModelError::Malformed("response had no candidate text".into()));
    }
    Ok(text)
}
