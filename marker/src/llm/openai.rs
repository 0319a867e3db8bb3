use super::{check_status, http_client, send_error};
use crate::traits::model::{LanguageModel, ModelError, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
    stream: bool,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for servers speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleModel {
    /// `api_key` is optional because local servers such as Ollama take none.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    fn request_body<'a>(&'a self, prompt: &Prompt) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !prompt.system.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: prompt.system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.user.clone(),
        });
        ChatRequest {
            model: &self.model,
            messages,
            temperature: prompt.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            stream: false,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        debug!(stage = %prompt.stage, module = %prompt.module_id, model = %self.model, "calling chat completions");

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&self.request_body(prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(send_error)?;
        let response = check_status(response).await?;

        let body = response.text().await.map_err(send_error)?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ModelError::Malformed(format!("error decoding response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ModelError::Malformed("no response choices".into()))
    }

    fn name(&self) -> &str {
        &self.model
    }
}
