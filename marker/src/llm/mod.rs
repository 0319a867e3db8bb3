//! # Language-Model Clients
//!
//! HTTP implementations of [`LanguageModel`]:
//!
//! - [`gemini::GeminiModel`]: Google's `generateContent` API.
//! - [`openai::OpenAiCompatibleModel`]: any `/chat/completions` server (OpenAI, Ollama, vLLM).
//!
//! Both map provider failures onto [`ModelError`] the same way, so the agent
//! pipeline can retry them without knowing which provider is in use.

pub mod gemini;
pub mod openai;

use crate::traits::model::{LanguageModel, ModelError};
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use util::config::{AppConfig, LlmProvider};

/// Builds the client selected by `LLM_PROVIDER`.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn LanguageModel>, ModelError> {
    let timeout = Duration::from_secs(config.llm_timeout_secs.max(1));
    let model: Arc<dyn LanguageModel> = match config.llm_provider {
        LlmProvider::Gemini => Arc::new(gemini::GeminiModel::new(
            &config.llm_base_url,
            &config.llm_model,
            &config.gemini_api_key,
            timeout,
        )?),
        LlmProvider::OpenAi => {
            let key = Some(config.openai_api_key.as_str()).filter(|k| !k.trim().is_empty());
            Arc::new(openai::OpenAiCompatibleModel::new(
                &config.llm_base_url,
                &config.llm_model,
                key,
                timeout,
            )?)
        }
    };
    Ok(model)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ModelError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ModelError::Transport(e.to_string()))
}

pub(crate) fn send_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        ModelError::Timeout
    } else {
        ModelError::Transport(e.to_string())
    }
}

/// Passes successful responses through and classifies the rest.
pub(crate) async fn check_status(response: Response) -> Result<Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return Err(ModelError::RateLimited { retry_after });
    }
    let body = response.text().await.unwrap_or_default();
    Err(ModelError::Http {
        status: status.as_u16(),
        body: truncate(&body, 500),
    })
}

/// Only the delta-seconds form is understood.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "..."
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-2"), None);
    }

    #[test]
    fn gemini_without_key_is_refused() {
        let mut config = AppConfig::from_env();
        config.llm_provider = LlmProvider::Gemini;
        config.gemini_api_key = String::new();
        assert!(matches!(
            from_config(&config),
            Err(ModelError::MissingCredentials(_))
        ));
    }

    #[test]
    fn openai_compatible_needs_no_key() {
        let mut config = AppConfig::from_env();
        config.llm_provider = LlmProvider::OpenAi;
        config.llm_base_url = "http://localhost:11434/v1".into();
        config.llm_model = "llama3".into();
        config.openai_api_key = String::new();
        let model = from_config(&config).unwrap();
        assert_eq!(model.name(), "llama3");
    }
}
