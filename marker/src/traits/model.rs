//!
//! # Language Model Trait
//!
//! [`LanguageModel`] is the only way the agent pipeline reaches a model. A
//! [`Prompt`] carries the text plus enough context (stage, module) for logging
//! and for test doubles to answer per stage.
//!
//! Every [`ModelError`] is treated as recoverable by the pipeline: it is logged,
//! backed off and retried, and after the last attempt the stage degrades.

use crate::types::Stage;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Prompt {
    pub stage: Stage,
    pub module_id: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl ModelError {
    /// Minimum wait the provider asked for before the next call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ModelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model's raw text (or JSON as text) for `prompt`.
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError>;

    /// Short identifier for logs, e.g. `gemini-2.5-flash`.
    fn name(&self) -> &str;
}
