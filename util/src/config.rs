//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton holding
//! process-wide settings loaded from `.env` and environment variables: logging,
//! the result store location and the language-model provider. Per-task grading
//! settings live in [`crate::task_config`] and are passed explicitly instead.

use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock, RwLockReadGuard};

/// Which language-model backend the marker talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    /// Any server speaking the OpenAI chat-completions protocol (OpenAI, Ollama, vLLM).
    OpenAi,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(LlmProvider::Gemini),
            "openai" | "ollama" => Ok(LlmProvider::OpenAi),
            other => Err(format!("unknown LLM provider '{other}'")),
        }
    }
}

/// Complete process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_dir: String,
    pub log_to_stdout: bool,
    pub results_root: String,
    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub llm_base_url: String,
    pub llm_timeout_secs: u64,
    pub gemini_api_key: String,
    pub openai_api_key: String,
    pub max_concurrent_students: usize,
    pub max_concurrent_model_calls: usize,
}

static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Every value has a default; malformed numbers fall back to it.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let llm_provider = parse_or("LLM_PROVIDER", LlmProvider::Gemini);
        let default_model = match llm_provider {
            LlmProvider::Gemini => "gemini-2.5-flash",
            LlmProvider::OpenAi => "gpt-4o-mini",
        };
        let default_base_url = match llm_provider {
            LlmProvider::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
        };

        Self {
            env: var_or("APP_ENV", "development"),
            project_name: var_or("PROJECT_NAME", "marker"),
            log_level: var_or("LOG_LEVEL", "marker=info,code_runner=info"),
            log_file: var_or("LOG_FILE", "marker.log"),
            log_dir: var_or("LOG_DIR", "logs"),
            log_to_stdout: var_or("LOG_TO_STDOUT", "false") == "true",
            results_root: var_or("RESULTS_ROOT", "data/results"),
            llm_provider,
            llm_model: var_or("LLM_MODEL", default_model),
            llm_base_url: var_or("LLM_BASE_URL", default_base_url),
            llm_timeout_secs: parse_or("LLM_TIMEOUT_SECS", 60),
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            max_concurrent_students: parse_or("MAX_CONCURRENT_STUDENTS", 4).max(1),
            max_concurrent_model_calls: parse_or("MAX_CONCURRENT_MODEL_CALLS", 4).max(1),
        }
    }

    /// Returns a shared reference to the global configuration.
    pub fn global() -> RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reloads the configuration from the environment, discarding overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            let mut guard = lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = AppConfig::from_env();
        }
    }

    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_results_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.results_root = value.into());
    }

    pub fn set_llm_provider(value: LlmProvider) {
        AppConfig::set_field(|cfg| cfg.llm_provider = value);
    }

    pub fn set_llm_model(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.llm_model = value.into());
    }

    pub fn set_llm_base_url(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.llm_base_url = value.into());
    }

    pub fn set_llm_timeout_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.llm_timeout_secs = value);
    }

    pub fn set_gemini_api_key(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.gemini_api_key = value.into());
    }

    pub fn set_openai_api_key(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.openai_api_key = value.into());
    }

    pub fn set_max_concurrent_model_calls(value: usize) {
        AppConfig::set_field(|cfg| cfg.max_concurrent_model_calls = value.max(1));
    }
}
