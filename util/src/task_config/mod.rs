//! Per-task grading configuration.
//!
//! A `TaskConfig` is read once before a run and shared read-only (behind an
//! `Arc`) by every student/module unit. Missing sections fall back to their
//! defaults so a minimal file only has to list the task id and its modules.

use crate::paths::sanitize_component;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Output format of the rendered feedback document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackFormat {
    Html,
    #[default]
    Markdown,
    Text,
}

impl std::str::FromStr for FeedbackFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(FeedbackFormat::Html),
            "markdown" | "md" => Ok(FeedbackFormat::Markdown),
            "text" | "txt" => Ok(FeedbackFormat::Text),
            other => Err(format!("unsupported feedback format '{other}'")),
        }
    }
}

/// How submission code is isolated while its tests run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// A fresh subprocess in its own process group and scratch directory.
    #[default]
    Process,
    /// A throwaway container with no network.
    Docker,
}

/// One gradable unit of the task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    pub module_id: String,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub rubric: Option<String>,

    #[serde(default)]
    pub max_score: Option<f64>,

    /// Test file run against the submission for this module.
    #[serde(default)]
    pub tests: Option<PathBuf>,

    /// Name the submission code is written under inside the sandbox.
    #[serde(default = "default_solution_file")]
    pub solution_file: String,
}

impl ModuleConfig {
    pub fn new(module_id: impl Into<String>, rubric: impl Into<String>, max_score: f64) -> Self {
        Self {
            module_id: module_id.into(),
            title: None,
            rubric: Some(rubric.into()),
            max_score: Some(max_score),
            tests: None,
            solution_file: default_solution_file(),
        }
    }

    pub fn with_tests(mut self, tests: impl Into<PathBuf>) -> Self {
        self.tests = Some(tests.into());
        self
    }

    /// Checks the fields a unit cannot run without.
    pub fn validate(&self) -> Result<(), String> {
        if self.module_id.trim().is_empty() {
            return Err("module id is empty".to_string());
        }
        match self.rubric.as_deref() {
            Some(r) if !r.trim().is_empty() => {}
            _ => return Err("rubric text is missing".to_string()),
        }
        match self.max_score {
            Some(m) if m.is_finite() && m > 0.0 => Ok(()),
            Some(m) => Err(format!("max score {m} must be a positive number")),
            None => Err("max score is missing".to_string()),
        }
    }

    pub fn rubric_text(&self) -> &str {
        self.rubric.as_deref().unwrap_or_default()
    }

    pub fn max_points(&self) -> f64 {
        self.max_score.unwrap_or(0.0)
    }

    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.module_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLimits {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Captured stdout/stderr beyond this many bytes is dropped.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LintTool {
    pub name: String,
    /// Command template; `{file}` is replaced with the source file path.
    pub command: Vec<String>,
    /// When true a non-zero exit marks issues, otherwise any output does.
    #[serde(default)]
    pub issues_on_exit_code: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DockerOptions {
    #[serde(default = "default_docker_image")]
    pub image: String,

    #[serde(default = "default_max_memory")]
    pub max_memory: u64,

    #[serde(default = "default_max_cpus")]
    pub max_cpus: u32,

    #[serde(default = "default_max_processes")]
    pub max_processes: u32,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            image: default_docker_image(),
            max_memory: default_max_memory(),
            max_cpus: default_max_cpus(),
            max_processes: default_max_processes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerOptions {
    #[serde(default)]
    pub isolation: Isolation,

    /// Test command template with `{tests}`, `{solution}` and `{workdir}` placeholders.
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,

    #[serde(default = "default_lint_tools")]
    pub lint_tools: Vec<LintTool>,

    #[serde(default = "default_lint_timeout_secs")]
    pub lint_timeout_secs: u64,

    #[serde(default)]
    pub docker: DockerOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            test_command: default_test_command(),
            lint_tools: default_lint_tools(),
            lint_timeout_secs: default_lint_timeout_secs(),
            docker: DockerOptions::default(),
        }
    }
}

/// Retry and sampling settings for the model-backed stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentOptions {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Reuse accepted stage responses already in the unit log.
    #[serde(default)]
    pub resume: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay_ms(),
            temperature: default_temperature(),
            resume: false,
        }
    }
}

/// Thresholds of the submission-problem heuristics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagThresholds {
    /// Flag when the total percentage is strictly below this.
    #[serde(default = "default_low_score_percent")]
    pub low_score_percent: f64,

    /// Flag when at least this share of modules scored zero.
    #[serde(default = "default_zero_module_ratio")]
    pub zero_module_ratio: f64,

    /// Flag when at least this many modules needed the extraction fallback.
    #[serde(default = "default_extraction_error_limit")]
    pub extraction_error_limit: usize,
}

impl Default for FlagThresholds {
    fn default() -> Self {
        Self {
            low_score_percent: default_low_score_percent(),
            zero_module_ratio: default_zero_module_ratio(),
            extraction_error_limit: default_extraction_error_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeedbackOptions {
    #[serde(default)]
    pub format: FeedbackFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub task_id: String,

    #[serde(default)]
    pub modules: Vec<ModuleConfig>,

    #[serde(default)]
    pub execution: ExecutionLimits,

    #[serde(default)]
    pub runner: RunnerOptions,

    #[serde(default)]
    pub agents: AgentOptions,

    #[serde(default)]
    pub flags: FlagThresholds,

    #[serde(default)]
    pub feedback: FeedbackOptions,
}

impl TaskConfig {
    pub fn new(task_id: impl Into<String>, modules: Vec<ModuleConfig>) -> Self {
        Self {
            task_id: task_id.into(),
            modules,
            execution: ExecutionLimits::default(),
            runner: RunnerOptions::default(),
            agents: AgentOptions::default(),
            flags: FlagThresholds::default(),
            feedback: FeedbackOptions::default(),
        }
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    /// Validates the module at `index`.
    ///
    /// Results are stored per module id, so an id that maps to the same
    /// result path as an earlier module's is a fault of the later module.
    pub fn validate_module(&self, index: usize) -> Result<(), String> {
        let module = self
            .modules
            .get(index)
            .ok_or_else(|| format!("no module at position {index}"))?;
        module.validate()?;

        let stored_as = sanitize_component(&module.module_id);
        match self.modules[..index]
            .iter()
            .find(|m| sanitize_component(&m.module_id) == stored_as)
        {
            Some(earlier) => Err(format!(
                "module id '{}' collides with earlier module '{}'",
                module.module_id, earlier.module_id
            )),
            None => Ok(()),
        }
    }

    /// Reads a task configuration from a JSON file.
    ///
    /// Relative test paths are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
        let mut cfg: TaskConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Invalid config JSON format: {e}"))?;

        if let Some(base) = path.parent() {
            for module in &mut cfg.modules {
                if let Some(tests) = module.tests.as_mut() {
                    if tests.is_relative() {
                        *tests = base.join(&*tests);
                    }
                }
            }
        }
        Ok(cfg)
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        crate::paths::ensure_parent_dir(path)
            .map_err(|e| format!("Failed to create config directory: {e:?}"))?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config to JSON: {e}"))?;
        fs::write(path, json).map_err(|e| format!("Failed to write config file to disk: {e:?}"))
    }
}

//Default Functions

fn default_solution_file() -> String {
    "solution.py".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

fn default_test_command() -> Vec<String> {
    ["python", "-m", "pytest", "-v", "-rfE", "{tests}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_lint_tools() -> Vec<LintTool> {
    vec![
        LintTool {
            name: "flake8".to_string(),
            command: vec!["flake8".to_string(), "{file}".to_string()],
            issues_on_exit_code: false,
        },
        LintTool {
            name: "black".to_string(),
            command: vec![
                "black".to_string(),
                "--check".to_string(),
                "--diff".to_string(),
                "{file}".to_string(),
            ],
            issues_on_exit_code: true,
        },
    ]
}

fn default_lint_timeout_secs() -> u64 {
    20
}

fn default_docker_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_max_memory() -> u64 {
    536_870_912
}

fn default_max_cpus() -> u32 {
    1
}

fn default_max_processes() -> u32 {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_low_score_percent() -> f64 {
    10.0
}

fn default_zero_module_ratio() -> f64 {
    0.5
}

fn default_extraction_error_limit() -> usize {
    3
}
