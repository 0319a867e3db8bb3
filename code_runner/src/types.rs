use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single test case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    /// Failure reason or captured output; empty for passing tests.
    #[serde(default)]
    pub output: String,
}

/// Structured outcome of running one module's tests against one submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub module_id: String,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub cases: Vec<TestCaseResult>,
    pub duration_ms: u64,
    pub timeout: bool,
    /// Set when the run could not produce per-test outcomes (crash, missing tests, launch failure).
    #[serde(default)]
    pub error: Option<String>,
}

impl TestResult {
    /// Builds a result from per-case outcomes so the counts always agree with `cases`.
    pub fn from_cases(
        module_id: &str,
        cases: Vec<TestCaseResult>,
        duration: Duration,
        timeout: bool,
        error: Option<String>,
    ) -> Self {
        let passed = cases.iter().filter(|c| c.passed).count() as u32;
        let total = cases.len() as u32;
        Self {
            module_id: module_id.to_string(),
            total,
            passed,
            failed: total - passed,
            cases,
            duration_ms: duration.as_millis() as u64,
            timeout,
            error,
        }
    }

    /// A result with no tests, carrying why none ran.
    pub fn empty(module_id: &str, error: impl Into<String>) -> Self {
        Self::from_cases(module_id, Vec::new(), Duration::ZERO, false, Some(error.into()))
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 / self.total as f64
        }
    }

    pub fn failing(&self) -> impl Iterator<Item = &TestCaseResult> {
        self.cases.iter().filter(|c| !c.passed)
    }
}

/// What the code-execution collaborator hands back before interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawTestOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    /// The process never started (missing interpreter, bad working dir).
    pub launch_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StyleIssue {
    pub tool: String,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Raw report from one static-analysis tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolReport {
    pub tool: String,
    pub has_issues: bool,
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Static-analysis outcome for one module.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityResult {
    pub module_id: String,
    pub style_issue_count: u32,
    /// 0..=10, higher means simpler control flow.
    pub complexity_score: f64,
    /// 0..=10, higher means better documented.
    pub documentation_score: f64,
    pub unparseable: bool,
    #[serde(default)]
    pub unparseable_reason: Option<String>,
    #[serde(default)]
    pub issues: Vec<StyleIssue>,
    #[serde(default)]
    pub tools: Vec<ToolReport>,
}
