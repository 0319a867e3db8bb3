//! # Types Module
//!
//! Core records passed between the marking stages. Inputs ([`Submission`]) are
//! fixed before a run; [`AgentResponse`] and the sandbox results are append-only
//! log entries; [`ModuleScore`] is derived and can always be recomputed from the
//! log.

use chrono::{DateTime, Utc};
use code_runner::{QualityResult, TestResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// One student's code for one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    /// Blank when the platform export lost the student's identity.
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub task_id: String,
    /// Module id -> source text.
    pub files: BTreeMap<String, String>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(student_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            student_name: None,
            task_id: task_id.into(),
            files: BTreeMap::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.student_name = Some(name.into());
        self
    }

    pub fn with_file(mut self, module_id: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(module_id.into(), source.into());
        self
    }

    pub fn code_for(&self, module_id: &str) -> Option<&str> {
        self.files.get(module_id).map(String::as_str)
    }
}

/// Identifies one (student, module) unit of work within a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    pub task_id: String,
    pub student_id: String,
    pub module_id: String,
}

impl UnitKey {
    pub fn new(
        task_id: impl Into<String>,
        student_id: impl Into<String>,
        module_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            student_id: student_id.into(),
            module_id: module_id.into(),
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.task_id, self.student_id, self.module_id)
    }
}

/// The five model-backed stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RubricAnalysis,
    TestQualitySynthesis,
    FeedbackDraft,
    ScoreComputation,
    Alignment,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::RubricAnalysis,
        Stage::TestQualitySynthesis,
        Stage::FeedbackDraft,
        Stage::ScoreComputation,
        Stage::Alignment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::RubricAnalysis => "rubric_analysis",
            Stage::TestQualitySynthesis => "test_quality_synthesis",
            Stage::FeedbackDraft => "feedback_draft",
            Stage::ScoreComputation => "score_computation",
            Stage::Alignment => "alignment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Passed the stage's output contract.
    Accepted,
    /// The model answered but the answer broke the contract.
    Rejected,
    /// The model call itself failed (timeout, rate limit, transport).
    CallFailed,
    /// Retries ran out; `raw` holds the default handed downstream.
    Degraded,
}

/// Raw output of one attempt at one pipeline stage. Never mutated once logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub id: Uuid,
    pub run_id: Uuid,
    pub task_id: String,
    pub student_id: String,
    pub module_id: String,
    pub stage: Stage,
    pub raw: String,
    /// Retry count: 0 for the first attempt.
    pub attempt: u32,
    pub status: ResponseStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentResponse {
    pub fn new(
        key: &UnitKey,
        run_id: Uuid,
        stage: Stage,
        attempt: u32,
        status: ResponseStatus,
        raw: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            task_id: key.task_id.clone(),
            student_id: key.student_id.clone(),
            module_id: key.module_id.clone(),
            stage,
            raw: raw.into(),
            attempt,
            status,
            error,
            created_at: Utc::now(),
        }
    }
}

/// One line of a unit's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitEvent {
    TestResult { run_id: Uuid, result: TestResult },
    QualityResult { run_id: Uuid, result: QualityResult },
    AgentResponse(AgentResponse),
}

/// Which extraction strategy produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    DirectJson,
    Regex,
    Fallback,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMethod::DirectJson => "direct_json",
            ExtractionMethod::Regex => "regex",
            ExtractionMethod::Fallback => "fallback",
        })
    }
}

/// Numeric result for one module. Always `0 <= awarded <= maximum`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleScore {
    pub module_id: String,
    pub awarded: f64,
    pub maximum: f64,
    pub justification: String,
    pub method: ExtractionMethod,
    /// False when the fallback had to be used.
    pub success: bool,
    /// The score-stage response this was extracted from.
    #[serde(default)]
    pub response_id: Option<Uuid>,
}

/// A module whose unit could not run at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitFailure {
    pub module_id: String,
    pub reason: String,
}
