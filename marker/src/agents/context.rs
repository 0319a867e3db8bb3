//! Accumulating, immutable state of one unit's pass through the stages.

use super::stage::{AlignmentOutput, RubricAnalysis, ScoreOutput, TestQualityAnalysis};
use crate::feedback::FeedbackSections;
use crate::types::{ResponseStatus, Stage, UnitKey};
use code_runner::{QualityResult, TestResult};
use std::sync::Arc;
use util::task_config::ModuleConfig;
use uuid::Uuid;

/// Everything fixed before the first stage runs.
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub key: UnitKey,
    pub module: ModuleConfig,
    pub code: Option<String>,
    pub test: TestResult,
    pub quality: QualityResult,
}

/// Which logged response a stage's output came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage: Stage,
    /// `None` in replay when the output was recomputed rather than read.
    pub response_id: Option<Uuid>,
    /// `Accepted` or `Degraded`.
    pub status: ResponseStatus,
    /// Model attempts made in this run; 0 when reused from the log.
    pub attempts: u32,
    pub reused: bool,
}

impl StageRecord {
    pub fn degraded(&self) -> bool {
        self.status == ResponseStatus::Degraded
    }
}

#[derive(Debug, Clone)]
pub struct StageOutcome<T> {
    pub value: T,
    pub record: StageRecord,
}

/// Each `with_*` returns a new context; earlier outputs are never changed.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub input: Arc<UnitInput>,
    pub rubric: Option<Arc<StageOutcome<RubricAnalysis>>>,
    pub synthesis: Option<Arc<StageOutcome<TestQualityAnalysis>>>,
    pub draft: Option<Arc<StageOutcome<FeedbackSections>>>,
    pub score: Option<Arc<StageOutcome<ScoreOutput>>>,
    pub alignment: Option<Arc<StageOutcome<AlignmentOutput>>>,
}

impl PipelineContext {
    pub fn new(input: Arc<UnitInput>) -> Self {
        Self {
            input,
            rubric: None,
            synthesis: None,
            draft: None,
            score: None,
            alignment: None,
        }
    }

    pub fn with_rubric(&self, outcome: StageOutcome<RubricAnalysis>) -> Self {
        Self {
            rubric: Some(Arc::new(outcome)),
            ..self.clone()
        }
    }

    pub fn with_synthesis(&self, outcome: StageOutcome<TestQualityAnalysis>) -> Self {
        Self {
            synthesis: Some(Arc::new(outcome)),
            ..self.clone()
        }
    }

    pub fn with_draft(&self, outcome: StageOutcome<FeedbackSections>) -> Self {
        Self {
            draft: Some(Arc::new(outcome)),
            ..self.clone()
        }
    }

    pub fn with_score(&self, outcome: StageOutcome<ScoreOutput>) -> Self {
        Self {
            score: Some(Arc::new(outcome)),
            ..self.clone()
        }
    }

    pub fn with_alignment(&self, outcome: StageOutcome<AlignmentOutput>) -> Self {
        Self {
            alignment: Some(Arc::new(outcome)),
            ..self.clone()
        }
    }

    pub fn module(&self) -> &ModuleConfig {
        &self.input.module
    }

    pub fn records(&self) -> Vec<&StageRecord> {
        [
            self.rubric.as_ref().map(|o| &o.record),
            self.synthesis.as_ref().map(|o| &o.record),
            self.draft.as_ref().map(|o| &o.record),
            self.score.as_ref().map(|o| &o.record),
            self.alignment.as_ref().map(|o| &o.record),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn any_degraded(&self) -> bool {
        self.records().iter().any(|r| r.degraded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> Arc<UnitInput> {
        Arc::new(UnitInput {
            key: UnitKey::new("t", "s", "q1"),
            module: ModuleConfig::new("q1", "Sum a list (5 points)", 5.0),
            code: Some("def f(xs): return sum(xs)".into()),
            test: TestResult::empty("q1", "No test file found"),
            quality: QualityResult {
                module_id: "q1".into(),
                style_issue_count: 0,
                complexity_score: 10.0,
                documentation_score: 0.0,
                unparseable: false,
                unparseable_reason: None,
                issues: Vec::new(),
                tools: Vec::new(),
            },
        })
    }

    #[test]
    fn with_leaves_the_original_untouched() {
        let base = PipelineContext::new(input());
        let next = base.with_rubric(StageOutcome {
            value: RubricAnalysis {
                criteria: Vec::new(),
                summary: "unavailable".into(),
            },
            record: StageRecord {
                stage: Stage::RubricAnalysis,
                response_id: None,
                status: ResponseStatus::Degraded,
                attempts: 3,
                reused: false,
            },
        });
        assert!(base.rubric.is_none());
        assert!(next.rubric.is_some());
        assert!(next.any_degraded());
        assert!(!base.any_degraded());
        assert!(Arc::ptr_eq(&base.input, &next.input));
    }
}
