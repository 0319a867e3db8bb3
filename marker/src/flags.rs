//! # Quality-Flagging Engine
//!
//! Deterministic heuristics that mark a submission for human review when its
//! results look more like a processing defect than genuine performance: almost
//! no marks, most modules at zero, no test ever passing, repeated extraction
//! failures, or missing identity/feedback. No model is involved and the engine
//! holds no state, so the same inputs always give the same flags.

use crate::scorer::ScoreSummary;
use code_runner::TestResult;
use serde::{Deserialize, Serialize};
use util::task_config::FlagThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    LowScore,
    ZeroPattern,
    TestFailurePattern,
    ExtractionErrors,
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub kind: FlagKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagReport {
    /// Ordered by kind.
    pub flags: Vec<QualityFlag>,
    pub summary_message: String,
}

impl FlagReport {
    pub fn has(&self, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.kind == kind)
    }

    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }
}

pub const PROBLEMS_HEADLINE: &str =
    "POTENTIAL SUBMISSION PROBLEMS - please check the original submission";
pub const NO_PROBLEMS: &str = "No submission problems detected";

/// Everything the rules look at.
#[derive(Debug, Clone, Copy)]
pub struct FlagInputs<'a> {
    pub summary: &'a ScoreSummary,
    pub test_results: &'a [TestResult],
    pub extraction_error_count: usize,
    pub student_id: Option<&'a str>,
    pub feedback_text: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct FlagEngine {
    thresholds: FlagThresholds,
}

impl FlagEngine {
    pub fn new(thresholds: FlagThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, inputs: &FlagInputs<'_>) -> FlagReport {
        let t = &self.thresholds;
        let summary = inputs.summary;
        let mut flags = Vec::new();

        if summary.percentage < t.low_score_percent {
            flags.push(QualityFlag {
                kind: FlagKind::LowScore,
                severity: Severity::Warning,
                message: format!("Very low total score ({:.1}%)", summary.percentage),
            });
        }

        let module_count = summary.modules.len();
        if module_count > 0 {
            let zeros = summary.zero_modules();
            let ratio = zeros as f64 / module_count as f64;
            if ratio >= t.zero_module_ratio {
                flags.push(QualityFlag {
                    kind: FlagKind::ZeroPattern,
                    severity: Severity::Warning,
                    message: format!(
                        "{zeros}/{module_count} modules scored zero ({:.1}%)",
                        ratio * 100.0
                    ),
                });
            }
        }

        let total_tests: u32 = inputs.test_results.iter().map(|r| r.total).sum();
        let passed_tests: u32 = inputs.test_results.iter().map(|r| r.passed).sum();
        if total_tests == 0 {
            flags.push(QualityFlag {
                kind: FlagKind::TestFailurePattern,
                severity: Severity::Warning,
                message: "No test results found".to_string(),
            });
        } else if passed_tests == 0 {
            flags.push(QualityFlag {
                kind: FlagKind::TestFailurePattern,
                severity: Severity::Warning,
                message: format!("All {total_tests} tests failed"),
            });
        }

        if inputs.extraction_error_count >= t.extraction_error_limit {
            flags.push(QualityFlag {
                kind: FlagKind::ExtractionErrors,
                severity: Severity::Critical,
                message: format!("{} score extraction errors", inputs.extraction_error_count),
            });
        }

        let mut missing = Vec::new();
        if inputs.student_id.is_none_or(|s| s.trim().is_empty()) {
            missing.push("Missing student information");
        }
        if inputs.feedback_text.is_none_or(|s| s.trim().is_empty()) {
            missing.push("Missing feedback text");
        }
        if !missing.is_empty() {
            flags.push(QualityFlag {
                kind: FlagKind::MissingData,
                severity: Severity::Critical,
                message: missing.join("; "),
            });
        }

        flags.sort_by_key(|f| f.kind);
        let summary_message = compose_message(&flags);
        FlagReport {
            flags,
            summary_message,
        }
    }
}

fn compose_message(flags: &[QualityFlag]) -> String {
    if flags.is_empty() {
        return NO_PROBLEMS.to_string();
    }
    let details: Vec<&str> = flags.iter().map(|f| f.message.as_str()).collect();
    format!("{PROBLEMS_HEADLINE}: {}", details.join("; "))
}
