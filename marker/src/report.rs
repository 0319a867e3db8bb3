//! # Report Module
//!
//! Shape assembly for the final per-student record. [`compose`] joins the
//! score summary, feedback and flags with the evidence they were derived from
//! into one [`FinalAssessment`]; it makes no grading decisions of its own.
//!
//! ## JSON Output Example
//!
//! Wrapped in an [`AssessmentResponse`] the record serialises as:
//!
//! ```json
//! {
//!   "success": true,
//!   "message": "Grading complete.",
//!   "data": {
//!     "student_id": "u123",
//!     "task_id": "prac1",
//!     "summary": { "total_awarded": 8.0, "total_possible": 15.0, "percentage": 53.33, ... },
//!     "feedback_text": "# Feedback for u123: prac1 ...",
//!     "flags": [],
//!     "flag_summary": "No submission problems detected",
//!     ...
//!   }
//! }
//! ```

use crate::feedback::Feedback;
use crate::flags::{FlagReport, QualityFlag};
use crate::scorer::ScoreSummary;
use crate::types::{Submission, UnitFailure};
use chrono::{DateTime, Utc};
use code_runner::{QualityResult, TestResult};
use serde::{Deserialize, Serialize};

/// Sandbox outputs and failed units carried into the record for reviewers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Evidence {
    pub test_results: Vec<TestResult>,
    pub quality_results: Vec<QualityResult>,
    pub unit_failures: Vec<UnitFailure>,
}

/// Everything downstream renderers need about one student on one task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalAssessment {
    pub student_id: String,
    #[serde(default)]
    pub student_name: Option<String>,
    pub task_id: String,
    pub summary: ScoreSummary,
    pub feedback: Feedback,
    /// `feedback` rendered in its requested format.
    pub feedback_text: String,
    pub flags: Vec<QualityFlag>,
    pub flag_summary: String,
    pub test_results: Vec<TestResult>,
    pub quality_results: Vec<QualityResult>,
    /// Modules that could not be graded; not part of `summary`.
    pub unit_failures: Vec<UnitFailure>,
    pub generated_at: DateTime<Utc>,
}

impl FinalAssessment {
    pub fn needs_review(&self) -> bool {
        !self.flags.is_empty() || !self.unit_failures.is_empty()
    }
}

pub fn compose(
    submission: &Submission,
    summary: ScoreSummary,
    feedback: Feedback,
    flags: FlagReport,
    evidence: Evidence,
) -> FinalAssessment {
    let feedback_text = feedback.render();
    FinalAssessment {
        student_id: submission.student_id.clone(),
        student_name: submission.student_name.clone(),
        task_id: submission.task_id.clone(),
        summary,
        feedback,
        feedback_text,
        flags: flags.flags,
        flag_summary: flags.summary_message,
        test_results: evidence.test_results,
        quality_results: evidence.quality_results,
        unit_failures: evidence.unit_failures,
        generated_at: Utc::now(),
    }
}

/// Envelope for consumers that expect `{success, message, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResponse {
    pub success: bool,
    pub message: String,
    pub data: FinalAssessment,
}

impl From<FinalAssessment> for AssessmentResponse {
    fn from(assessment: FinalAssessment) -> Self {
        let message = if assessment.needs_review() {
            "Grading complete with warnings."
        } else {
            "Grading complete."
        };
        AssessmentResponse {
            success: true,
            message: message.to_string(),
            data: assessment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{FlagEngine, FlagInputs, FlagKind};
    use crate::types::{ExtractionMethod, ModuleScore};
    use serde_json::Value;
    use util::task_config::{FeedbackFormat, FlagThresholds};

    fn summary(awarded: f64) -> ScoreSummary {
        ScoreSummary::from_scores(vec![ModuleScore {
            module_id: "q1".into(),
            awarded,
            maximum: 10.0,
            justification: "ok".into(),
            method: ExtractionMethod::DirectJson,
            success: true,
            response_id: None,
        }])
    }

    fn flags_for(s: &ScoreSummary, tests: &[TestResult]) -> FlagReport {
        FlagEngine::new(FlagThresholds::default()).evaluate(&FlagInputs {
            summary: s,
            test_results: tests,
            extraction_error_count: s.extraction_error_count,
            student_id: Some("u1"),
            feedback_text: Some("text"),
        })
    }

    #[test]
    fn test_response_serialization() {
        let submission = Submission::new("u1", "prac1").with_name("Ada");
        let s = summary(8.0);
        let tests = vec![TestResult::from_cases(
            "q1",
            vec![code_runner::TestCaseResult {
                name: "test_a".into(),
                passed: true,
                output: String::new(),
            }],
            std::time::Duration::ZERO,
            false,
            None,
        )];
        let flags = flags_for(&s, &tests);
        let assessment = compose(
            &submission,
            s,
            Feedback::new("Feedback for u1: prac1", FeedbackFormat::Text),
            flags,
            Evidence {
                test_results: tests,
                ..Default::default()
            },
        );
        assert!(assessment.feedback_text.starts_with("Feedback for u1: prac1"));
        assert!(!assessment.feedback_text.contains('#'));

        let response: AssessmentResponse = assessment.into();
        let value: Value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "Grading complete.");
        assert_eq!(value["data"]["student_id"], "u1");
        assert_eq!(value["data"]["student_name"], "Ada");
        assert_eq!(value["data"]["summary"]["total_awarded"], 8.0);
        assert_eq!(value["data"]["summary"]["percentage"], 80.0);
        assert_eq!(value["data"]["flag_summary"], "No submission problems detected");
    }

    #[test]
    fn test_warnings_change_message() {
        let submission = Submission::new("u1", "prac1");
        let s = summary(0.0);
        let flags = flags_for(&s, &[]);
        assert!(flags.has(FlagKind::LowScore));

        let response: AssessmentResponse = compose(
            &submission,
            s,
            Feedback::new("h", FeedbackFormat::Markdown),
            flags,
            Evidence::default(),
        )
        .into();
        assert_eq!(response.message, "Grading complete with warnings.");
        assert!(response.data.flag_summary.starts_with("POTENTIAL SUBMISSION PROBLEMS"));
        assert_eq!(response.data.flags.len(), 3);
    }
}
