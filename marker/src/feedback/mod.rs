//! # Feedback Module
//!
//! The narrative half of an assessment. Each module gets six fixed
//! [`FeedbackSections`], produced by the feedback-draft stage, reconciled by the
//! aligner and finally checked by the deterministic consistency policy. Any
//! adjustment made on the way is kept as an [`AlignmentNote`].
//!
//! - [`auto_feedback`]: template feedback built from test and quality results,
//!   used whenever a model stage degrades.
//! - [`render`]: markdown, HTML and plain-text output.

pub mod auto_feedback;
pub mod render;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use util::task_config::FeedbackFormat;

/// The six fixed feedback sections.
///
/// Every key is required when decoding model output, which is what the
/// feedback stage validates against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedbackSections {
    #[serde(alias = "positives")]
    pub strengths: String,
    pub test_analysis: String,
    pub quality_issues: String,
    pub suggestions: String,
    #[serde(alias = "improvement_examples")]
    pub examples: String,
    pub closing: String,
}

/// Words that count as naming a test or quality problem.
const ISSUE_MARKERS: &[&str] = &[
    "fail", "error", "issue", "incorrect", "missing", "timed out", "timeout", "crash",
    "not pass", "did not", "does not", "could not", "no test", "unparseable", "problem",
    "wrong", "violation", "bug", "inconsisten", "lacks", "lacking", "too long", "sparse", "unused",
    "undefined",
];

/// Praise phrased as an absence of problems: "no issues found", "zero
/// failures", "without any errors", "error-free", "nothing is wrong".
static NEGATED_ISSUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \b(?:no|not|zero|0|without|never|free\s+of)
          (?:\s+(?:any|a|single|major|minor|obvious|real|serious|significant|remaining|other
                  |further|more|known|reported|style|lint|linting|syntax|runtime|test|tests
                  |have|has|had|show|shows|contain|contains|find|found|see))*
          \s+(?:issue|problem|error|fail|mistake|bug|crash|time\s?out|violation)[a-z]*
        | \b(?:issue|problem|error|bug)[\s-]free\b
        | \bnothing\s+(?:(?:is|was|seems)\s+)?(?:wrong|missing|incorrect)\b
        ",
    )
    .expect("valid negated issue pattern")
});

impl FeedbackSections {
    pub fn is_blank(&self) -> bool {
        [
            &self.strengths,
            &self.test_analysis,
            &self.quality_issues,
            &self.suggestions,
            &self.examples,
            &self.closing,
        ]
        .iter()
        .all(|s| s.trim().is_empty())
    }

    /// True when the test-analysis or quality section names at least one problem.
    ///
    /// Denials such as "no issues found" do not count.
    pub fn mentions_issue(&self) -> bool {
        let text = format!("{}\n{}", self.test_analysis, self.quality_issues).to_lowercase();
        let text = NEGATED_ISSUES.replace_all(&text, " ");
        ISSUE_MARKERS.iter().any(|m| text.contains(m))
    }

    pub fn has_suggestions(&self) -> bool {
        !self.suggestions.trim().is_empty() || !self.examples.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSource {
    /// Reported by the alignment stage.
    Aligner,
    /// Applied by the deterministic consistency policy.
    Policy,
    /// A stage degraded and template output was used.
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlignmentNote {
    pub source: NoteSource,
    pub message: String,
}

impl AlignmentNote {
    pub fn new(source: NoteSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleFeedback {
    pub module_id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// `(awarded, maximum)` shown next to the heading.
    #[serde(default)]
    pub score: Option<(f64, f64)>,
    pub sections: FeedbackSections,
    #[serde(default)]
    pub notes: Vec<AlignmentNote>,
    /// Set when any model stage for this module degraded.
    #[serde(default)]
    pub degraded: bool,
}

impl ModuleFeedback {
    pub fn heading(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.module_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub heading: String,
    pub modules: Vec<ModuleFeedback>,
    pub format: FeedbackFormat,
}

impl Feedback {
    pub fn new(heading: impl Into<String>, format: FeedbackFormat) -> Self {
        Self {
            heading: heading.into(),
            modules: Vec::new(),
            format,
        }
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleFeedback> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    /// Renders in the feedback's own format.
    pub fn render(&self) -> String {
        self.render_as(self.format)
    }

    pub fn render_as(&self, format: FeedbackFormat) -> String {
        let markdown = render::markdown(self);
        match format {
            FeedbackFormat::Markdown => markdown,
            FeedbackFormat::Html => render::html(&self.heading, &markdown),
            FeedbackFormat::Text => render::text(&markdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_are_accepted() {
        let json = r#"{
            "positives": "Clear names",
            "test_analysis": "2 of 3 tests failed",
            "quality_issues": "",
            "suggestions": "Handle empty input",
            "improvement_examples": "if not xs: return 0",
            "closing": "Keep going"
        }"#;
        let s: FeedbackSections = serde_json::from_str(json).unwrap();
        assert_eq!(s.strengths, "Clear names");
        assert_eq!(s.examples, "if not xs: return 0");
        assert!(s.mentions_issue());
    }

    #[test]
    fn missing_section_is_rejected() {
        let json = r#"{"strengths": "ok", "test_analysis": "", "closing": ""}"#;
        assert!(serde_json::from_str::<FeedbackSections>(json).is_err());
    }

    #[test]
    fn praise_only_has_no_issue_mention() {
        let s = FeedbackSections {
            strengths: "Excellent work".into(),
            test_analysis: "Great job overall".into(),
            closing: "Well done".into(),
            ..Default::default()
        };
        assert!(!s.mentions_issue());
        assert!(!s.has_suggestions());
        assert!(!s.is_blank());
    }

    fn analysis(test_analysis: &str, quality_issues: &str) -> FeedbackSections {
        FeedbackSections {
            test_analysis: test_analysis.into(),
            quality_issues: quality_issues.into(),
            ..Default::default()
        }
    }

    #[test]
    fn denied_problems_are_not_issue_mentions() {
        for (tests, quality) in [
            ("All requirements handled, no problems at all.", "No issues found; style is impeccable."),
            ("Every test passed with zero failures.", "The code is error-free."),
            ("Ran without any errors.", "Nothing is wrong with the formatting."),
            ("0 errors reported.", "No style issues were found."),
            ("The tests do not show any problems.", ""),
        ] {
            assert!(!analysis(tests, quality).mentions_issue(), "{tests} / {quality}");
        }
    }

    #[test]
    fn real_problems_survive_nearby_denials() {
        for (tests, quality) in [
            ("No issues with naming, but 2 of 3 tests failed.", ""),
            ("The function does not handle errors.", ""),
            ("", "No docstrings; 3 style violations reported."),
            ("No tests could be run for this module.", ""),
        ] {
            assert!(analysis(tests, quality).mentions_issue(), "{tests} / {quality}");
        }
    }
}
