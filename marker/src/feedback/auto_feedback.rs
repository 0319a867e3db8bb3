//! # AutoFeedback
//!
//! Template feedback built only from a module's [`TestResult`] and
//! [`QualityResult`]. It never calls a model, so it is what a unit falls back to
//! when the synthesis or feedback stages degrade, and it is where the
//! consistency policy gets its issue wording from.
//!
//! ## Overview
//!
//! - Passing tests and clean style become strengths.
//! - Failing tests are listed with their first line of failure output.
//! - Style, complexity and documentation problems become quality issues.
//! - Suggestions follow from whichever of the above went wrong.

use super::FeedbackSections;
use code_runner::{QualityResult, TestResult};

/// How many failing tests are named before the rest are summarised.
const MAX_LISTED_FAILURES: usize = 5;
const LOW_METRIC: f64 = 5.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoFeedback;

impl AutoFeedback {
    pub fn sections(&self, test: &TestResult, quality: &QualityResult) -> FeedbackSections {
        FeedbackSections {
            strengths: self.strengths(test, quality),
            test_analysis: self.test_analysis(test),
            quality_issues: self.quality_issues(quality),
            suggestions: self.suggestions(test, quality),
            examples: String::new(),
            closing: "This feedback was generated from automated checks only; \
                      a marker may add further comments."
                .to_string(),
        }
    }

    /// One-paragraph description of the test and quality outcome.
    pub fn summary(&self, test: &TestResult, quality: &QualityResult) -> String {
        let tests = if let Some(err) = test.error.as_deref().filter(|_| test.total == 0) {
            format!("No tests ran ({err}).")
        } else if test.timeout {
            format!("Tests timed out; {} of {} counted as failed.", test.failed, test.total)
        } else {
            format!("{} of {} tests passed.", test.passed, test.total)
        };
        let style = if quality.unparseable {
            format!(
                "Code could not be parsed ({}).",
                quality.unparseable_reason.as_deref().unwrap_or("unknown reason")
            )
        } else {
            format!(
                "{} style issue(s); complexity {:.1}/10, documentation {:.1}/10.",
                quality.style_issue_count, quality.complexity_score, quality.documentation_score
            )
        };
        format!("{tests} {style}")
    }

    /// Per-test failure lines, `name: reason`.
    pub fn failure_patterns(&self, test: &TestResult) -> Vec<String> {
        let mut lines: Vec<String> = test
            .failing()
            .map(|c| match first_line(&c.output) {
                Some(reason) => format!("{}: {reason}", c.name),
                None => format!("{}: failed", c.name),
            })
            .collect();
        if test.total == 0 {
            if let Some(err) = test.error.as_deref() {
                lines.push(err.to_string());
            }
        }
        lines
    }

    pub fn style_issues(&self, quality: &QualityResult) -> Vec<String> {
        let mut lines = Vec::new();
        if quality.unparseable {
            lines.push(format!(
                "Code is unparseable: {}",
                quality.unparseable_reason.as_deref().unwrap_or("unknown reason")
            ));
        }
        lines.extend(quality.issues.iter().map(|i| match (i.line, i.code.as_deref()) {
            (Some(line), Some(code)) => format!("{} line {line} {code}: {}", i.tool, i.message),
            (Some(line), None) => format!("{} line {line}: {}", i.tool, i.message),
            _ => format!("{}: {}", i.tool, i.message),
        }));
        lines
    }

    /// A sentence naming what went wrong, for feedback that has none.
    pub fn issue_mention(&self, test: &TestResult, quality: &QualityResult) -> String {
        if test.total == 0 {
            let reason = test.error.as_deref().unwrap_or("no tests were found");
            return format!("No tests could be run for this module ({reason}), so no functionality could be confirmed.");
        }
        if test.timeout {
            return "The tests timed out, so every test in this module failed.".to_string();
        }
        if test.failed > 0 {
            return format!("{} of {} tests failed.", test.failed, test.total);
        }
        if quality.unparseable {
            return "The code could not be parsed, which is a quality issue that needs fixing."
                .to_string();
        }
        if quality.style_issue_count > 0 {
            return format!("{} style issue(s) were reported.", quality.style_issue_count);
        }
        "The submission did not meet the rubric requirements; this is an issue to review."
            .to_string()
    }

    fn strengths(&self, test: &TestResult, quality: &QualityResult) -> String {
        let mut points = Vec::new();
        if test.total > 0 && test.passed == test.total {
            points.push(format!("- All {} tests passed.", test.total));
        } else if test.passed > 0 {
            points.push(format!("- {} of {} tests passed.", test.passed, test.total));
        }
        if !quality.unparseable {
            if quality.style_issue_count == 0 {
                points.push("- No style issues were reported.".to_string());
            }
            if quality.documentation_score >= 7.0 {
                points.push("- The code is well documented.".to_string());
            }
        }
        points.join("\n")
    }

    fn test_analysis(&self, test: &TestResult) -> String {
        let mut out = vec![self.summary_line(test)];
        let failures = self.failure_patterns(test);
        for line in failures.iter().take(MAX_LISTED_FAILURES) {
            out.push(format!("- {line}"));
        }
        if failures.len() > MAX_LISTED_FAILURES {
            out.push(format!("- ...and {} more", failures.len() - MAX_LISTED_FAILURES));
        }
        out.join("\n")
    }

    fn summary_line(&self, test: &TestResult) -> String {
        if test.total == 0 {
            format!(
                "No tests ran: {}.",
                test.error.as_deref().unwrap_or("no tests were found")
            )
        } else if test.timeout {
            format!("The tests timed out; all {} tests failed.", test.total)
        } else if test.failed == 0 {
            format!("All {} tests passed.", test.total)
        } else {
            format!("{} of {} tests failed.", test.failed, test.total)
        }
    }

    fn quality_issues(&self, quality: &QualityResult) -> String {
        let mut lines: Vec<String> = self
            .style_issues(quality)
            .into_iter()
            .take(MAX_LISTED_FAILURES)
            .map(|l| format!("- {l}"))
            .collect();
        if !quality.unparseable {
            if quality.complexity_score < LOW_METRIC {
                lines.push(format!(
                    "- High control-flow complexity (score {:.1}/10).",
                    quality.complexity_score
                ));
            }
            if quality.documentation_score < LOW_METRIC {
                lines.push(format!(
                    "- Sparse documentation (score {:.1}/10).",
                    quality.documentation_score
                ));
            }
        }
        lines.join("\n")
    }

    fn suggestions(&self, test: &TestResult, quality: &QualityResult) -> String {
        let mut out = Vec::new();
        if quality.unparseable {
            out.push("- Make sure the file runs without syntax errors before submitting.");
        }
        if test.timeout {
            out.push("- Check loops and recursion for cases that never terminate.");
        } else if test.failed > 0 {
            out.push("- Re-read the failing test names and check those cases by hand.");
        }
        if quality.style_issue_count > 0 {
            out.push("- Run a formatter and linter (black, flake8) over the code.");
        }
        if !quality.unparseable && quality.documentation_score < LOW_METRIC {
            out.push("- Add docstrings to functions describing inputs and outputs.");
        }
        out.join("\n")
    }
}

fn first_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).find(|l| !l.is_empty())
}
