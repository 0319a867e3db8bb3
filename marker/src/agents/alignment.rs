//! Deterministic score/feedback consistency policy, applied after the aligner.
//!
//! The aligner is a model and can still leave feedback that contradicts the
//! score. This pass enforces two rules and records a note for each change:
//!
//! - a zero score must come with at least one test or quality issue mention;
//! - a score below the maximum must come with some issue or suggestion.

use crate::feedback::auto_feedback::AutoFeedback;
use crate::feedback::{AlignmentNote, FeedbackSections, NoteSource};
use crate::types::ModuleScore;
use code_runner::{QualityResult, TestResult};

pub fn enforce_consistency(
    mut feedback: FeedbackSections,
    score: &ModuleScore,
    test: &TestResult,
    quality: &QualityResult,
) -> (FeedbackSections, Vec<AlignmentNote>) {
    let mut notes = Vec::new();

    if score.awarded == 0.0 && !feedback.mentions_issue() {
        let mention = AutoFeedback.issue_mention(test, quality);
        prepend(&mut feedback.test_analysis, &mention);
        notes.push(AlignmentNote::new(
            NoteSource::Policy,
            "Score is zero but the feedback named no problem; added the test/quality issue.",
        ));
    }

    if score.awarded < score.maximum && !feedback.mentions_issue() && !feedback.has_suggestions() {
        let justification = score.justification.trim();
        let suggestion = if justification.is_empty() {
            format!(
                "Review the rubric: {} of {} points were awarded.",
                score.awarded, score.maximum
            )
        } else {
            justification.to_string()
        };
        prepend(&mut feedback.suggestions, &suggestion);
        notes.push(AlignmentNote::new(
            NoteSource::Policy,
            "Score is below the maximum but the feedback gave no reason; added the score justification.",
        ));
    }

    (feedback, notes)
}

fn prepend(section: &mut String, line: &str) {
    if section.trim().is_empty() {
        *section = line.to_string();
    } else {
        *section = format!("{line}\n\n{section}");
    }
}
