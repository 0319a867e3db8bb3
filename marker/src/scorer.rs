//! # Scorer Module
//!
//! Aggregates per-module [`ModuleScore`]s into a student's [`ScoreSummary`].
//! The summary is always rebuilt from the full list of scores, never patched in
//! place, so `total_awarded` is the sum of the module scores by construction.

use crate::extractor::round2;
use crate::types::{ExtractionMethod, ModuleScore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreSummary {
    pub total_awarded: f64,
    pub total_possible: f64,
    /// 0-100; zero when nothing was gradable.
    pub percentage: f64,
    /// Modules whose score came from the fallback extractor.
    pub extraction_error_count: usize,
    pub modules: Vec<ModuleScore>,
}

impl ScoreSummary {
    /// Builds the summary from module scores.
    ///
    /// # Example
    ///
    /// ```
    /// use marker::scorer::ScoreSummary;
    /// use marker::types::{ExtractionMethod, ModuleScore};
    ///
    /// let score = |id: &str, awarded: f64| ModuleScore {
    ///     module_id: id.into(),
    ///     awarded,
    ///     maximum: 5.0,
    ///     justification: String::new(),
    ///     method: ExtractionMethod::DirectJson,
    ///     success: true,
    ///     response_id: None,
    /// };
    ///
    /// let summary = ScoreSummary::from_scores(vec![score("q1", 5.0), score("q2", 0.0), score("q3", 3.0)]);
    /// assert_eq!(summary.total_awarded, 8.0);
    /// assert_eq!(summary.total_possible, 15.0);
    /// assert_eq!(summary.percentage, 53.33);
    /// ```
    pub fn from_scores(modules: Vec<ModuleScore>) -> Self {
        let total_awarded: f64 = modules.iter().map(|m| m.awarded).sum();
        let total_possible: f64 = modules.iter().map(|m| m.maximum).sum();
        let percentage = if total_possible > 0.0 {
            total_awarded / total_possible * 100.0
        } else {
            0.0
        };
        let extraction_error_count = modules
            .iter()
            .filter(|m| m.method == ExtractionMethod::Fallback)
            .count();

        Self {
            total_awarded: round2(total_awarded),
            total_possible: round2(total_possible),
            percentage: round2(percentage),
            extraction_error_count,
            modules,
        }
    }

    pub fn zero_modules(&self) -> usize {
        self.modules.iter().filter(|m| m.awarded == 0.0).count()
    }

    pub fn module(&self, module_id: &str) -> Option<&ModuleScore> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(id: &str, awarded: f64, maximum: f64, method: ExtractionMethod) -> ModuleScore {
        ModuleScore {
            module_id: id.to_string(),
            awarded,
            maximum,
            justification: String::new(),
            method,
            success: method != ExtractionMethod::Fallback,
            response_id: None,
        }
    }

    /// Tests the three-module example: 5/5, 0/5, 3/5.
    #[test]
    fn test_mixed_scores() {
        let summary = ScoreSummary::from_scores(vec![
            score("q1", 5.0, 5.0, ExtractionMethod::DirectJson),
            score("q2", 0.0, 5.0, ExtractionMethod::DirectJson),
            score("q3", 3.0, 5.0, ExtractionMethod::Regex),
        ]);
        assert_eq!(summary.total_awarded, 8.0);
        assert_eq!(summary.total_possible, 15.0);
        assert!((summary.percentage - 53.33).abs() < 0.01);
        assert_eq!(summary.extraction_error_count, 0);
        assert_eq!(summary.zero_modules(), 1);
    }

    /// Tests that an empty list yields zeros rather than NaN.
    #[test]
    fn test_empty() {
        let summary = ScoreSummary::from_scores(Vec::new());
        assert_eq!(summary.total_possible, 0.0);
        assert_eq!(summary.percentage, 0.0);
    }

    /// Tests that fallback extractions are counted.
    #[test]
    fn test_counts_fallbacks() {
        let summary = ScoreSummary::from_scores(vec![
            score("q1", 0.0, 10.0, ExtractionMethod::Fallback),
            score("q2", 0.0, 10.0, ExtractionMethod::Fallback),
            score("q3", 7.5, 10.0, ExtractionMethod::Regex),
        ]);
        assert_eq!(summary.extraction_error_count, 2);
        assert_eq!(summary.total_awarded, 7.5);
        assert_eq!(summary.percentage, 25.0);
    }

    /// Tests that rebuilding from the same scores is idempotent.
    #[test]
    fn test_recompute_is_stable() {
        let scores = vec![
            score("q1", 1.25, 2.0, ExtractionMethod::DirectJson),
            score("q2", 0.5, 3.0, ExtractionMethod::Regex),
        ];
        let a = ScoreSummary::from_scores(scores.clone());
        let b = ScoreSummary::from_scores(a.modules.clone());
        assert_eq!(a, b);
        assert_eq!(
            a.total_awarded,
            a.modules.iter().map(|m| m.awarded).sum::<f64>()
        );
    }
}
