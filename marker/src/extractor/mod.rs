//! # Score Extractor
//!
//! Turns a score-stage [`AgentResponse`] into a [`ModuleScore`] by walking an
//! ordered chain of [`ScoreStrategy`]s: direct JSON, then regex over free text,
//! then a zero-score fallback. The first strategy to answer wins and its method
//! is recorded on the score.
//!
//! Extraction is pure and never fails. Running it again on the same response
//! gives the same score, which is what lets scores be recomputed from the log.

pub mod fallback;
pub mod json;
pub mod pattern;

use crate::traits::extractor::{Extraction, ScoreStrategy};
use crate::types::{AgentResponse, ExtractionMethod, ModuleScore};
use tracing::debug;

pub use pattern::infer_max_score;

pub struct ScoreExtractor {
    strategies: Vec<Box<dyn ScoreStrategy>>,
}

impl Default for ScoreExtractor {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(json::JsonStrategy),
                Box::new(pattern::RegexStrategy),
                Box::new(fallback::FallbackStrategy),
            ],
        }
    }
}

impl ScoreExtractor {
    /// A chain with custom strategies. The fallback is always appended last.
    pub fn with_strategies(mut strategies: Vec<Box<dyn ScoreStrategy>>) -> Self {
        strategies.push(Box::new(fallback::FallbackStrategy));
        Self { strategies }
    }

    pub fn extract(&self, response: &AgentResponse, max_score_hint: f64) -> ModuleScore {
        let mut score = self.extract_text(&response.module_id, &response.raw, max_score_hint);
        score.response_id = Some(response.id);
        score
    }

    pub fn extract_text(&self, module_id: &str, raw: &str, max_score_hint: f64) -> ModuleScore {
        let usable_max = max_score_hint.is_finite() && max_score_hint > 0.0;
        let maximum = if usable_max { max_score_hint } else { 0.0 };

        let found = self
            .strategies
            .iter()
            .filter(|s| usable_max || s.method() == ExtractionMethod::Fallback)
            .find_map(|s| s.try_extract(raw, maximum).map(|e| (s.method(), e)));

        let (method, extraction) = found.unwrap_or_else(|| {
            (
                ExtractionMethod::Fallback,
                Extraction {
                    awarded: 0.0,
                    justification: fallback::FALLBACK_JUSTIFICATION.to_string(),
                },
            )
        });

        let awarded = round2(extraction.awarded.clamp(0.0, maximum));
        debug!(module = module_id, %method, awarded, maximum, "score extracted");

        ModuleScore {
            module_id: module_id.to_string(),
            awarded,
            maximum,
            justification: extraction.justification,
            method,
            success: method != ExtractionMethod::Fallback,
            response_id: None,
        }
    }
}

#[inline]
pub(crate) fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
