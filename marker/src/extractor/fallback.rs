use crate::traits::extractor::{Extraction, ScoreStrategy};
use crate::types::ExtractionMethod;

pub const FALLBACK_JUSTIFICATION: &str =
    "Score could not be extracted from the model response; flagged for manual review";

/// Last link of the chain: always answers, always with zero.
#[derive(Debug, Default)]
pub struct FallbackStrategy;

impl ScoreStrategy for FallbackStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Fallback
    }

    fn try_extract(&self, _raw: &str, _max_score: f64) -> Option<Extraction> {
        Some(Extraction {
            awarded: 0.0,
            justification: FALLBACK_JUSTIFICATION.to_string(),
        })
    }
}
