use crate::types::ExtractionMethod;

/// A score found by one strategy, before it is turned into a `ModuleScore`.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub awarded: f64,
    pub justification: String,
}

/// One link in the score-extraction chain.
///
/// Returning `None` passes the text to the next strategy. Implementations must
/// be pure: the same text and maximum always give the same answer.
pub trait ScoreStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;

    /// `max_score` is finite and positive; any `Some` must lie in `[0, max_score]`.
    fn try_extract(&self, raw: &str, max_score: f64) -> Option<Extraction>;
}
