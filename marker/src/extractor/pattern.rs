use crate::traits::extractor::{Extraction, ScoreStrategy};
use crate::types::ExtractionMethod;
use regex::Regex;
use std::sync::LazyLock;

const NUM: &str = r"(\d+(?:\.\d+)?)";

/// Natural-language score mentions, most specific first. Group 1 is the
/// awarded value; group 2, when present, the denominator it was given out of.
static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r#"(?i)\bscore["']?\s*[:=]?\s*{NUM}(?:\s*(?:/|out\s+of)\s*{NUM})?"#),
        format!(r"(?i){NUM}\s+out\s+of\s+{NUM}"),
        format!(r"(?i){NUM}\s*/\s*{NUM}"),
        format!(r#"(?i)\bawarded["']?\s*[:=]?\s*{NUM}"#),
        format!(r#"(?i)\btotal["']?\s*[:=]?\s*{NUM}"#),
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid score pattern"))
    .collect()
});

/// Maximum-score mentions in rubric text: "5 points", "(10 pts)", "x/20", "out of 15".
static MAX_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\((\d+)\s*pts?\)",
        r"(?i)(\d+)\s*points?\b",
        r"(?i)out\s+of\s+(\d+)",
        r"\d+\s*/\s*(\d+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid max pattern"))
    .collect()
});

const JUSTIFICATION_CHARS: usize = 500;

/// Ordered regex scan over free text.
///
/// A value given as a ratio ("8/10", "4 out of 5") is rescaled onto the
/// module's maximum. Candidates outside `[0, max]` are skipped, not clamped.
#[derive(Debug, Default)]
pub struct RegexStrategy;

impl ScoreStrategy for RegexStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Regex
    }

    fn try_extract(&self, raw: &str, max_score: f64) -> Option<Extraction> {
        for pattern in PATTERNS.iter() {
            for cap in pattern.captures_iter(raw) {
                let Some(value) = cap.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
                    continue;
                };
                let denominator = cap.get(2).and_then(|m| m.as_str().parse::<f64>().ok());
                let Some(awarded) = scale(value, denominator, max_score) else {
                    continue;
                };
                if (0.0..=max_score).contains(&awarded) {
                    return Some(Extraction {
                        awarded,
                        justification: excerpt(raw),
                    });
                }
            }
        }
        None
    }
}

fn scale(value: f64, denominator: Option<f64>, max_score: f64) -> Option<f64> {
    match denominator {
        None => Some(value),
        Some(d) if d <= 0.0 || value > d => None,
        Some(d) if (d - max_score).abs() < 1e-9 => Some(value),
        Some(d) => Some(value * max_score / d),
    }
}

fn excerpt(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= JUSTIFICATION_CHARS {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(JUSTIFICATION_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Recovers a maximum score stated in rubric text, if there is one.
pub fn infer_max_score(text: &str) -> Option<f64> {
    MAX_PATTERNS.iter().find_map(|p| {
        p.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| *v > 0.0)
    })
}
