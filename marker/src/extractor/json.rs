use crate::traits::extractor::{Extraction, ScoreStrategy};
use crate::types::ExtractionMethod;
use serde_json::Value;

/// Removes a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (e.g. "json") on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The first balanced `{...}` in `text`, ignoring braces inside JSON strings.
pub fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses model output as a JSON object: the whole text first, then the first
/// embedded object.
pub fn parse_json_object(raw: &str) -> Option<Value> {
    let text = strip_code_fences(raw);
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let candidate = first_json_object(text)?;
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Accepts a JSON object with a numeric `score` inside `[0, max]`.
#[derive(Debug, Default)]
pub struct JsonStrategy;

impl ScoreStrategy for JsonStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::DirectJson
    }

    fn try_extract(&self, raw: &str, max_score: f64) -> Option<Extraction> {
        let value = parse_json_object(raw)?;
        let score = value.get("score")?.as_f64()?;
        if !score.is_finite() || score < 0.0 || score > max_score {
            return None;
        }
        let justification = ["justification", "feedback", "reasoning"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("No justification provided")
            .to_string();

        Some(Extraction {
            awarded: score,
            justification,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn embedded_object_is_found_past_prose() {
        let text = r#"Here you go: {"score": 3, "note": "a } in a string"} thanks"#;
        assert_eq!(
            first_json_object(text),
            Some(r#"{"score": 3, "note": "a } in a string"}"#)
        );
        assert_eq!(first_json_object("{ unclosed"), None);
    }

    #[test]
    fn accepts_score_in_range() {
        let got = JsonStrategy
            .try_extract(r#"{"score": 4.5, "justification": "Good work"}"#, 5.0)
            .unwrap();
        assert_eq!(got.awarded, 4.5);
        assert_eq!(got.justification, "Good work");
    }

    #[test]
    fn rejects_out_of_range_and_non_numeric() {
        assert!(JsonStrategy.try_extract(r#"{"score": 7}"#, 5.0).is_none());
        assert!(JsonStrategy.try_extract(r#"{"score": -1}"#, 5.0).is_none());
        assert!(JsonStrategy.try_extract(r#"{"score": "4"}"#, 5.0).is_none());
        assert!(JsonStrategy.try_extract(r#"[4]"#, 5.0).is_none());
    }

    #[test]
    fn missing_justification_gets_placeholder() {
        let got = JsonStrategy.try_extract("```json\n{\"score\": 2}\n```", 5.0).unwrap();
        assert_eq!(got.justification, "No justification provided");
    }
}
