//! Typed output contracts for the five stages.
//!
//! A stage's raw model text is only accepted once [`StageContract::validate`]
//! turns it into the stage's output type. When every attempt fails,
//! [`StageContract::degraded`] supplies a deterministic stand-in so later
//! stages can still run.

use super::context::PipelineContext;
use super::prompts;
use crate::extractor::ScoreExtractor;
use crate::extractor::json::parse_json_object;
use crate::feedback::FeedbackSections;
use crate::feedback::auto_feedback::AutoFeedback;
use crate::types::{ExtractionMethod, ModuleScore, Stage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub trait StageContract: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    fn stage(&self) -> Stage;

    /// `(system, user)` prompt text.
    fn prompt(&self, ctx: &PipelineContext) -> (String, String);

    /// Turns raw model text into the output, or says why it cannot.
    fn validate(&self, raw: &str, ctx: &PipelineContext) -> Result<Self::Output, String>;

    /// The raw text to log and the output to pass on after retries run out.
    fn degraded(&self, ctx: &PipelineContext) -> (String, Self::Output);
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    let value = parse_json_object(raw).ok_or_else(|| "response is not a JSON object".to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// 1. Rubric analysis

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Met,
    #[serde(alias = "partially_met")]
    Partial,
    #[serde(alias = "unmet", alias = "not met")]
    NotMet,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionNote {
    pub criterion: String,
    pub status: CriterionStatus,
    #[serde(default)]
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricAnalysis {
    pub criteria: Vec<CriterionNote>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct RubricStage;

impl StageContract for RubricStage {
    type Output = RubricAnalysis;

    fn stage(&self) -> Stage {
        Stage::RubricAnalysis
    }

    fn prompt(&self, ctx: &PipelineContext) -> (String, String) {
        prompts::rubric(ctx)
    }

    fn validate(&self, raw: &str, _ctx: &PipelineContext) -> Result<RubricAnalysis, String> {
        let analysis: RubricAnalysis = decode(raw)?;
        if analysis.criteria.is_empty() {
            return Err("at least one rubric criterion is required".into());
        }
        if analysis.criteria.iter().any(|c| c.criterion.trim().is_empty()) {
            return Err("every criterion needs a name".into());
        }
        Ok(analysis)
    }

    fn degraded(&self, _ctx: &PipelineContext) -> (String, RubricAnalysis) {
        let value = RubricAnalysis {
            criteria: Vec::new(),
            summary: "Rubric analysis unavailable".into(),
        };
        (encode(&value), value)
    }
}

// ---------------------------------------------------------------------------
// 2. Test and quality synthesis

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestQualityAnalysis {
    #[serde(default)]
    pub failure_patterns: Vec<String>,
    #[serde(default)]
    pub style_issues: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct SynthesisStage;

impl StageContract for SynthesisStage {
    type Output = TestQualityAnalysis;

    fn stage(&self) -> Stage {
        Stage::TestQualitySynthesis
    }

    fn prompt(&self, ctx: &PipelineContext) -> (String, String) {
        prompts::synthesis(ctx)
    }

    fn validate(&self, raw: &str, _ctx: &PipelineContext) -> Result<TestQualityAnalysis, String> {
        let analysis: TestQualityAnalysis = decode(raw)?;
        if analysis.summary.trim().is_empty() {
            return Err("summary must not be empty".into());
        }
        Ok(analysis)
    }

    fn degraded(&self, ctx: &PipelineContext) -> (String, TestQualityAnalysis) {
        let (test, quality) = (&ctx.input.test, &ctx.input.quality);
        let value = TestQualityAnalysis {
            failure_patterns: AutoFeedback.failure_patterns(test),
            style_issues: AutoFeedback.style_issues(quality),
            summary: AutoFeedback.summary(test, quality),
        };
        (encode(&value), value)
    }
}

// ---------------------------------------------------------------------------
// 3. Feedback draft

#[derive(Debug, Default)]
pub struct FeedbackStage;

impl StageContract for FeedbackStage {
    type Output = FeedbackSections;

    fn stage(&self) -> Stage {
        Stage::FeedbackDraft
    }

    fn prompt(&self, ctx: &PipelineContext) -> (String, String) {
        prompts::feedback(ctx)
    }

    fn validate(&self, raw: &str, _ctx: &PipelineContext) -> Result<FeedbackSections, String> {
        let sections: FeedbackSections = decode(raw)?;
        if sections.is_blank() {
            return Err("all feedback sections are empty".into());
        }
        Ok(sections)
    }

    fn degraded(&self, ctx: &PipelineContext) -> (String, FeedbackSections) {
        let value = AutoFeedback.sections(&ctx.input.test, &ctx.input.quality);
        (encode(&value), value)
    }
}

// ---------------------------------------------------------------------------
// 4. Score computation

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion: String,
    pub points: f64,
    #[serde(default)]
    pub max_points: Option<f64>,
    #[serde(default)]
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutput {
    pub score: ModuleScore,
    /// Per-criterion breakdown when the model gave one.
    pub criteria: Vec<CriterionScore>,
}

pub struct ScoreStage {
    extractor: Arc<ScoreExtractor>,
}

impl ScoreStage {
    pub fn new(extractor: Arc<ScoreExtractor>) -> Self {
        Self { extractor }
    }

    fn output(&self, raw: &str, ctx: &PipelineContext) -> ScoreOutput {
        let module = ctx.module();
        let score = self
            .extractor
            .extract_text(&module.module_id, raw, module.max_points());
        let criteria = parse_json_object(raw)
            .and_then(|v| v.get("criteria").cloned())
            .and_then(|c| serde_json::from_value(c).ok())
            .unwrap_or_default();
        ScoreOutput { score, criteria }
    }
}

impl StageContract for ScoreStage {
    type Output = ScoreOutput;

    fn stage(&self) -> Stage {
        Stage::ScoreComputation
    }

    fn prompt(&self, ctx: &PipelineContext) -> (String, String) {
        prompts::score(ctx)
    }

    /// Accepted whenever a score can be read by JSON or regex.
    fn validate(&self, raw: &str, ctx: &PipelineContext) -> Result<ScoreOutput, String> {
        let output = self.output(raw, ctx);
        if output.score.method == ExtractionMethod::Fallback {
            return Err(format!(
                "no score between 0 and {} could be read from the response",
                ctx.module().max_points()
            ));
        }
        Ok(output)
    }

    /// Empty text resolves to the extractor's fallback score.
    fn degraded(&self, ctx: &PipelineContext) -> (String, ScoreOutput) {
        (String::new(), self.output("", ctx))
    }
}

// ---------------------------------------------------------------------------
// 5. Alignment

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentOutput {
    pub feedback: FeedbackSections,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Largest difference between the aligner's score and the extracted one.
pub const SCORE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Default)]
pub struct AlignmentStage;

impl StageContract for AlignmentStage {
    type Output = AlignmentOutput;

    fn stage(&self) -> Stage {
        Stage::Alignment
    }

    fn prompt(&self, ctx: &PipelineContext) -> (String, String) {
        prompts::alignment(ctx)
    }

    fn validate(&self, raw: &str, ctx: &PipelineContext) -> Result<AlignmentOutput, String> {
        let output: AlignmentOutput = decode(raw)?;
        if output.feedback.is_blank() {
            return Err("aligned feedback is empty".into());
        }
        if let (Some(aligned), Some(extracted)) = (output.score, ctx.score.as_ref()) {
            let awarded = extracted.value.score.awarded;
            if (aligned - awarded).abs() > SCORE_TOLERANCE {
                return Err(format!(
                    "aligned score {aligned} differs from the awarded score {awarded}; keep the score unchanged"
                ));
            }
        }
        Ok(output)
    }

    /// Passes the draft through unchanged.
    fn degraded(&self, ctx: &PipelineContext) -> (String, AlignmentOutput) {
        let feedback = ctx
            .draft
            .as_ref()
            .map(|d| d.value.clone())
            .unwrap_or_else(|| AutoFeedback.sections(&ctx.input.test, &ctx.input.quality));
        let value = AlignmentOutput {
            feedback,
            score: None,
            notes: Vec::new(),
        };
        (encode(&value), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::context::{StageOutcome, StageRecord, UnitInput};
    use crate::types::{ResponseStatus, UnitKey};
    use code_runner::{QualityResult, TestResult};
    use util::task_config::ModuleConfig;

    fn ctx() -> PipelineContext {
        PipelineContext::new(Arc::new(UnitInput {
            key: UnitKey::new("t", "s", "q1"),
            module: ModuleConfig::new("q1", "Sum a list", 5.0),
            code: Some("def total(xs): return sum(xs)".into()),
            test: TestResult::empty("q1", "No test file found"),
            quality: QualityResult {
                module_id: "q1".into(),
                style_issue_count: 0,
                complexity_score: 10.0,
                documentation_score: 3.0,
                unparseable: false,
                unparseable_reason: None,
                issues: Vec::new(),
                tools: Vec::new(),
            },
        }))
    }

    fn record(stage: Stage) -> StageRecord {
        StageRecord {
            stage,
            response_id: None,
            status: ResponseStatus::Accepted,
            attempts: 1,
            reused: false,
        }
    }

    #[test]
    fn rubric_requires_criteria() {
        let c = ctx();
        assert!(RubricStage.validate(r#"{"criteria": [], "summary": "x"}"#, &c).is_err());
        let ok = RubricStage
            .validate(
                "```json\n{\"criteria\": [{\"criterion\": \"sums\", \"status\": \"partially_met\"}]}\n```",
                &c,
            )
            .unwrap();
        assert_eq!(ok.criteria[0].status, CriterionStatus::Partial);
        assert!(RubricStage.validate("looks fine to me", &c).is_err());
    }

    #[test]
    fn synthesis_degrades_to_computed_summary() {
        let (raw, value) = SynthesisStage.degraded(&ctx());
        assert!(value.summary.starts_with("No tests ran"));
        assert_eq!(value.failure_patterns, vec!["No test file found".to_string()]);
        let back: TestQualityAnalysis = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn score_stage_accepts_prose_and_rejects_nonsense() {
        let stage = ScoreStage::new(Arc::new(ScoreExtractor::default()));
        let c = ctx();
        let prose = stage
            .validate("The student earned 4 out of 5 points for this section.", &c)
            .unwrap();
        assert_eq!(prose.score.method, ExtractionMethod::Regex);
        assert_eq!(prose.score.awarded, 4.0);

        let json = stage
            .validate(
                r#"{"criteria":[{"criterion":"sum","points":3,"max_points":5,"justification":"ok"}],"score":3,"max_score":5,"justification":"mostly right"}"#,
                &c,
            )
            .unwrap();
        assert_eq!(json.criteria.len(), 1);
        assert_eq!(json.score.justification, "mostly right");

        assert!(stage.validate("I am unable to grade this", &c).is_err());
        let (raw, degraded) = stage.degraded(&c);
        assert!(raw.is_empty());
        assert_eq!(degraded.score.method, ExtractionMethod::Fallback);
        assert_eq!(degraded.score.awarded, 0.0);
    }

    #[test]
    fn aligner_may_not_move_the_score() {
        let stage = ScoreStage::new(Arc::new(ScoreExtractor::default()));
        let base = ctx();
        let scored = base.with_score(StageOutcome {
            value: stage.validate(r#"{"score": 3}"#, &base).unwrap(),
            record: record(Stage::ScoreComputation),
        });
        let sections = r#"{"strengths":"a","test_analysis":"b","quality_issues":"c","suggestions":"d","examples":"e","closing":"f"}"#;

        let moved = format!(r#"{{"feedback": {sections}, "score": 4}}"#);
        let err = AlignmentStage.validate(&moved, &scored).unwrap_err();
        assert!(err.contains("differs"));

        let kept = format!(r#"{{"feedback": {sections}, "score": 3.0, "notes": ["softened praise"]}}"#);
        let ok = AlignmentStage.validate(&kept, &scored).unwrap();
        assert_eq!(ok.notes, vec!["softened praise".to_string()]);
    }

    #[test]
    fn alignment_degrades_to_the_draft() {
        let draft = FeedbackSections {
            strengths: "from the draft".into(),
            ..Default::default()
        };
        let c = ctx().with_draft(StageOutcome {
            value: draft.clone(),
            record: record(Stage::FeedbackDraft),
        });
        let (_, out) = AlignmentStage.degraded(&c);
        assert_eq!(out.feedback, draft);
        assert!(out.score.is_none());
    }
}
