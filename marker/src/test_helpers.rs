//! A scripted [`LanguageModel`] for exercising the pipeline without a provider.
//!
//! Answers are looked up by stage, and optionally by module: queued answers are
//! used first, in order, then the stage's default.

use crate::traits::model::{LanguageModel, ModelError, Prompt};
use crate::types::Stage;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type Script = HashMap<(Stage, Option<String>), VecDeque<Result<String, ModelError>>>;

#[derive(Default)]
pub struct ScriptedModel {
    queued: Mutex<Script>,
    defaults: HashMap<(Stage, Option<String>), String>,
    prompts: Mutex<Vec<Prompt>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    /// A model with no answers; every call fails until something is scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Valid answers for every stage, scoring each module `awarded` out of `maximum`.
    pub fn well_behaved(awarded: f64, maximum: f64) -> Self {
        Self::new()
            .with_default(Stage::RubricAnalysis, rubric_json())
            .with_default(Stage::TestQualitySynthesis, synthesis_json())
            .with_default(Stage::FeedbackDraft, feedback_json())
            .with_default(Stage::ScoreComputation, score_json(awarded, maximum))
            .with_default(Stage::Alignment, alignment_json())
    }

    pub fn with_default(mut self, stage: Stage, raw: impl Into<String>) -> Self {
        self.defaults.insert((stage, None), raw.into());
        self
    }

    pub fn with_module_default(
        mut self,
        stage: Stage,
        module_id: &str,
        raw: impl Into<String>,
    ) -> Self {
        self.defaults
            .insert((stage, Some(module_id.to_string())), raw.into());
        self
    }

    /// Sleeps this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queues a one-off answer for `stage`, used before the default.
    pub fn push(&self, stage: Stage, answer: Result<String, ModelError>) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.entry((stage, None)).or_default().push_back(answer);
        }
    }

    pub fn then(self, stage: Stage, answer: Result<String, ModelError>) -> Self {
        self.push(stage, answer);
        self
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or_default()
    }

    pub fn calls_for(&self, stage: Stage) -> usize {
        self.prompts
            .lock()
            .map(|p| p.iter().filter(|x| x.stage == stage).count())
            .unwrap_or_default()
    }

    fn answer(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let module = Some(prompt.module_id.clone());
        if let Ok(mut queued) = self.queued.lock() {
            for key in [(prompt.stage, module.clone()), (prompt.stage, None)] {
                if let Some(answer) = queued.get_mut(&key).and_then(VecDeque::pop_front) {
                    return answer;
                }
            }
        }
        self.defaults
            .get(&(prompt.stage, module))
            .or_else(|| self.defaults.get(&(prompt.stage, None)))
            .cloned()
            .ok_or_else(|| ModelError::Transport(format!("no scripted answer for {}", prompt.stage)))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ModelError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer(prompt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn rubric_json() -> String {
    json!({
        "criteria": [
            {"criterion": "Correctness", "status": "partial", "evidence": "Handles the common case."}
        ],
        "summary": "Mostly complete."
    })
    .to_string()
}

pub fn synthesis_json() -> String {
    json!({
        "failure_patterns": ["Empty input is not handled"],
        "style_issues": [],
        "summary": "Most tests pass; the empty-list case fails."
    })
    .to_string()
}

pub fn feedback_json() -> String {
    json!({
        "strengths": "The main loop is clear.",
        "test_analysis": "test_empty failed because an empty list raises an error.",
        "quality_issues": "No style issues were found.",
        "suggestions": "Return 0 for an empty list.",
        "examples": "if not xs: return 0",
        "closing": "Good progress."
    })
    .to_string()
}

pub fn score_json(awarded: f64, maximum: f64) -> String {
    json!({
        "criteria": [
            {"criterion": "Correctness", "points": awarded, "max_points": maximum, "justification": "Per test results."}
        ],
        "score": awarded,
        "max_score": maximum,
        "justification": "Awarded according to the passing tests."
    })
    .to_string()
}

pub fn alignment_json() -> String {
    json!({
        "feedback": serde_json::from_str::<serde_json::Value>(&feedback_json()).unwrap_or_default(),
        "notes": []
    })
    .to_string()
}
