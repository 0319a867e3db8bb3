//! # Agent Pipeline
//!
//! Five model-backed stages run in a fixed order for one (student, module)
//! unit: rubric analysis, test/quality synthesis, feedback draft, score
//! computation and alignment. Each stage's output is validated against its
//! [`StageContract`] before it is accepted; rejected answers and failed calls
//! are retried with backoff, and a stage that never succeeds degrades to a
//! deterministic default rather than stopping the unit.
//!
//! Every attempt is appended to the unit's [`ResponseLog`] before the pipeline
//! moves on, which is what makes [`RunMode::Resume`] and [`RunMode::Replay`]
//! possible.

pub mod alignment;
pub mod context;
pub mod prompts;
pub mod retry;
pub mod stage;

use crate::error::MarkerError;
use crate::extractor::ScoreExtractor;
use crate::feedback::{AlignmentNote, ModuleFeedback, NoteSource};
use crate::traits::model::{LanguageModel, ModelError, Prompt};
use crate::traits::response_log::ResponseLog;
use crate::types::{AgentResponse, ModuleScore, ResponseStatus, Stage, UnitEvent};
use context::{PipelineContext, StageOutcome, StageRecord, UnitInput};
use retry::RetryPolicy;
use stage::{AlignmentStage, FeedbackStage, RubricStage, ScoreStage, StageContract, SynthesisStage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How a unit treats responses already in its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Always ask the model.
    #[default]
    Fresh,
    /// Reuse each stage's latest accepted response; ask the model only for the rest.
    Resume,
    /// Rebuild from the log alone. No model calls, nothing appended.
    Replay,
}

/// Result of one unit's pass through the stages.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub score: ModuleScore,
    pub feedback: ModuleFeedback,
    pub context: PipelineContext,
}

#[derive(Clone)]
pub struct AgentPipeline {
    model: Arc<dyn LanguageModel>,
    log: Arc<dyn ResponseLog>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    extractor: Arc<ScoreExtractor>,
    temperature: f32,
    call_timeout: Duration,
    run_id: Uuid,
}

impl AgentPipeline {
    pub fn new(model: Arc<dyn LanguageModel>, log: Arc<dyn ResponseLog>) -> Self {
        Self {
            model,
            log,
            policy: RetryPolicy::default(),
            permits: Arc::new(Semaphore::new(4)),
            extractor: Arc::new(ScoreExtractor::default()),
            temperature: 0.1,
            call_timeout: Duration::from_secs(60),
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Shares a model-call limit with other pipelines.
    pub fn with_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = permits;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<ScoreExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Runs the five stages for one unit.
    ///
    /// `prior` holds the unit's logged events and is only consulted in
    /// resume and replay modes.
    #[instrument(skip_all, fields(unit = %input.key, mode = ?mode))]
    pub async fn run(
        &self,
        input: Arc<UnitInput>,
        prior: &[UnitEvent],
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, MarkerError> {
        let ctx = PipelineContext::new(input);

        let out = self.run_stage(&RubricStage, &ctx, prior, mode, cancel).await?;
        let ctx = ctx.with_rubric(out);

        let out = self.run_stage(&SynthesisStage, &ctx, prior, mode, cancel).await?;
        let ctx = ctx.with_synthesis(out);

        let out = self.run_stage(&FeedbackStage, &ctx, prior, mode, cancel).await?;
        let ctx = ctx.with_draft(out);

        let score_stage = ScoreStage::new(Arc::clone(&self.extractor));
        let score = self.run_stage(&score_stage, &ctx, prior, mode, cancel).await?;
        let ctx = ctx.with_score(score.clone());

        let aligned = self.run_stage(&AlignmentStage, &ctx, prior, mode, cancel).await?;
        let ctx = ctx.with_alignment(aligned.clone());

        Ok(self.finish(ctx, &score, &aligned))
    }

    fn finish(
        &self,
        ctx: PipelineContext,
        score: &StageOutcome<stage::ScoreOutput>,
        aligned: &StageOutcome<stage::AlignmentOutput>,
    ) -> UnitOutcome {
        let input = Arc::clone(&ctx.input);
        let mut score_value = score.value.score.clone();
        score_value.response_id = score.record.response_id;

        let mut notes: Vec<AlignmentNote> = aligned
            .value
            .notes
            .iter()
            .filter(|n| !n.trim().is_empty())
            .map(|n| AlignmentNote::new(NoteSource::Aligner, n.trim()))
            .collect();
        for record in ctx.records().into_iter().filter(|r| r.degraded()) {
            notes.push(AlignmentNote::new(
                NoteSource::Degraded,
                format!("The {} stage failed and automated defaults were used.", record.stage),
            ));
        }

        let (sections, policy_notes) = alignment::enforce_consistency(
            aligned.value.feedback.clone(),
            &score_value,
            &input.test,
            &input.quality,
        );
        notes.extend(policy_notes);

        let feedback = ModuleFeedback {
            module_id: input.module.module_id.clone(),
            title: input.module.title.clone(),
            score: Some((score_value.awarded, score_value.maximum)),
            sections,
            notes,
            degraded: ctx.any_degraded(),
        };
        info!(
            awarded = score_value.awarded,
            maximum = score_value.maximum,
            method = %score_value.method,
            degraded = feedback.degraded,
            "unit graded"
        );
        UnitOutcome {
            score: score_value,
            feedback,
            context: ctx,
        }
    }

    async fn run_stage<C: StageContract>(
        &self,
        contract: &C,
        ctx: &PipelineContext,
        prior: &[UnitEvent],
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<C::Output>, MarkerError> {
        let stage = contract.stage();
        let key = &ctx.input.key;
        if cancel.is_cancelled() {
            return Err(MarkerError::Cancelled(key.to_string()));
        }

        if mode != RunMode::Fresh {
            if let Some((response, value)) = reuse(contract, ctx, prior) {
                debug!(%stage, response = %response.id, "reusing accepted response");
                return Ok(StageOutcome {
                    value,
                    record: StageRecord {
                        stage,
                        response_id: Some(response.id),
                        status: ResponseStatus::Accepted,
                        attempts: 0,
                        reused: true,
                    },
                });
            }
        }

        if mode == RunMode::Replay {
            let (_, value) = contract.degraded(ctx);
            let response_id = last_of(prior, stage, ResponseStatus::Degraded).map(|r| r.id);
            return Ok(StageOutcome {
                value,
                record: StageRecord {
                    stage,
                    response_id,
                    status: ResponseStatus::Degraded,
                    attempts: 0,
                    reused: true,
                },
            });
        }

        self.call_with_retries(contract, ctx, cancel).await
    }

    async fn call_with_retries<C: StageContract>(
        &self,
        contract: &C,
        ctx: &PipelineContext,
        cancel: &CancellationToken,
    ) -> Result<StageOutcome<C::Output>, MarkerError> {
        let stage = contract.stage();
        let key = &ctx.input.key;
        let (system, user) = contract.prompt(ctx);
        let mut correction: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            let prompt = Prompt {
                stage,
                module_id: key.module_id.clone(),
                system: system.clone(),
                user: match &correction {
                    Some(reason) => prompts::with_correction(&user, reason),
                    None => user.clone(),
                },
                temperature: self.temperature,
            };

            let mut retry_after = None;
            match self.call_model(&prompt, cancel, key).await? {
                Ok(raw) => match contract.validate(&raw, ctx) {
                    Ok(value) => {
                        let response = self
                            .record(ctx, stage, attempt, ResponseStatus::Accepted, raw, None)
                            .await?;
                        debug!(%stage, attempt, "stage accepted");
                        return Ok(StageOutcome {
                            value,
                            record: StageRecord {
                                stage,
                                response_id: Some(response.id),
                                status: ResponseStatus::Accepted,
                                attempts: attempt + 1,
                                reused: false,
                            },
                        });
                    }
                    Err(reason) => {
                        warn!(%stage, attempt, %reason, "stage output rejected");
                        self.record(ctx, stage, attempt, ResponseStatus::Rejected, raw, Some(reason.clone()))
                            .await?;
                        correction = Some(reason);
                    }
                },
                Err(e) => {
                    warn!(%stage, attempt, error = %e, "model call failed");
                    retry_after = e.retry_after();
                    self.record(ctx, stage, attempt, ResponseStatus::CallFailed, String::new(), Some(e.to_string()))
                        .await?;
                }
            }

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt, retry_after) else {
                break;
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(MarkerError::Cancelled(key.to_string())),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let (raw, value) = contract.degraded(ctx);
        let response = self
            .record(
                ctx,
                stage,
                attempt,
                ResponseStatus::Degraded,
                raw,
                Some(format!("no acceptable response after {attempt} attempt(s)")),
            )
            .await?;
        warn!(%stage, attempts = attempt, "stage degraded to default output");
        Ok(StageOutcome {
            value,
            record: StageRecord {
                stage,
                response_id: Some(response.id),
                status: ResponseStatus::Degraded,
                attempts: attempt,
                reused: false,
            },
        })
    }

    /// Outer error: cancelled. Inner error: the model failed this attempt.
    async fn call_model(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        key: &crate::types::UnitKey,
    ) -> Result<Result<String, ModelError>, MarkerError> {
        let cancelled = || MarkerError::Cancelled(key.to_string());
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            permit = self.permits.acquire() => permit.map_err(|_| cancelled())?,
        };
        let call = tokio::time::timeout(self.call_timeout, self.model.complete(prompt));
        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled()),
            result = call => Ok(result.unwrap_or(Err(ModelError::Timeout))),
        }
    }

    async fn record(
        &self,
        ctx: &PipelineContext,
        stage: Stage,
        attempt: u32,
        status: ResponseStatus,
        raw: String,
        error: Option<String>,
    ) -> Result<AgentResponse, MarkerError> {
        let response = AgentResponse::new(&ctx.input.key, self.run_id, stage, attempt, status, raw, error);
        self.log
            .append(&ctx.input.key, &UnitEvent::AgentResponse(response.clone()))
            .await?;
        Ok(response)
    }
}

fn last_of(events: &[UnitEvent], stage: Stage, status: ResponseStatus) -> Option<&AgentResponse> {
    events.iter().rev().find_map(|e| match e {
        UnitEvent::AgentResponse(r) if r.stage == stage && r.status == status => Some(r),
        _ => None,
    })
}

/// The latest accepted response for the stage, if it still passes validation.
fn reuse<'a, C: StageContract>(
    contract: &C,
    ctx: &PipelineContext,
    prior: &'a [UnitEvent],
) -> Option<(&'a AgentResponse, C::Output)> {
    let response = last_of(prior, contract.stage(), ResponseStatus::Accepted)?;
    match contract.validate(&response.raw, ctx) {
        Ok(value) => Some((response, value)),
        Err(reason) => {
            warn!(stage = %contract.stage(), %reason, "logged response no longer validates");
            None
        }
    }
}
