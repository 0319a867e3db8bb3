//! # Marker Library
//!
//! Grades one student's submission for a task, module by module, and composes
//! the result into a single [`FinalAssessment`].
//!
//! ## Key Concepts
//! - **MarkingJob**: grades a single submission against a [`TaskConfig`].
//! - **Units**: one (student, module) pair. Each unit runs its tests and static
//!   analysis, then the five-stage [`agents::AgentPipeline`]. Units of one job
//!   run concurrently; stages within a unit run in order.
//! - **Response log**: every sandbox result and model attempt is appended to a
//!   [`ResponseLog`] before the unit moves on, so a job can be resumed or
//!   replayed later.
//! - **Flags and report**: scores are aggregated by [`scorer`], checked by
//!   [`flags`], and composed into the final record by [`report`].

pub mod agents;
pub mod batch;
pub mod error;
pub mod extractor;
pub mod feedback;
pub mod flags;
pub mod llm;
pub mod report;
pub mod scorer;
pub mod store;
pub mod test_helpers;
pub mod traits;
pub mod types;

use crate::agents::context::UnitInput;
use crate::agents::retry::RetryPolicy;
use crate::agents::{AgentPipeline, RunMode, UnitOutcome};
use crate::error::MarkerError;
use crate::feedback::Feedback;
use crate::flags::{FlagEngine, FlagInputs};
use crate::report::{Evidence, FinalAssessment};
use crate::scorer::ScoreSummary;
use crate::traits::model::LanguageModel;
use crate::traits::response_log::ResponseLog;
use crate::types::{Submission, UnitEvent, UnitFailure, UnitKey};

use code_runner::{CodeExecutor, Linter, ProcessLinter, QualityResult, TestResult};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use util::config::AppConfig;
use util::task_config::{ModuleConfig, TaskConfig};

/// A marking job for a single student submission.
///
/// The task configuration is shared read-only between jobs; everything a job
/// writes goes through its [`ResponseLog`], keyed by (task, student, module).
///
/// # Example
///
/// ```no_run
/// use marker::MarkingJob;
/// use marker::store::JsonlResponseLog;
/// use marker::types::Submission;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use util::config::AppConfig;
/// use util::task_config::TaskConfig;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(TaskConfig::load(std::path::Path::new("task.json"))?);
/// let model = marker::llm::from_config(&AppConfig::global())?;
/// let log = Arc::new(JsonlResponseLog::from_config());
/// let submission = Submission::new("u12345678", &config.task_id).with_file("q1", "def f(): pass");
///
/// let assessment = MarkingJob::new(submission, config, model, log)
///     .mark(&CancellationToken::new())
///     .await?;
/// println!("{}", assessment.feedback_text);
/// # Ok(())
/// # }
/// ```
pub struct MarkingJob {
    submission: Submission,
    config: Arc<TaskConfig>,
    model: Arc<dyn LanguageModel>,
    log: Arc<dyn ResponseLog>,
    executor: Arc<dyn CodeExecutor>,
    linter: Arc<dyn Linter>,
    mode: RunMode,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    results_root: Option<PathBuf>,
}

impl MarkingJob {
    /// Creates a job using the sandbox and linters named in `config.runner`.
    ///
    /// Starts in [`RunMode::Resume`] when the task's agent options ask for it,
    /// otherwise [`RunMode::Fresh`].
    pub fn new(
        submission: Submission,
        config: Arc<TaskConfig>,
        model: Arc<dyn LanguageModel>,
        log: Arc<dyn ResponseLog>,
    ) -> Self {
        let (model_calls, timeout_secs) = {
            let app = AppConfig::global();
            (app.max_concurrent_model_calls, app.llm_timeout_secs)
        };
        let executor: Arc<dyn CodeExecutor> =
            Arc::from(code_runner::executor_from_options(&config.runner, &config.execution));
        let linter: Arc<dyn Linter> = Arc::new(ProcessLinter::from_options(&config.runner));
        let mode = if config.agents.resume {
            RunMode::Resume
        } else {
            RunMode::Fresh
        };

        Self {
            submission,
            config,
            model,
            log,
            executor,
            linter,
            mode,
            permits: Arc::new(Semaphore::new(model_calls.max(1))),
            call_timeout: Duration::from_secs(timeout_secs.max(1)),
            results_root: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = linter;
        self
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shares one model-call limit across several jobs.
    pub fn with_model_permits(mut self, permits: Arc<Semaphore>) -> Self {
        self.permits = permits;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Also write `assessment.json` under `root` once marking finishes.
    pub fn with_results_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.results_root = Some(root.into());
        self
    }

    pub fn submission(&self) -> &Submission {
        &self.submission
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    fn pipeline(&self) -> AgentPipeline {
        AgentPipeline::new(Arc::clone(&self.model), Arc::clone(&self.log))
            .with_policy(RetryPolicy::from_options(&self.config.agents))
            .with_permits(Arc::clone(&self.permits))
            .with_temperature(self.config.agents.temperature)
            .with_call_timeout(self.call_timeout)
    }

    fn key(&self, module: &ModuleConfig) -> UnitKey {
        UnitKey::new(
            &self.config.task_id,
            &self.submission.student_id,
            &module.module_id,
        )
    }

    /// Grades every module and composes the assessment.
    ///
    /// A module with a broken configuration is reported in
    /// `unit_failures` and left out of the score; every other module is
    /// graded. Cancelling `cancel` stops all units of this job and returns
    /// [`MarkerError::Cancelled`]; what was logged so far stays in the log.
    #[instrument(skip_all, fields(task = %self.config.task_id, student = %self.submission.student_id, mode = ?self.mode))]
    pub async fn mark(&self, cancel: &CancellationToken) -> Result<FinalAssessment, MarkerError> {
        if cancel.is_cancelled() {
            return Err(MarkerError::Cancelled(self.submission.student_id.clone()));
        }
        if self.mode == RunMode::Replay {
            return self.replay().await;
        }

        let pipeline = self.pipeline();
        let units = self.config.modules.iter().enumerate().map(|(index, module)| {
            let unit_cancel = cancel.child_token();
            let pipeline = &pipeline;
            async move {
                let result = self.mark_unit(pipeline, index, module, &unit_cancel).await;
                (module, result)
            }
        });
        let results = join_all(units).await;

        let assessment = self.assemble(results)?;
        if let Some(root) = &self.results_root {
            store::save_assessment(root, &assessment).await?;
        }
        Ok(assessment)
    }

    /// Rebuilds the assessment from the response log alone.
    ///
    /// No model is called, no test is run, and nothing is written.
    #[instrument(skip_all, fields(task = %self.config.task_id, student = %self.submission.student_id))]
    pub async fn replay(&self) -> Result<FinalAssessment, MarkerError> {
        let pipeline = self.pipeline();
        let units = self.config.modules.iter().enumerate().map(|(index, module)| {
            let pipeline = &pipeline;
            async move {
                let result = self.replay_unit(pipeline, index, module).await;
                (module, result)
            }
        });
        let results = join_all(units).await;
        self.assemble(results)
    }

    async fn mark_unit(
        &self,
        pipeline: &AgentPipeline,
        index: usize,
        module: &ModuleConfig,
        cancel: &CancellationToken,
    ) -> Result<UnitOutcome, MarkerError> {
        self.check_module(index, module)?;
        let key = self.key(module);
        let _lock = self.log.lock(&key)?;

        let prior = match self.mode {
            RunMode::Fresh => Vec::new(),
            _ => self.log.events(&key).await?,
        };
        let code = self.submission.code_for(&module.module_id);

        let recorded = match self.mode {
            RunMode::Resume => latest_evidence(&prior),
            _ => None,
        };
        let (test, quality) = match recorded {
            Some(pair) => {
                info!(unit = %key, "reusing recorded test and quality results");
                pair
            }
            None => {
                let (test, quality) = tokio::select! {
                    _ = cancel.cancelled() => return Err(MarkerError::Cancelled(key.to_string())),
                    pair = self.run_sandbox(module, code) => pair,
                };
                let test = test?;
                let run_id = pipeline.run_id();
                self.log
                    .append(&key, &UnitEvent::TestResult { run_id, result: test.clone() })
                    .await?;
                self.log
                    .append(&key, &UnitEvent::QualityResult { run_id, result: quality.clone() })
                    .await?;
                (test, quality)
            }
        };

        let input = Arc::new(UnitInput {
            key,
            module: module.clone(),
            code: code.map(str::to_string),
            test,
            quality,
        });
        pipeline.run(input, &prior, self.mode, cancel).await
    }

    async fn run_sandbox(
        &self,
        module: &ModuleConfig,
        code: Option<&str>,
    ) -> (Result<TestResult, MarkerError>, QualityResult) {
        let timeout = self.config.execution.timeout_secs;
        let (test, quality) = tokio::join!(
            code_runner::run_tests(self.executor.as_ref(), module, code, timeout),
            code_runner::analyze(self.linter.as_ref(), module, code),
        );
        let test = test.map_err(|e| MarkerError::Config {
            module_id: module.module_id.clone(),
            reason: e.to_string(),
        });
        (test, quality)
    }

    async fn replay_unit(
        &self,
        pipeline: &AgentPipeline,
        index: usize,
        module: &ModuleConfig,
    ) -> Result<UnitOutcome, MarkerError> {
        self.check_module(index, module)?;
        let key = self.key(module);
        let events = self.log.events(&key).await?;
        let (test, quality) = latest_evidence(&events).unwrap_or_else(|| {
            warn!(unit = %key, "no sandbox results in log");
            (
                TestResult::empty(&module.module_id, "No test results recorded"),
                QualityResult {
                    module_id: module.module_id.clone(),
                    style_issue_count: 0,
                    complexity_score: 0.0,
                    documentation_score: 0.0,
                    unparseable: true,
                    unparseable_reason: Some("no quality result recorded".to_string()),
                    issues: Vec::new(),
                    tools: Vec::new(),
                },
            )
        });
        let input = Arc::new(UnitInput {
            key,
            module: module.clone(),
            code: self.submission.code_for(&module.module_id).map(str::to_string),
            test,
            quality,
        });
        pipeline
            .run(input, &events, RunMode::Replay, &CancellationToken::new())
            .await
    }

    fn check_module(&self, index: usize, module: &ModuleConfig) -> Result<(), MarkerError> {
        self.config
            .validate_module(index)
            .map_err(|reason| MarkerError::Config {
                module_id: module.module_id.clone(),
                reason,
            })
    }

    /// Folds unit results, in module order, into the final record.
    fn assemble(
        &self,
        results: Vec<(&ModuleConfig, Result<UnitOutcome, MarkerError>)>,
    ) -> Result<FinalAssessment, MarkerError> {
        let student = self
            .submission
            .student_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.submission.student_id);
        let mut feedback = Feedback::new(
            format!("Feedback for {student}: {}", self.config.task_id),
            self.config.feedback.format,
        );
        let mut scores = Vec::new();
        let mut evidence = Evidence::default();

        for (module, result) in results {
            match result {
                Ok(outcome) => {
                    scores.push(outcome.score);
                    feedback.modules.push(outcome.feedback);
                    evidence.test_results.push(outcome.context.input.test.clone());
                    evidence.quality_results.push(outcome.context.input.quality.clone());
                }
                Err(MarkerError::Config { module_id, reason }) => {
                    warn!(module = %module_id, %reason, "module not graded");
                    evidence.unit_failures.push(UnitFailure { module_id, reason });
                }
                Err(e) => {
                    warn!(module = %module.module_id, error = %e, "unit failed");
                    return Err(e);
                }
            }
        }

        let summary = ScoreSummary::from_scores(scores);
        let rendered = feedback.render();
        let has_feedback = feedback.modules.iter().any(|m| !m.sections.is_blank());
        let flag_report = FlagEngine::new(self.config.flags.clone()).evaluate(&FlagInputs {
            summary: &summary,
            test_results: &evidence.test_results,
            extraction_error_count: summary.extraction_error_count,
            student_id: Some(self.submission.student_id.as_str()),
            feedback_text: has_feedback.then_some(rendered.as_str()),
        });

        info!(
            total = summary.total_awarded,
            possible = summary.total_possible,
            percentage = summary.percentage,
            flags = flag_report.flags.len(),
            failures = evidence.unit_failures.len(),
            "submission marked"
        );
        Ok(report::compose(
            &self.submission,
            summary,
            feedback,
            flag_report,
            evidence,
        ))
    }
}

/// The most recent test and quality results recorded for a unit.
fn latest_evidence(events: &[UnitEvent]) -> Option<(TestResult, QualityResult)> {
    let test = events.iter().rev().find_map(|e| match e {
        UnitEvent::TestResult { result, .. } => Some(result.clone()),
        _ => None,
    })?;
    let quality = events.iter().rev().find_map(|e| match e {
        UnitEvent::QualityResult { result, .. } => Some(result.clone()),
        _ => None,
    })?;
    Some((test, quality))
}
