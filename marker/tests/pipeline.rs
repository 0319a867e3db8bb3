use code_runner::test_helpers::{StaticExecutor, StaticLinter};
use marker::MarkingJob;
use marker::agents::RunMode;
use marker::batch::MarkingBatch;
use marker::error::MarkerError;
use marker::feedback::NoteSource;
use marker::flags::{FlagKind, PROBLEMS_HEADLINE};
use marker::store::{JsonlResponseLog, MemoryResponseLog, load_assessment};
use marker::test_helpers::{ScriptedModel, score_json};
use marker::traits::model::ModelError;
use marker::traits::response_log::ResponseLog;
use marker::types::{ExtractionMethod, ResponseStatus, Stage, Submission, UnitEvent, UnitKey};
use serde_json::json;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use util::task_config::{ModuleConfig, TaskConfig};

const TESTS: &str = "def test_sum():\n    pass\n\ndef test_empty():\n    pass\n";
const CODE: &str = "def total(xs):\n    return sum(xs)\n";

fn task(dir: &TempDir, ids: &[&str], with_tests: bool) -> TaskConfig {
    let tests = dir.path().join("test_module.py");
    fs::write(&tests, TESTS).unwrap();
    let modules = ids
        .iter()
        .map(|id| {
            let m = ModuleConfig::new(*id, "Return the sum of a list (5 points)", 5.0);
            if with_tests { m.with_tests(&tests) } else { m }
        })
        .collect();
    let mut config = TaskConfig::new("prac1", modules);
    config.agents.base_delay_ms = 1;
    config.agents.max_delay_ms = 2;
    config
}

fn submission(student: &str, ids: &[&str]) -> Submission {
    ids.iter().fold(
        Submission::new(student, "prac1").with_name("Ada Lovelace"),
        |s, id| s.with_file(*id, CODE),
    )
}

fn half_passing() -> Arc<StaticExecutor> {
    Arc::new(StaticExecutor::pytest(&[("test_sum", true), ("test_empty", false)]))
}

fn job(
    config: &TaskConfig,
    student: &str,
    model: &Arc<ScriptedModel>,
    log: Arc<dyn ResponseLog>,
    executor: &Arc<StaticExecutor>,
) -> MarkingJob {
    let ids: Vec<&str> = config.modules.iter().map(|m| m.module_id.as_str()).collect();
    MarkingJob::new(
        submission(student, &ids),
        Arc::new(config.clone()),
        model.clone(),
        log,
    )
    .with_executor(executor.clone())
    .with_linter(Arc::new(StaticLinter::default()))
}

async fn statuses(log: &dyn ResponseLog, module: &str, stage: Stage) -> Vec<ResponseStatus> {
    log.events(&UnitKey::new("prac1", "u1", module))
        .await
        .unwrap()
        .into_iter()
        .filter_map(|e| match e {
            UnitEvent::AgentResponse(r) if r.stage == stage => Some(r.status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn mixed_scores_aggregate_without_problem_flags() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1", "q2", "q3"], true);
    let model = Arc::new(
        ScriptedModel::well_behaved(5.0, 5.0)
            .with_module_default(Stage::ScoreComputation, "q2", score_json(0.0, 5.0))
            .with_module_default(Stage::ScoreComputation, "q3", score_json(3.0, 5.0)),
    );
    let log = Arc::new(MemoryResponseLog::new());

    let assessment = job(&config, "u1", &model, log.clone(), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    let summary = &assessment.summary;
    assert_eq!(summary.total_awarded, 8.0);
    assert_eq!(summary.total_possible, 15.0);
    assert!((summary.percentage - 53.33).abs() < 0.01);
    assert_eq!(summary.extraction_error_count, 0);
    assert!(summary.modules.iter().all(|m| m.method == ExtractionMethod::DirectJson));
    assert!(summary.modules.iter().all(|m| m.response_id.is_some()));

    let kinds: Vec<FlagKind> = assessment.flags.iter().map(|f| f.kind).collect();
    assert!(!kinds.contains(&FlagKind::ZeroPattern));
    assert!(!kinds.contains(&FlagKind::LowScore));

    assert_eq!(assessment.feedback.modules.len(), 3);
    assert!(assessment.feedback_text.starts_with("# Feedback for Ada Lovelace: prac1"));
    assert_eq!(assessment.test_results.len(), 3);
    assert_eq!(model.calls(), 15);
    // test result, quality result and five accepted responses per module
    assert_eq!(log.len(), 21);
}

#[tokio::test]
async fn all_zero_without_tests_raises_three_flags() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1", "q2", "q3"], false);
    let model = Arc::new(ScriptedModel::well_behaved(0.0, 5.0));
    let executor = half_passing();

    let assessment = job(&config, "u1", &model, Arc::new(MemoryResponseLog::new()), &executor)
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(assessment.summary.total_awarded, 0.0);
    assert_eq!(executor.calls(), 0);
    let kinds: Vec<FlagKind> = assessment.flags.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![FlagKind::LowScore, FlagKind::ZeroPattern, FlagKind::TestFailurePattern]
    );
    assert!(assessment.flag_summary.starts_with(PROBLEMS_HEADLINE));
    assert!(assessment.flag_summary.contains("Very low total score (0.0%)"));
    assert!(assessment.flag_summary.contains("3/3 modules scored zero (100.0%)"));
    assert!(assessment.flag_summary.contains("No test results found"));
    assert!(assessment.needs_review());
}

#[tokio::test]
async fn free_text_score_is_read_by_regex() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0).with_default(
        Stage::ScoreComputation,
        "The student earned 4 out of 5 points for this section.",
    ));

    let assessment = job(&config, "u1", &model, Arc::new(MemoryResponseLog::new()), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    let score = assessment.summary.module("q1").unwrap();
    assert_eq!(score.awarded, 4.0);
    assert_eq!(score.maximum, 5.0);
    assert_eq!(score.method, ExtractionMethod::Regex);
    assert!(score.success);
}

#[tokio::test]
async fn invalid_answers_are_retried_then_degraded() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let model = Arc::new(
        ScriptedModel::well_behaved(5.0, 5.0)
            .with_default(Stage::RubricAnalysis, "I would rather not say."),
    );
    let log = Arc::new(MemoryResponseLog::new());

    let assessment = job(&config, "u1", &model, log.clone(), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        statuses(log.as_ref(), "q1", Stage::RubricAnalysis).await,
        vec![
            ResponseStatus::Rejected,
            ResponseStatus::Rejected,
            ResponseStatus::Rejected,
            ResponseStatus::Degraded
        ]
    );
    let rubric_prompts: Vec<_> = model
        .prompts()
        .into_iter()
        .filter(|p| p.stage == Stage::RubricAnalysis)
        .collect();
    assert_eq!(rubric_prompts.len(), 3);
    assert!(!rubric_prompts[0].user.contains("previous answer was rejected"));
    assert!(rubric_prompts[1].user.contains("previous answer was rejected"));

    // later stages still ran and the score is unaffected
    let feedback = assessment.feedback.module("q1").unwrap();
    assert!(feedback.degraded);
    assert!(feedback.notes.iter().any(|n| n.source == NoteSource::Degraded));
    assert_eq!(assessment.summary.total_awarded, 5.0);
}

#[tokio::test]
async fn rate_limited_call_is_retried() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let model = Arc::new(ScriptedModel::well_behaved(3.0, 5.0).then(
        Stage::ScoreComputation,
        Err(ModelError::RateLimited {
            retry_after: Some(Duration::from_millis(20)),
        }),
    ));
    let log = Arc::new(MemoryResponseLog::new());

    let assessment = job(&config, "u1", &model, log.clone(), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        statuses(log.as_ref(), "q1", Stage::ScoreComputation).await,
        vec![ResponseStatus::CallFailed, ResponseStatus::Accepted]
    );
    assert_eq!(assessment.summary.total_awarded, 3.0);
    assert!(!assessment.feedback.module("q1").unwrap().degraded);
}

#[tokio::test]
async fn exhausted_score_stage_falls_back_and_is_flagged() {
    let dir = TempDir::new().unwrap();
    let mut config = task(&dir, &["q1"], true);
    config.flags.extraction_error_limit = 1;
    let model = Arc::new(
        ScriptedModel::well_behaved(3.0, 5.0)
            .with_default(Stage::ScoreComputation, "Looks fine to me."),
    );

    let assessment = job(&config, "u1", &model, Arc::new(MemoryResponseLog::new()), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    let score = assessment.summary.module("q1").unwrap();
    assert_eq!(score.method, ExtractionMethod::Fallback);
    assert_eq!(score.awarded, 0.0);
    assert!(!score.success);
    assert!(assessment.flags.iter().any(|f| f.kind == FlagKind::ExtractionErrors));
}

#[tokio::test]
async fn zero_score_feedback_names_a_problem() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let praise = json!({
        "feedback": {
            "strengths": "Excellent work",
            "test_analysis": "Great job",
            "quality_issues": "",
            "suggestions": "",
            "examples": "",
            "closing": "Well done"
        },
        "notes": ["Softened the tone"]
    });
    let model = Arc::new(
        ScriptedModel::well_behaved(0.0, 5.0).with_default(Stage::Alignment, praise.to_string()),
    );

    let assessment = job(&config, "u1", &model, Arc::new(MemoryResponseLog::new()), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    let feedback = assessment.feedback.module("q1").unwrap();
    assert!(feedback.sections.mentions_issue());
    assert!(feedback.sections.test_analysis.starts_with("1 of 2 tests failed."));
    assert!(feedback.notes.iter().any(|n| n.source == NoteSource::Aligner));
    assert!(feedback.notes.iter().any(|n| n.source == NoteSource::Policy));
}

#[tokio::test]
async fn resume_reuses_logged_work() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1", "q2"], true);
    let log = Arc::new(MemoryResponseLog::new());
    let executor = half_passing();

    // alignment never succeeds in the first run
    let first_model = Arc::new(
        ScriptedModel::well_behaved(4.0, 5.0).with_default(Stage::Alignment, "not json"),
    );
    let first = job(&config, "u1", &first_model, log.clone(), &executor)
        .mark(&CancellationToken::new())
        .await
        .unwrap();
    assert!(first.feedback.modules.iter().all(|m| m.degraded));
    let logged = log.len();

    let second_model = Arc::new(ScriptedModel::well_behaved(1.0, 5.0));
    let second = job(&config, "u1", &second_model, log.clone(), &executor)
        .with_mode(RunMode::Resume)
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(executor.calls(), 2, "sandbox ran again on resume");
    assert_eq!(second_model.calls(), 2);
    assert_eq!(second_model.calls_for(Stage::Alignment), 2);
    assert_eq!(second_model.calls_for(Stage::ScoreComputation), 0);
    assert_eq!(second.summary.total_awarded, 8.0);
    assert!(second.feedback.modules.iter().all(|m| !m.degraded));
    assert_eq!(log.len(), logged + 2);
}

#[tokio::test]
async fn replay_rebuilds_without_model_or_writes() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1", "q2"], true);
    let log = Arc::new(MemoryResponseLog::new());
    let executor = half_passing();
    let model = Arc::new(
        ScriptedModel::well_behaved(2.5, 5.0)
            .with_default(Stage::FeedbackDraft, "{}"),
    );

    let original = job(&config, "u1", &model, log.clone(), &executor)
        .mark(&CancellationToken::new())
        .await
        .unwrap();
    let logged = log.len();

    let silent = Arc::new(ScriptedModel::new());
    let replayed = job(&config, "u1", &silent, log.clone(), &executor)
        .replay()
        .await
        .unwrap();

    assert_eq!(silent.calls(), 0);
    assert_eq!(executor.calls(), 2);
    assert_eq!(log.len(), logged);
    assert_eq!(replayed.summary, original.summary);
    assert_eq!(replayed.feedback, original.feedback);
    assert_eq!(replayed.flags, original.flags);
}

#[tokio::test]
async fn cancellation_stops_the_job_and_keeps_the_log() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1", "q2"], true);
    let log = Arc::new(MemoryResponseLog::new());
    let executor = half_passing();
    let slow = Arc::new(ScriptedModel::well_behaved(5.0, 5.0).with_delay(Duration::from_secs(30)));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = job(&config, "u1", &slow, log.clone(), &executor)
        .mark(&cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::Cancelled(_)));
    assert!(started.elapsed() < Duration::from_secs(5));

    // sandbox results survived; resuming does not rerun the tests
    let events = log.events(&UnitKey::new("prac1", "u1", "q1")).await.unwrap();
    assert!(matches!(events[0], UnitEvent::TestResult { .. }));

    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0));
    let resumed = job(&config, "u1", &model, log.clone(), &executor)
        .with_mode(RunMode::Resume)
        .mark(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.summary.total_awarded, 10.0);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn a_locked_unit_is_not_written_twice() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let log = Arc::new(MemoryResponseLog::new());
    let _held = log.lock(&UnitKey::new("prac1", "u1", "q1")).unwrap();

    let err = job(
        &config,
        "u1",
        &Arc::new(ScriptedModel::well_behaved(5.0, 5.0)),
        log.clone(),
        &half_passing(),
    )
    .mark(&CancellationToken::new())
    .await
    .unwrap_err();

    assert!(matches!(err, MarkerError::UnitLocked(_)));
    assert!(log.is_empty());
}

#[tokio::test]
async fn broken_module_config_fails_only_that_module() {
    let dir = TempDir::new().unwrap();
    let mut config = task(&dir, &["q1"], true);
    config.modules.push(ModuleConfig::new("q2", "", 5.0));
    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0));

    let assessment = job(&config, "u1", &model, Arc::new(MemoryResponseLog::new()), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(assessment.summary.modules.len(), 1);
    assert_eq!(assessment.summary.total_possible, 5.0);
    assert_eq!(assessment.unit_failures.len(), 1);
    assert_eq!(assessment.unit_failures[0].module_id, "q2");
    assert_eq!(assessment.unit_failures[0].reason, "rubric text is missing");
    assert!(assessment.needs_review());
}

#[tokio::test]
async fn module_ids_sharing_a_log_path_fail_the_later_module() {
    let dir = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let config = task(&dir, &["q 1", "q_1"], true);
    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0));
    let log = Arc::new(JsonlResponseLog::new(results.path()));

    let assessment = job(&config, "u1", &model, log.clone(), &half_passing())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(assessment.summary.modules.len(), 1);
    assert_eq!(assessment.summary.modules[0].module_id, "q 1");
    assert_eq!(assessment.unit_failures.len(), 1);
    assert_eq!(assessment.unit_failures[0].module_id, "q_1");
    assert!(assessment.unit_failures[0].reason.contains("collides"));
    assert_eq!(model.calls(), 5);
}

#[tokio::test]
async fn jsonl_log_and_assessment_land_on_disk() {
    let dir = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0));
    let log = Arc::new(JsonlResponseLog::new(results.path()));

    let assessment = job(&config, "u1", &model, log.clone(), &half_passing())
        .with_results_root(results.path())
        .mark(&CancellationToken::new())
        .await
        .unwrap();

    let key = UnitKey::new("prac1", "u1", "q1");
    let lines = fs::read_to_string(log.log_path(&key)).unwrap();
    assert_eq!(lines.lines().count(), 7);
    assert!(!log.log_path(&key).with_extension("lock").exists());

    let saved = load_assessment(results.path(), "prac1", "u1").await.unwrap();
    assert_eq!(saved.summary, assessment.summary);
    assert_eq!(saved.feedback_text, assessment.feedback_text);
}

#[tokio::test]
async fn batch_cancels_one_student_only() {
    let dir = TempDir::new().unwrap();
    let config = task(&dir, &["q1"], true);
    let model = Arc::new(ScriptedModel::well_behaved(5.0, 5.0));
    let log: Arc<dyn ResponseLog> = Arc::new(MemoryResponseLog::new());

    let batch = MarkingBatch::new(2)
        .with_job(job(&config, "u1", &model, log.clone(), &half_passing()))
        .with_job(job(&config, "u2", &model, log.clone(), &half_passing()));
    assert!(batch.cancel("u2"));
    assert!(!batch.cancel("u9"));

    let results = batch.run().await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, "u1");
    assert_eq!(results[0].1.as_ref().unwrap().summary.total_awarded, 5.0);
    assert_eq!(results[1].0, "u2");
    assert!(matches!(results[1].1, Err(MarkerError::Cancelled(_))));
}
