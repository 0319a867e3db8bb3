//! Execution Sandbox and Quality Analyzer.
//!
//! [`run_tests`] runs a module's test file against submission code under a hard
//! wall-clock bound and turns whatever happened (pass, fail, crash, timeout) into
//! a [`TestResult`]. [`quality::analyze`] does the same for static checks. Neither
//! lets a misbehaving submission surface as an error to the caller.

pub mod error;
pub mod executor;
pub mod process;
pub mod pytest;
pub mod quality;
pub mod test_helpers;
pub mod types;

use std::time::Duration;
use tracing::{info, warn};
use util::task_config::ModuleConfig;

pub use error::RunnerError;
pub use executor::{CodeExecutor, DockerExecutor, ProcessExecutor, TestSuite, executor_from_options};
pub use quality::analyze;
pub use quality::linter::{Linter, ProcessLinter};
pub use types::{QualityResult, RawTestOutcome, StyleIssue, TestCaseResult, TestResult, ToolReport};

use pytest::CaseStatus;

/// Runs a module's tests against `code`.
///
/// Only an invalid request (a zero timeout) is an error. Missing tests, missing
/// code, crashes and timeouts are all reported inside the returned result.
pub async fn run_tests(
    executor: &dyn CodeExecutor,
    module: &ModuleConfig,
    code: Option<&str>,
    timeout_seconds: u64,
) -> Result<TestResult, RunnerError> {
    if timeout_seconds == 0 {
        return Err(RunnerError::InvalidTimeout);
    }
    let module_id = module.module_id.as_str();

    let Some(tests_path) = module.tests.as_ref() else {
        return Ok(TestResult::empty(module_id, "No test file found"));
    };
    let test_source = match tokio::fs::read_to_string(tests_path).await {
        Ok(src) => src,
        Err(e) => {
            warn!(module = module_id, path = ?tests_path, error = %e, "test file unreadable");
            return Ok(TestResult::empty(module_id, "No test file found"));
        }
    };
    let discovered = pytest::discover_tests(&test_source);

    let suite = TestSuite {
        path: tests_path.clone(),
        solution_file: module.solution_file.clone(),
    };
    let raw = executor
        .execute(code, &suite, Duration::from_secs(timeout_seconds))
        .await;

    let result = interpret_outcome(module_id, &discovered, &raw, timeout_seconds);
    info!(
        module = module_id,
        total = result.total,
        passed = result.passed,
        timeout = result.timeout,
        duration_ms = result.duration_ms,
        "tests finished"
    );
    Ok(result)
}

/// Turns a raw run into per-test outcomes.
///
/// `discovered` is the list of tests declared in the test file; any of them the
/// run did not report on count as failed.
pub fn interpret_outcome(
    module_id: &str,
    discovered: &[String],
    raw: &RawTestOutcome,
    timeout_seconds: u64,
) -> TestResult {
    let fail_all = |reason: &str| -> Vec<TestCaseResult> {
        discovered
            .iter()
            .map(|name| TestCaseResult {
                name: name.clone(),
                passed: false,
                output: reason.to_string(),
            })
            .collect()
    };

    if raw.timed_out {
        let reason = format!("Timed out after {timeout_seconds}s");
        return TestResult::from_cases(module_id, fail_all(&reason), raw.duration, true, Some(reason));
    }

    if let Some(err) = &raw.launch_error {
        let reason = format!("Execution could not start: {err}");
        return TestResult::from_cases(module_id, fail_all(&reason), raw.duration, false, Some(reason));
    }

    let parsed = pytest::parse_output(&raw.stdout);
    if parsed.is_empty() {
        if discovered.is_empty() && raw.exit_code == Some(0) {
            return TestResult::from_cases(
                module_id,
                Vec::new(),
                raw.duration,
                false,
                Some("No tests were collected".to_string()),
            );
        }
        let reason = crash_reason(raw);
        return TestResult::from_cases(module_id, fail_all(&reason), raw.duration, false, Some(reason));
    }

    let mut cases: Vec<TestCaseResult> = parsed
        .iter()
        .filter(|c| c.status != CaseStatus::Skipped)
        .map(|c| TestCaseResult {
            name: c.name.clone(),
            passed: c.status == CaseStatus::Passed,
            output: match c.status {
                CaseStatus::Passed => String::new(),
                _ => c.reason.clone().unwrap_or_else(|| "test failed".to_string()),
            },
        })
        .collect();

    for name in discovered {
        let reported = parsed.iter().any(|c| pytest::base_name(&c.name) == name);
        if !reported {
            cases.push(TestCaseResult {
                name: name.clone(),
                passed: false,
                output: "not executed".to_string(),
            });
        }
    }

    TestResult::from_cases(module_id, cases, raw.duration, false, None)
}

/// The most informative lines of a run that produced no test outcomes.
fn crash_reason(raw: &RawTestOutcome) -> String {
    let combined = format!("{}\n{}", raw.stderr, raw.stdout);
    let error_lines: Vec<&str> = combined
        .lines()
        .map(str::trim)
        .filter(|l| l.contains("Error") || l.contains("error:"))
        .take(5)
        .collect();
    if !error_lines.is_empty() {
        return error_lines.join("\n");
    }

    let tail: Vec<&str> = combined
        .lines()
        .filter(|l| !l.trim().is_empty())
        .rev()
        .take(10)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if tail.is_empty() {
        format!(
            "Process exited with code {} and produced no output",
            raw.exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
        )
    } else {
        tail.join("\n")
    }
}
