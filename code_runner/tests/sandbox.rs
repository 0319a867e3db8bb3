#![cfg(unix)]

use code_runner::{ProcessExecutor, run_tests};
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use util::task_config::ModuleConfig;

fn sh(script: &str) -> ProcessExecutor {
    ProcessExecutor::new(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
}

fn module(dir: &TempDir, tests: &str) -> ModuleConfig {
    let path = dir.path().join("test_q1.py");
    fs::write(&path, tests).unwrap();
    ModuleConfig::new("q1", "Implement add()", 5.0).with_tests(path)
}

const TWO_TESTS: &str = "def test_add():\n    pass\n\ndef test_slow():\n    pass\n";

const BOTH_PASS: &str = "printf 'test_q1.py::test_add PASSED\\ntest_q1.py::test_slow PASSED\\n'";

#[tokio::test]
async fn sleeping_tests_time_out_within_grace() {
    let dir = TempDir::new().unwrap();
    let module = module(&dir, TWO_TESTS);

    let started = Instant::now();
    let result = run_tests(&sh("sleep 10"), &module, Some("x = 1\n"), 1)
        .await
        .unwrap();

    assert!(result.timeout);
    assert_eq!(result.passed, 0);
    assert_eq!(result.failed, 2);
    assert!(started.elapsed() < Duration::from_secs(2), "overran the bound");
}

#[tokio::test]
async fn crash_output_is_captured_as_failure_reason() {
    let dir = TempDir::new().unwrap();
    let module = module(&dir, TWO_TESTS);

    let result = run_tests(
        &sh("echo 'NameError: name add is not defined' >&2; exit 2"),
        &module,
        None,
        5,
    )
    .await
    .unwrap();

    assert!(!result.timeout);
    assert_eq!(result.passed, 0);
    assert!(result.cases.iter().all(|c| c.output.contains("NameError")));
}

#[tokio::test]
async fn solution_is_staged_beside_tests() {
    let dir = TempDir::new().unwrap();
    let module = module(&dir, TWO_TESTS);

    let script = format!(
        "test -f test_q1.py && test -f \"$STUDENT_SOLUTION_PATH\" && grep -q 'def add' {{solution}} && {BOTH_PASS}"
    );
    let result = run_tests(&sh(&script), &module, Some("def add(a, b):\n    return a + b\n"), 5)
        .await
        .unwrap();

    assert_eq!(result.passed, 2, "{result:?}");
    assert!(result.error.is_none());
}

#[tokio::test]
async fn runs_do_not_share_scratch_space() {
    let dir = TempDir::new().unwrap();
    let module = module(&dir, TWO_TESTS);

    let script = format!(
        "if [ -f leftover ]; then echo 'Error: shared workspace'; exit 1; fi; touch leftover; {BOTH_PASS}"
    );
    let exec = sh(&script);
    let first = run_tests(&exec, &module, Some("x"), 5).await.unwrap();
    let second = run_tests(&exec, &module, Some("x"), 5).await.unwrap();

    assert_eq!(first.passed, 2);
    assert_eq!(second.passed, 2);
}
