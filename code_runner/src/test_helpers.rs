//! In-memory collaborators for exercising the sandbox and analyzer without
//! Python, linters or containers installed.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::executor::{CodeExecutor, TestSuite};
use crate::quality::linter::Linter;
use crate::types::{RawTestOutcome, ToolReport};

/// Returns a fixed outcome and counts how often it was asked.
#[derive(Default)]
pub struct StaticExecutor {
    outcome: RawTestOutcome,
    calls: AtomicUsize,
    seen_code: Mutex<Vec<Option<String>>>,
}

impl StaticExecutor {
    pub fn new(outcome: RawTestOutcome) -> Self {
        Self {
            outcome,
            ..Default::default()
        }
    }

    /// Verbose pytest output reporting the given (name, passed) pairs.
    pub fn pytest(cases: &[(&str, bool)]) -> Self {
        let stdout: String = cases
            .iter()
            .map(|(name, ok)| {
                format!(
                    "test_module.py::{name} {}\n",
                    if *ok { "PASSED" } else { "FAILED" }
                )
            })
            .collect();
        let all_passed = cases.iter().all(|(_, ok)| *ok);
        Self::new(RawTestOutcome {
            stdout,
            exit_code: Some(if all_passed { 0 } else { 1 }),
            duration: Duration::from_millis(40),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_code(&self) -> Vec<Option<String>> {
        self.seen_code.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CodeExecutor for StaticExecutor {
    async fn execute(
        &self,
        code: Option<&str>,
        _tests: &TestSuite,
        _timeout: Duration,
    ) -> RawTestOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen_code.lock() {
            seen.push(code.map(str::to_string));
        }
        self.outcome.clone()
    }
}

/// Returns fixed tool reports.
#[derive(Default)]
pub struct StaticLinter {
    reports: Vec<ToolReport>,
}

impl StaticLinter {
    pub fn new(reports: Vec<ToolReport>) -> Self {
        Self { reports }
    }
}

#[async_trait]
impl Linter for StaticLinter {
    async fn lint(&self, _code: &str, _file_name: &str) -> Vec<ToolReport> {
        self.reports.clone()
    }
}
