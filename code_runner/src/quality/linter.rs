use async_trait::async_trait;
use std::fs;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use util::paths::sanitize_component;
use util::task_config::{LintTool, RunnerOptions};

use crate::process::{run_bounded, substitute};
use crate::types::ToolReport;

/// Static-analysis collaborator: inspects source without running it.
#[async_trait]
pub trait Linter: Send + Sync {
    async fn lint(&self, code: &str, file_name: &str) -> Vec<ToolReport>;
}

/// Runs external lint tools (flake8, black, ...) over a scratch copy of the code.
pub struct ProcessLinter {
    tools: Vec<LintTool>,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ProcessLinter {
    pub fn new(tools: Vec<LintTool>, timeout: Duration) -> Self {
        Self {
            tools,
            timeout,
            max_output_bytes: 64 * 1024,
        }
    }

    pub fn from_options(runner: &RunnerOptions) -> Self {
        Self::new(
            runner.lint_tools.clone(),
            Duration::from_secs(runner.lint_timeout_secs.max(1)),
        )
    }

    async fn run_tool(&self, tool: &LintTool, file: &str, workdir: &std::path::Path) -> ToolReport {
        let args = substitute(&tool.command, &[("file", file)]);
        let Some((program, rest)) = args.split_first() else {
            return ToolReport {
                tool: tool.name.clone(),
                has_issues: false,
                output: String::new(),
                error: Some("lint command is empty".to_string()),
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(workdir);
        let outcome = run_bounded(cmd, self.timeout, self.max_output_bytes).await;

        if let Some(err) = outcome.launch_error {
            debug!(tool = %tool.name, error = %err, "lint tool unavailable");
            return ToolReport {
                tool: tool.name.clone(),
                has_issues: false,
                output: String::new(),
                error: Some(format!("{} not available: {err}", tool.name)),
            };
        }
        if outcome.timed_out {
            return ToolReport {
                tool: tool.name.clone(),
                has_issues: false,
                output: String::new(),
                error: Some(format!("{} timed out", tool.name)),
            };
        }

        let has_issues = if tool.issues_on_exit_code {
            outcome.exit_code != Some(0)
        } else {
            !outcome.stdout.trim().is_empty()
        };
        let mut output = outcome.stdout;
        if !outcome.stderr.trim().is_empty() {
            output.push_str(&outcome.stderr);
        }
        ToolReport {
            tool: tool.name.clone(),
            has_issues,
            output,
            error: None,
        }
    }
}

#[async_trait]
impl Linter for ProcessLinter {
    async fn lint(&self, code: &str, file_name: &str) -> Vec<ToolReport> {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                return self
                    .tools
                    .iter()
                    .map(|t| ToolReport {
                        tool: t.name.clone(),
                        has_issues: false,
                        output: String::new(),
                        error: Some(format!("failed to prepare lint workspace: {e}")),
                    })
                    .collect();
            }
        };
        let file = sanitize_component(file_name);
        if let Err(e) = fs::write(dir.path().join(&file), code) {
            return vec![ToolReport {
                tool: "workspace".to_string(),
                has_issues: false,
                output: String::new(),
                error: Some(format!("failed to write source for linting: {e}")),
            }];
        }

        let mut reports = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            reports.push(self.run_tool(tool, &file, dir.path()).await);
        }
        reports
    }
}
