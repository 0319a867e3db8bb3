use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};
use util::paths::sanitize_component;
use util::task_config::{DockerOptions, ExecutionLimits, Isolation, RunnerOptions};

use crate::process::{run_bounded, substitute};
use crate::types::RawTestOutcome;

/// The test file for a module and the name the submission is written under.
#[derive(Debug, Clone)]
pub struct TestSuite {
    pub path: PathBuf,
    pub solution_file: String,
}

/// Runs submission code against a test suite and reports what happened,
/// without interpreting it.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, code: Option<&str>, tests: &TestSuite, timeout: Duration)
    -> RawTestOutcome;
}

/// Builds the executor selected by the runner options.
pub fn executor_from_options(
    runner: &RunnerOptions,
    limits: &ExecutionLimits,
) -> Box<dyn CodeExecutor> {
    match runner.isolation {
        Isolation::Process => Box::new(
            ProcessExecutor::new(runner.test_command.clone())
                .with_max_output_bytes(limits.max_output_bytes),
        ),
        Isolation::Docker => Box::new(
            DockerExecutor::new(runner.docker.clone(), runner.test_command.clone())
                .with_max_output_bytes(limits.max_output_bytes),
        ),
    }
}

/// A staged copy of the submission and its tests in a private scratch directory.
struct Workspace {
    dir: TempDir,
    tests_name: String,
    solution_name: String,
}

impl Workspace {
    fn stage(code: Option<&str>, tests: &TestSuite) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;

        let tests_name = tests
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test_module.py".to_string());
        fs::copy(&tests.path, dir.path().join(&tests_name))?;

        let solution_name = sanitize_component(&tests.solution_file);
        if let Some(code) = code {
            fs::write(dir.path().join(&solution_name), code)?;
        }

        Ok(Self {
            dir,
            tests_name,
            solution_name,
        })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn stage_failure(e: io::Error) -> RawTestOutcome {
    RawTestOutcome {
        launch_error: Some(format!("failed to prepare sandbox: {e}")),
        ..Default::default()
    }
}

/// Runs the test command as a local subprocess inside a fresh scratch directory.
pub struct ProcessExecutor {
    command: Vec<String>,
    max_output_bytes: usize,
}

impl ProcessExecutor {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            max_output_bytes: ExecutionLimits::default().max_output_bytes,
        }
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }
}

#[async_trait]
impl CodeExecutor for ProcessExecutor {
    async fn execute(
        &self,
        code: Option<&str>,
        tests: &TestSuite,
        timeout: Duration,
    ) -> RawTestOutcome {
        let ws = match Workspace::stage(code, tests) {
            Ok(ws) => ws,
            Err(e) => return stage_failure(e),
        };
        let workdir = ws.path().to_string_lossy().into_owned();
        let solution = ws.path().join(&ws.solution_name);
        let solution_str = solution.to_string_lossy().into_owned();

        let args = substitute(
            &self.command,
            &[
                ("tests", ws.tests_name.as_str()),
                ("solution", solution_str.as_str()),
                ("workdir", workdir.as_str()),
            ],
        );
        let Some((program, rest)) = args.split_first() else {
            return RawTestOutcome {
                launch_error: Some("test command is empty".to_string()),
                ..Default::default()
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .current_dir(ws.path())
            .env("STUDENT_SOLUTION_PATH", &solution);

        debug!(program = %program, workdir = %workdir, "running tests in subprocess");
        run_bounded(cmd, timeout, self.max_output_bytes).await
    }
}

/// Runs the test command inside a disposable container with no network.
pub struct DockerExecutor {
    options: DockerOptions,
    command: Vec<String>,
    max_output_bytes: usize,
}

impl DockerExecutor {
    pub fn new(options: DockerOptions, command: Vec<String>) -> Self {
        Self {
            options,
            command,
            max_output_bytes: ExecutionLimits::default().max_output_bytes,
        }
    }

    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    /// Full `docker run` argument list for one staged workspace.
    pub fn docker_args(
        &self,
        container: &str,
        host_dir: &Path,
        tests_name: &str,
        solution_name: &str,
    ) -> Vec<String> {
        let solution = format!("/work/{solution_name}");
        let inner = substitute(
            &self.command,
            &[
                ("tests", tests_name),
                ("solution", solution.as_str()),
                ("workdir", "/work"),
            ],
        );

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            format!("--name={container}"),
            "--network=none".to_string(),
            format!("--memory={}", self.options.max_memory),
            format!("--cpus={}", self.options.max_cpus),
            format!("--pids-limit={}", self.options.max_processes),
            "--security-opt=no-new-privileges".to_string(),
            "--user=1000:1000".to_string(),
            "-v".to_string(),
            format!("{}:/work", host_dir.display()),
            "-w".to_string(),
            "/work".to_string(),
            "-e".to_string(),
            format!("STUDENT_SOLUTION_PATH={solution}"),
            self.options.image.clone(),
        ];
        args.extend(inner);
        args
    }
}

#[async_trait]
impl CodeExecutor for DockerExecutor {
    async fn execute(
        &self,
        code: Option<&str>,
        tests: &TestSuite,
        timeout: Duration,
    ) -> RawTestOutcome {
        let ws = match Workspace::stage(code, tests) {
            Ok(ws) => ws,
            Err(e) => return stage_failure(e),
        };
        let dir_name = ws
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let container = format!("marker-{}", sanitize_component(dir_name.trim_start_matches('.')));

        let mut cmd = Command::new("docker");
        cmd.args(self.docker_args(&container, ws.path(), &ws.tests_name, &ws.solution_name));

        // killing the docker CLI does not stop the container itself
        let mut cleanup = StopOnDrop::new(["docker", "kill", container.as_str()]);
        let outcome = run_bounded(cmd, timeout, self.max_output_bytes).await;
        if outcome.timed_out {
            cleanup.run().await;
        }
        cleanup.disarm();
        outcome
    }
}

/// Runs a cleanup command if dropped while still armed, such as when a
/// cancelled caller abandons the run midway.
struct StopOnDrop {
    argv: Vec<String>,
    armed: bool,
}

impl StopOnDrop {
    fn new<'a>(argv: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            argv: argv.into_iter().map(str::to_string).collect(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    async fn run(&self) {
        stop(&self.argv).await;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let argv = std::mem::take(&mut self.argv);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { stop(&argv).await });
            }
            Err(_) => warn!(command = ?argv, "no runtime to run cleanup command"),
        }
    }
}

async fn stop(argv: &[String]) {
    let Some((program, args)) = argv.split_first() else {
        return;
    };
    let result = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await;
    match result {
        Ok(out) if out.status.success() => debug!(command = ?argv, "cleanup command ran"),
        Ok(out) => warn!(command = ?argv, code = ?out.status.code(), "cleanup command failed"),
        Err(e) => warn!(command = ?argv, error = %e, "failed to run cleanup command"),
    }
}
