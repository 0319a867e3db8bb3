//! Wall-clock bounded subprocess execution shared by the test executor and linters.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::types::RawTestOutcome;

const TRUNCATED: &str = "\n[output truncated]";

/// Runs `cmd` to completion or until `time_limit` elapses.
///
/// The child gets its own process group, and the whole group (interpreter
/// plus anything it forked) is killed once the run is over: on expiry, on
/// completion, or when the returned future is dropped by a cancelled caller.
/// At most `max_output_bytes` of each stream is kept; the rest is drained.
/// Never fails: spawn errors come back as `launch_error`.
pub async fn run_bounded(
    mut cmd: Command,
    time_limit: Duration,
    max_output_bytes: usize,
) -> RawTestOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let start = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "failed to spawn process");
            return RawTestOutcome {
                launch_error: Some(e.to_string()),
                duration: start.elapsed(),
                ..Default::default()
            };
        }
    };
    let pid = child.id();
    let _group = GroupKill(pid);

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = async {
        let (stdout, stderr) = tokio::join!(
            capture(stdout, max_output_bytes),
            capture(stderr, max_output_bytes),
        );
        (stdout, stderr, child.wait().await)
    };

    match timeout(time_limit, finished).await {
        Ok((stdout, stderr, Ok(status))) => RawTestOutcome {
            stdout,
            stderr,
            exit_code: status.code(),
            timed_out: false,
            duration: start.elapsed(),
            launch_error: None,
        },
        Ok((_, _, Err(e))) => RawTestOutcome {
            launch_error: Some(format!("failed while waiting for process: {e}")),
            duration: start.elapsed(),
            ..Default::default()
        },
        Err(_) => {
            warn!(?pid, limit_secs = time_limit.as_secs_f64(), "process exceeded time limit");
            RawTestOutcome {
                timed_out: true,
                duration: start.elapsed(),
                ..Default::default()
            }
        }
    }
}

/// SIGKILLs a process group when dropped.
///
/// `kill_on_drop` only reaches the direct child; this reaches what it forked.
struct GroupKill(Option<u32>);

impl Drop for GroupKill {
    fn drop(&mut self) {
        kill_process_group(self.0);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

/// Reads a child stream to its end, keeping at most `max` bytes of it.
async fn capture<R: AsyncRead + Unpin>(stream: Option<R>, max: usize) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut kept = Vec::new();
    if let Err(e) = (&mut stream).take(max as u64).read_to_end(&mut kept).await {
        debug!(error = %e, "output stream closed early");
    }
    let dropped = tokio::io::copy(&mut stream, &mut tokio::io::sink())
        .await
        .unwrap_or_default();
    decode_captured(&kept, dropped > 0)
}

/// Decodes captured bytes, marking output that was cut short.
pub fn decode_captured(bytes: &[u8], truncated: bool) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated {
        text.push_str(TRUNCATED);
    }
    text
}

/// Replaces `{name}` placeholders in every argument of a command template.
pub fn substitute(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_marks_cut_output() {
        assert_eq!(decode_captured(b"hello", false), "hello");
        assert_eq!(decode_captured(b"hello", true), "hello\n[output truncated]");
    }

    #[test]
    fn substitute_replaces_every_placeholder() {
        let template = vec![
            "python".to_string(),
            "{tests}".to_string(),
            "--root={workdir}/x".to_string(),
        ];
        let args = substitute(&template, &[("tests", "t.py"), ("workdir", "/w")]);
        assert_eq!(args, vec!["python", "t.py", "--root=/w/x"]);
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let cmd = Command::new("definitely-not-a-real-binary-4821");
        let out = run_bounded(cmd, Duration::from_secs(2), 1024).await;
        assert!(out.launch_error.is_some());
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_and_streams_are_captured() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 3");
        let out = run_bounded(cmd, Duration::from_secs(5), 1024).await;
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn expiry_kills_forked_children_too() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30 & sleep 30; wait");
        let started = Instant::now();
        let out = run_bounded(cmd, Duration::from_millis(300), 1024).await;
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn flooding_output_is_capped_while_reading() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("yes | head -c 2000000; echo done >&2");
        let out = run_bounded(cmd, Duration::from_secs(10), 1024).await;
        assert!(!out.timed_out);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.len(), 1024 + TRUNCATED.len());
        assert!(out.stdout.ends_with("[output truncated]"));
        assert_eq!(out.stderr.trim(), "done");
    }

    /// Gone or a zombie waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_dead(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dropping_the_run_kills_forked_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("bg.pid");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("sleep 30 & echo $! > {}; wait", pid_file.display()));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(500),
            run_bounded(cmd, Duration::from_secs(20), 1024),
        )
        .await;
        assert!(cancelled.is_err());

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !is_dead(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(is_dead(pid), "background process {pid} survived");
    }
}
