mod output;
mod process;
mod stream;

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use system_utils::process::{exit_code, run_command_with_timeout, shell_command, CommandTimedOut};

pub(crate) use self::output::{CapturedOutput, CommandOutcome};
use self::process::{apply_process_group, spawn_detached, terminate_child};
use self::stream::read_stream_capture;

#[derive(Debug, Error)]
pub(crate) enum RunError {
    #[error("command timed out after {seconds}s")]
    TimedOut { seconds: u64, output: String },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Everything the engine does to the outside world goes through this seam.
#[async_trait]
pub(crate) trait CommandRunner: Send + Sync {
    /// Runs a long command under `timeout`, streaming stdout and stderr into a
    /// single buffer. A command still running at the deadline is terminated.
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, RunError>;

    /// Runs a short command to completion, keeping stdout and stderr apart.
    async fn capture(&self, command: &str) -> anyhow::Result<CapturedOutput>;

    /// Like `capture`, with a caller-chosen deadline. Running past it is
    /// reported as `RunError::TimedOut`.
    async fn capture_within(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, RunError>;

    /// Fire and forget: launches `command` detached from this process.
    fn spawn_detached(&self, command: &str) -> anyhow::Result<()>;
}

pub(crate) struct SystemRunner {
    poll_interval: Duration,
    capture_timeout: Duration,
}

impl SystemRunner {
    pub(crate) fn new(poll_interval: Duration, capture_timeout: Duration) -> Self {
        Self {
            poll_interval,
            capture_timeout,
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, RunError> {
        let started_at = Instant::now();
        // No deadline when the timeout is too far out to represent.
        let deadline = started_at.checked_add(timeout);

        let mut cmd = shell_command(command);
        apply_locale(&mut cmd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        apply_process_group(&mut cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {command}"))?;
        tracing::debug!(command, pid = ?child.id(), timeout_secs = timeout.as_secs(), "command started");

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let stdout = child.stdout.take().context("missing stdout")?;
        let stderr = child.stderr.take().context("missing stderr")?;
        let stdout_task = tokio::spawn(read_stream_capture(stdout, Arc::clone(&buffer)));
        let stderr_task = tokio::spawn(read_stream_capture(stderr, Arc::clone(&buffer)));

        let mut timed_out = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break Some(status.context("wait on child")?),
                _ = tokio::time::sleep(self.poll_interval) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        timed_out = true;
                        tracing::warn!(command, timeout_secs = timeout.as_secs(), "command timed out, terminating");
                        break terminate_child(&mut child).await;
                    }
                }
            }
        };

        // A daemon forked by the command may keep the pipes open after it
        // exits; both readers share one poll interval before they are dropped.
        let drain_deadline = tokio::time::Instant::now() + self.poll_interval;
        for task in [stdout_task, stderr_task] {
            let abort = task.abort_handle();
            match tokio::time::timeout_at(drain_deadline, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => tracing::warn!(error = %err, "failed to read command output"),
                Ok(Err(err)) => tracing::warn!(error = %err, "output reader failed"),
                Err(_) => abort.abort(),
            }
        }
        let output = std::mem::take(&mut *buffer.lock().await);

        if timed_out {
            return Err(RunError::TimedOut {
                seconds: timeout.as_secs(),
                output: String::from_utf8_lossy(&output).to_string(),
            });
        }

        Ok(CommandOutcome::new(
            status.and_then(|status| status.code()),
            output,
            started_at.elapsed(),
        ))
    }

    async fn capture(&self, command: &str) -> anyhow::Result<CapturedOutput> {
        Ok(self.capture_within(command, self.capture_timeout).await?)
    }

    async fn capture_within(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, RunError> {
        let mut cmd = shell_command(command);
        apply_locale(&mut cmd);
        let output = run_command_with_timeout(&mut cmd, timeout, command)
            .await
            .map_err(|err| match err.downcast::<CommandTimedOut>() {
                Ok(timed_out) => RunError::TimedOut {
                    seconds: timed_out.timeout.as_secs(),
                    output: String::new(),
                },
                Err(err) => RunError::Io(err),
            })?;
        Ok(CapturedOutput {
            code: exit_code(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn spawn_detached(&self, command: &str) -> anyhow::Result<()> {
        let pid = spawn_detached(command).with_context(|| format!("spawn {command}"))?;
        tracing::info!(command, pid = ?pid, "detached command launched");
        Ok(())
    }
}

fn apply_locale(cmd: &mut tokio::process::Command) {
    if cfg!(not(windows)) {
        cmd.env("LC_ALL", "C");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner() -> SystemRunner {
        SystemRunner::new(Duration::from_millis(100), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn returns_exit_status_and_merged_output() {
        let outcome = runner()
            .run("echo one; echo two 1>&2; exit 4", Duration::from_secs(10))
            .await
            .expect("run");
        assert_eq!(outcome.exit_status, 4);
        let text = outcome.output_text();
        assert!(text.contains("one"));
        assert!(text.contains("two"));
    }

    #[tokio::test]
    async fn finishes_promptly_before_deadline() {
        let started = Instant::now();
        let outcome = runner()
            .run("echo done", Duration::from_secs(30))
            .await
            .expect("run");
        assert!(outcome.success());
        assert_eq!(outcome.output_text(), "done\n");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminates_command_past_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pid_file = dir.path().join("pid");
        let command = format!("echo $$ > {}; echo partial; sleep 30", pid_file.display());
        let started = Instant::now();
        let err = runner()
            .run(&command, Duration::from_secs(1))
            .await
            .expect_err("timeout");
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            RunError::TimedOut { seconds, output } => {
                assert_eq!(seconds, 1);
                assert!(output.contains("partial"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let pid: i32 = std::fs::read_to_string(&pid_file)
            .expect("pid file")
            .trim()
            .parse()
            .expect("pid");
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "child {pid} survived the timeout");
    }

    #[tokio::test]
    async fn capture_keeps_streams_apart() {
        let captured = runner()
            .capture("echo out; echo err 1>&2")
            .await
            .expect("capture");
        assert!(captured.success());
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
    }

    #[tokio::test]
    async fn capture_past_deadline_is_a_timeout() {
        let err = runner()
            .capture_within("sleep 5", Duration::from_millis(200))
            .await
            .expect_err("timeout");
        assert!(matches!(err, RunError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn unrepresentable_timeout_means_no_deadline() {
        let outcome = runner()
            .run("echo ok", Duration::from_secs(u64::MAX))
            .await
            .expect("run");
        assert!(outcome.success());
        assert_eq!(outcome.output_text(), "ok\n");
    }

    #[tokio::test]
    async fn background_child_holding_pipes_does_not_stall_return() {
        let started = Instant::now();
        let outcome = runner()
            .run("sleep 3 & echo hi", Duration::from_secs(10))
            .await
            .expect("run");
        assert!(outcome.success());
        assert!(outcome.output_text().contains("hi"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn commands_run_with_c_locale() {
        let captured = runner().capture("echo $LC_ALL").await.expect("capture");
        assert_eq!(captured.stdout.trim(), "C");
    }

    #[tokio::test]
    async fn detached_command_outlives_the_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("marker");
        runner()
            .spawn_detached(&format!("sleep 0.2; touch {}", marker.display()))
            .expect("spawn");
        assert!(!marker.exists());
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
    }
}
