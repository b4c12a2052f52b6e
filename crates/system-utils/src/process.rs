use std::process::{ExitStatus, Output, Stdio};

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Returned (inside the `anyhow::Error`) when a command outlives its deadline.
#[derive(Debug, Error)]
#[error("{label} timed out after {}s", .timeout.as_secs())]
pub struct CommandTimedOut {
    pub label: String,
    pub timeout: Duration,
}

/// Builds a command that hands `raw_command` to the platform shell.
pub fn shell_command(raw_command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(raw_command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(raw_command);
        cmd
    }
}

/// Exit code of a finished process; a signal-terminated process maps to 1.
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Runs `cmd` to completion and collects stdout and stderr separately.
///
/// Both pipes are drained while the child runs, so chatty commands cannot
/// stall on a full pipe. Past `command_timeout` the child is killed and an
/// error is returned.
pub async fn run_command_with_timeout(
    cmd: &mut Command,
    command_timeout: Duration,
    label: &str,
) -> anyhow::Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("{label} failed to start"))?;
    let stdout_task = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
    let stderr_task = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));
    let status = match timeout(command_timeout, child.wait()).await {
        Ok(result) => result.with_context(|| format!("{label} failed"))?,
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(CommandTimedOut {
                label: label.to_string(),
                timeout: command_timeout,
            }
            .into());
        }
    };
    let stdout = match stdout_task {
        Some(task) => task.await.context("stdout task join")?,
        None => Vec::new(),
    };
    let stderr = match stderr_task {
        Some(task) => task.await.context("stderr task join")?,
        None => Vec::new(),
    };
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    buf
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let mut cmd = shell_command("echo out; echo err 1>&2; exit 3");
        let output = run_command_with_timeout(&mut cmd, Duration::from_secs(10), "probe")
            .await
            .expect("run");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
        assert_eq!(exit_code(&output.status), 3);
    }

    #[tokio::test]
    async fn large_output_does_not_stall() {
        let mut cmd = shell_command("head -c 300000 /dev/zero");
        let output = run_command_with_timeout(&mut cmd, Duration::from_secs(10), "bulk")
            .await
            .expect("run");
        assert_eq!(output.stdout.len(), 300000);
        assert!(output.status.success());
    }

    #[tokio::test]
    async fn times_out_slow_command() {
        let mut cmd = shell_command("sleep 5");
        let err = run_command_with_timeout(&mut cmd, Duration::from_millis(200), "slow")
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("slow timed out"));
        let timed_out = err.downcast_ref::<CommandTimedOut>().expect("typed timeout");
        assert_eq!(timed_out.timeout, Duration::from_millis(200));
    }
}
