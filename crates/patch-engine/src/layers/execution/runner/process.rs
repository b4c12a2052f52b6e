use std::io;
use std::time::Duration;

use tokio::process::{Child, Command};

const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
pub(super) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_child(child: &Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(-(pid as i32), signal);
        }
    }
}

#[cfg(not(unix))]
fn signal_child(_child: &Child, _signal: i32) {}

#[cfg(unix)]
const SIGTERM: i32 = libc::SIGTERM;
#[cfg(not(unix))]
const SIGTERM: i32 = 15;

#[cfg(unix)]
const SIGKILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const SIGKILL: i32 = 9;

/// Stops the child's whole process group: SIGTERM first, SIGKILL if it is
/// still around after a grace period.
pub(super) async fn terminate_child(child: &mut Child) -> Option<std::process::ExitStatus> {
    signal_child(child, SIGTERM);
    if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        return status.ok();
    }
    signal_child(child, SIGKILL);
    let _ = child.kill().await;
    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => None,
    }
}

/// Launches `raw_command` in its own session with no stdio and releases it.
/// Returns the pid, if the platform reported one.
pub(super) fn spawn_detached(raw_command: &str) -> anyhow::Result<Option<u32>> {
    let mut cmd = system_utils::process::shell_command(raw_command);
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(false);
    apply_process_group(&mut cmd);
    let child = cmd.spawn()?;
    let pid = child.id();
    drop(child);
    Ok(pid)
}
