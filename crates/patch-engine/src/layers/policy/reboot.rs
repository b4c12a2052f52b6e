use std::path::Path;

use base64::Engine;
use patch_protocol::{RebootMode, RebootSetting};

use crate::error::PatchError;
use crate::facts::{OsDescriptor, OsFamily};
use crate::layers::execution::runner::{CapturedOutput, CommandRunner};
use crate::layers::policy::config::PathsConfig;

/// Registry and CIM checks for a pending Windows restart. Each check ignores
/// its own errors so one unavailable source cannot mask the others.
const WINDOWS_PENDING_REBOOT_SCRIPT: &str = r#"
$ErrorActionPreference="stop"
$rebootPending = $false
if (Get-ChildItem "HKLM:\Software\Microsoft\Windows\CurrentVersion\Component Based Servicing\RebootPending" -EA Ignore) { $rebootPending = $true }
if (Get-Item "HKLM:\SOFTWARE\Microsoft\Windows\CurrentVersion\WindowsUpdate\Auto Update\RebootRequired" -EA Ignore) { $rebootPending = $true }
if (Get-ItemProperty "HKLM:\SYSTEM\CurrentControlSet\Control\Session Manager" -Name PendingFileRenameOperations -EA Ignore) { $rebootPending = $true }
try {
    $util = [wmiclass]"\\.\root\ccm\clientsdk:CCM_ClientUtilities"
    $status = $util.DetermineIfRebootPending()
    if (($null -ne $status) -and $status.RebootPending) {
        $rebootPending = $true
    }
}
catch {}
$rebootPending
"#;

/// Resolves the reboot mode for this run. The node-level override wins unless
/// it is `default`, in which case the caller's preference applies. A node
/// without the fact has an invalid override.
pub(crate) fn resolve_effective(
    reboot_override: Option<&RebootSetting>,
    requested: Option<&RebootSetting>,
) -> Result<RebootMode, PatchError> {
    let reboot_override = match reboot_override {
        None => {
            return Err(PatchError::RebootOverride {
                value: String::new(),
            })
        }
        Some(RebootSetting::Named(name)) if name == "default" => {
            return resolve_requested(requested)
        }
        Some(setting) => setting,
    };
    named_mode(reboot_override).ok_or_else(|| PatchError::RebootOverride {
        value: reboot_override.to_string(),
    })
}

fn resolve_requested(requested: Option<&RebootSetting>) -> Result<RebootMode, PatchError> {
    match requested {
        None => Ok(RebootMode::Never),
        Some(setting) => named_mode(setting).ok_or_else(|| PatchError::RebootParam {
            value: setting.to_string(),
        }),
    }
}

fn named_mode(setting: &RebootSetting) -> Option<RebootMode> {
    match setting {
        RebootSetting::Flag(true) => Some(RebootMode::Patched),
        RebootSetting::Flag(false) => Some(RebootMode::Never),
        RebootSetting::Named(name) => match name.as_str() {
            "always" => Some(RebootMode::Always),
            "never" => Some(RebootMode::Never),
            "patched" => Some(RebootMode::Patched),
            "smart" => Some(RebootMode::Smart),
            _ => None,
        },
        RebootSetting::Other(_) => None,
    }
}

/// `needs-restarting` semantics per release: from 7 on `-r` exits non-zero
/// when a reboot is due; on 6 any listed process counts; before 6 the tool
/// cannot tell, so a reboot is assumed.
pub(crate) fn redhat_reboot_needed(release_major: i64, probe: &CapturedOutput) -> bool {
    if release_major > 6 {
        !probe.success()
    } else if release_major == 6 {
        !(probe.stdout.is_empty() && probe.stderr.is_empty())
    } else {
        true
    }
}

pub(crate) struct RebootProbe<'a> {
    runner: &'a dyn CommandRunner,
    paths: &'a PathsConfig,
}

impl<'a> RebootProbe<'a> {
    pub(crate) fn new(runner: &'a dyn CommandRunner, paths: &'a PathsConfig) -> Self {
        Self { runner, paths }
    }

    /// Reboot decision for `mode`. Smart mode on RedHat follows the
    /// release-specific `needs-restarting` rules.
    pub(crate) async fn is_reboot_needed(&self, os: &OsDescriptor, mode: RebootMode) -> bool {
        match mode {
            RebootMode::Always | RebootMode::Patched => true,
            RebootMode::Never => false,
            RebootMode::Smart => match &os.family {
                OsFamily::RedHat => self.redhat_smart(os.release_major).await,
                _ => self.pending(os).await,
            },
        }
    }

    /// Whether the OS itself reports a pending restart, as shown in the run
    /// report.
    pub(crate) async fn pending(&self, os: &OsDescriptor) -> bool {
        match &os.family {
            OsFamily::RedHat => self.redhat_pending().await,
            OsFamily::Debian | OsFamily::Suse => self.paths.reboot_required_marker.is_file(),
            OsFamily::Windows => self.windows_pending().await,
            OsFamily::Other(_) => false,
        }
    }

    fn needs_restarting(&self) -> Option<&Path> {
        let tool = self.paths.needs_restarting.as_path();
        if tool.is_file() {
            return Some(tool);
        }
        tracing::warn!(
            tool = %tool.display(),
            "needs-restarting command not found, cannot determine if reboot is required; install yum-utils/dnf-utils to enable this"
        );
        None
    }

    async fn redhat_pending(&self) -> bool {
        let Some(tool) = self.needs_restarting() else {
            return false;
        };
        match self.runner.capture(&format!("{} -r", tool.display())).await {
            Ok(probe) => !probe.success(),
            Err(err) => {
                tracing::warn!(error = %err, "needs-restarting probe failed");
                false
            }
        }
    }

    async fn redhat_smart(&self, release_major: i64) -> bool {
        let Some(tool) = self.needs_restarting() else {
            return false;
        };
        if release_major < 6 {
            return true;
        }
        let command = if release_major > 6 {
            format!("{} -r", tool.display())
        } else {
            tool.display().to_string()
        };
        match self.runner.capture(&command).await {
            Ok(probe) => redhat_reboot_needed(release_major, &probe),
            Err(err) => {
                tracing::warn!(error = %err, "needs-restarting probe failed");
                false
            }
        }
    }

    async fn windows_pending(&self) -> bool {
        let command = format!(
            "{} -NonInteractive -EncodedCommand {}",
            self.paths.powershell,
            encode_powershell(WINDOWS_PENDING_REBOOT_SCRIPT)
        );
        match self.runner.capture(&command).await {
            Ok(probe) => probe
                .stdout
                .lines()
                .next()
                .map(|line| line.trim() == "True")
                .unwrap_or(false),
            Err(err) => {
                tracing::warn!(error = %err, "pending reboot probe failed");
                false
            }
        }
    }
}

/// PowerShell's `-EncodedCommand` takes base64 over UTF-16LE.
fn encode_powershell(script: &str) -> String {
    let bytes: Vec<u8> = script
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;

    fn named(value: &str) -> RebootSetting {
        RebootSetting::Named(value.to_string())
    }

    fn probe(code: i32, stdout: &str, stderr: &str) -> CapturedOutput {
        CapturedOutput {
            code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn os(family: OsFamily, release_major: i64) -> OsDescriptor {
        OsDescriptor {
            family,
            release_major,
        }
    }

    #[test]
    fn override_wins_over_request() {
        for (value, expected) in [
            ("always", RebootMode::Always),
            ("never", RebootMode::Never),
            ("patched", RebootMode::Patched),
            ("smart", RebootMode::Smart),
        ] {
            for requested in [None, Some(named("always")), Some(named("bogus"))] {
                let mode = resolve_effective(Some(&named(value)), requested.as_ref()).unwrap();
                assert_eq!(mode, expected);
            }
        }
    }

    #[test]
    fn boolean_settings_normalize() {
        let mode = resolve_effective(Some(&RebootSetting::Flag(true)), None).unwrap();
        assert_eq!(mode, RebootMode::Patched);
        let mode = resolve_effective(Some(&named("default")), Some(&RebootSetting::Flag(false)))
            .unwrap();
        assert_eq!(mode, RebootMode::Never);
    }

    #[test]
    fn default_override_falls_back_to_request() {
        let mode = resolve_effective(Some(&named("default")), Some(&named("smart"))).unwrap();
        assert_eq!(mode, RebootMode::Smart);
        let mode = resolve_effective(Some(&named("default")), None).unwrap();
        assert_eq!(mode, RebootMode::Never);
    }

    #[test]
    fn missing_override_fact_is_invalid() {
        let err = resolve_effective(None, Some(&named("always"))).unwrap_err();
        assert_eq!(err.kind(), "reboot-override");
        assert_eq!(err.exit_code(), 105);
        assert_eq!(err.to_string(), "Fact reboot_override invalid: ");
    }

    #[test]
    fn invalid_values_use_their_own_errors() {
        let err = resolve_effective(Some(&named("sometimes")), None).unwrap_err();
        assert_eq!(err.kind(), "reboot-override");
        assert_eq!(err.exit_code(), 105);

        let err = resolve_effective(Some(&named("default")), Some(&named("later"))).unwrap_err();
        assert_eq!(err.kind(), "reboot-param");
        assert_eq!(err.exit_code(), 108);
        assert_eq!(err.to_string(), "Invalid parameter for reboot: later");
    }

    #[test]
    fn redhat_decision_follows_release() {
        assert!(redhat_reboot_needed(5, &probe(0, "", "")));
        assert!(redhat_reboot_needed(4, &probe(1, "x", "")));
        assert!(!redhat_reboot_needed(6, &probe(1, "", "")));
        assert!(redhat_reboot_needed(6, &probe(0, "1234 : /usr/sbin/sshd", "")));
        assert!(redhat_reboot_needed(6, &probe(0, "", "warning")));
        assert!(!redhat_reboot_needed(8, &probe(0, "No core libraries updated", "")));
        assert!(redhat_reboot_needed(9, &probe(1, "Reboot is required", "")));
    }

    #[tokio::test]
    async fn explicit_modes_skip_probing() {
        let runner = FakeRunner::new();
        let paths = PathsConfig::default();
        let probe = RebootProbe::new(&runner, &paths);
        let target = os(OsFamily::RedHat, 8);
        assert!(probe.is_reboot_needed(&target, RebootMode::Always).await);
        assert!(probe.is_reboot_needed(&target, RebootMode::Patched).await);
        assert!(!probe.is_reboot_needed(&target, RebootMode::Never).await);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn debian_checks_marker_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let paths = PathsConfig {
            reboot_required_marker: dir.path().join("reboot-required"),
            ..PathsConfig::default()
        };
        let probe = RebootProbe::new(&runner, &paths);
        let target = os(OsFamily::Debian, 12);
        assert!(!probe.is_reboot_needed(&target, RebootMode::Smart).await);
        std::fs::write(&paths.reboot_required_marker, "").unwrap();
        assert!(probe.is_reboot_needed(&target, RebootMode::Smart).await);
        assert!(probe.pending(&os(OsFamily::Suse, 15)).await);
    }

    #[tokio::test]
    async fn redhat_without_tool_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let paths = PathsConfig {
            needs_restarting: dir.path().join("needs-restarting"),
            ..PathsConfig::default()
        };
        let probe = RebootProbe::new(&runner, &paths);
        assert!(!probe.is_reboot_needed(&os(OsFamily::RedHat, 5), RebootMode::Smart).await);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn redhat_runs_probe_with_release_flag() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("needs-restarting");
        std::fs::write(&tool, "").unwrap();
        let runner = FakeRunner::new().respond(&tool.display().to_string(), 1, "", "");
        let paths = PathsConfig {
            needs_restarting: tool.clone(),
            ..PathsConfig::default()
        };
        let probe = RebootProbe::new(&runner, &paths);
        assert!(probe.is_reboot_needed(&os(OsFamily::RedHat, 8), RebootMode::Smart).await);
        assert_eq!(runner.calls(), vec![format!("{} -r", tool.display())]);
    }

    #[tokio::test]
    async fn report_probe_always_uses_reboot_flag() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("needs-restarting");
        std::fs::write(&tool, "").unwrap();
        let paths = PathsConfig {
            needs_restarting: tool.clone(),
            ..PathsConfig::default()
        };
        for release in [5, 6, 8] {
            let runner = FakeRunner::new().respond(&tool.display().to_string(), 0, "", "");
            let probe = RebootProbe::new(&runner, &paths);
            assert!(!probe.pending(&os(OsFamily::RedHat, release)).await);
            assert_eq!(runner.calls(), vec![format!("{} -r", tool.display())]);
        }

        let runner = FakeRunner::new().respond(&tool.display().to_string(), 1, "", "");
        let probe = RebootProbe::new(&runner, &paths);
        assert!(probe.pending(&os(OsFamily::RedHat, 6)).await);
        assert!(!probe.is_reboot_needed(&os(OsFamily::RedHat, 6), RebootMode::Smart).await);
        assert!(probe.is_reboot_needed(&os(OsFamily::RedHat, 5), RebootMode::Smart).await);
    }

    #[tokio::test]
    async fn unknown_family_never_needs_reboot() {
        let runner = FakeRunner::new();
        let paths = PathsConfig::default();
        let probe = RebootProbe::new(&runner, &paths);
        let target = os(OsFamily::Other("Gentoo".to_string()), 2);
        assert!(!probe.is_reboot_needed(&target, RebootMode::Smart).await);
    }

    #[tokio::test]
    async fn windows_reads_first_line_of_probe() {
        let runner = FakeRunner::new().respond("powershell", 0, "True\r\n", "");
        let paths = PathsConfig {
            powershell: "powershell".to_string(),
            ..PathsConfig::default()
        };
        let probe = RebootProbe::new(&runner, &paths);
        assert!(probe.pending(&os(OsFamily::Windows, 10)).await);

        let runner = FakeRunner::new().respond("powershell", 0, "False\r\n", "");
        let probe = RebootProbe::new(&runner, &paths);
        assert!(!probe.pending(&os(OsFamily::Windows, 10)).await);
    }

    #[test]
    fn powershell_encoding_is_utf16le_base64() {
        assert_eq!(encode_powershell("$a"), "JABhAA==");
    }
}
