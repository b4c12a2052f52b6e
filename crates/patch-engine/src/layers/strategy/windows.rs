use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use patch_protocol::PackagesUpdated;
use regex::Regex;

use super::{run_failure, PatchOutcome, PatchStrategy};
use crate::context::RunContext;
use crate::error::{PatchError, GENERIC_FAILURE};
use crate::facts::OsFamily;
use crate::layers::execution::runner::CommandRunner;
use crate::layers::policy::params::JobParams;

const TOOL: &str = "windows";
const NOT_APPLICABLE: &str = "not applicable";
/// The update script enforces the job timeout itself; this only guards
/// against a hung PowerShell host.
const SCRIPT_GRACE: Duration = Duration::from_secs(600);

static RESULT_FILE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^##output file is\s*(.*)$").expect("constant regex pattern is valid")
});

pub(crate) struct WindowsStrategy {
    powershell: String,
    default_script: PathBuf,
}

impl WindowsStrategy {
    pub(crate) fn new(powershell: String, default_script: PathBuf) -> Self {
        Self {
            powershell,
            default_script,
        }
    }

    fn script_path(&self, install_dir: Option<&Path>) -> PathBuf {
        match install_dir {
            Some(dir) => dir.join("os_patching/files/os_patching_windows.ps1"),
            None => self.default_script.clone(),
        }
    }
}

#[async_trait]
impl PatchStrategy for WindowsStrategy {
    fn family(&self) -> OsFamily {
        OsFamily::Windows
    }

    fn clean_cache_command(&self) -> Option<&'static str> {
        None
    }

    /// A Windows update scan is slow and the update script runs its own.
    fn refreshes_facts(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        _ctx: &RunContext,
        params: &JobParams,
    ) -> Result<PatchOutcome, PatchError> {
        let script = self.script_path(params.install_dir.as_deref());
        let security_arg = if params.security_only {
            " -SecurityOnly"
        } else {
            ""
        };
        let command = format!(
            "{} -NonInteractive -ExecutionPolicy RemoteSigned -File {}{security_arg} -Timeout {}",
            self.powershell,
            script.display(),
            params.timeout.as_secs()
        );
        tracing::info!(%command, "running patching powershell script");
        let captured = runner
            .capture_within(&command, params.timeout.saturating_add(SCRIPT_GRACE))
            .await
            .map_err(|err| run_failure(TOOL, err))?;
        if !captured.success() && !captured.stderr.trim().is_empty() {
            return Err(PatchError::package_manager(
                TOOL,
                captured.code,
                captured.stderr.trim_end().to_string(),
            ));
        }

        let Some(result_file) = find_result_file(&captured.stdout) else {
            return Err(PatchError::package_manager(
                TOOL,
                GENERIC_FAILURE,
                "patching script did not report an output file",
            ));
        };
        let titles = if result_file.eq_ignore_ascii_case(NOT_APPLICABLE) {
            Vec::new()
        } else {
            read_result_file(Path::new(&result_file))?
        };
        tracing::info!(updates = titles.len(), "windows patching complete");

        Ok(PatchOutcome {
            status: "Success".to_string(),
            packages_updated: PackagesUpdated::Names(titles),
            job_id: String::new(),
            raw_output: captured.stdout,
            pinned_packages: Vec::new(),
        })
    }
}

fn find_result_file(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        RESULT_FILE_LINE
            .captures(line.trim_end_matches('\r'))
            .map(|caps| caps[1].trim().to_string())
    })
}

/// Reads the update list the script left behind and removes the file.
fn read_result_file(path: &Path) -> Result<Vec<String>, PatchError> {
    let unreadable = |err: String| {
        PatchError::package_manager(
            TOOL,
            GENERIC_FAILURE,
            format!("could not read patching result {}: {err}", path.display()),
        )
    };
    let payload = std::fs::read(path).map_err(|err| unreadable(err.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|err| unreadable(err.to_string()))?;
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!(error = %err, path = %path.display(), "failed to delete patching result file");
    }
    Ok(update_titles(&value))
}

fn update_titles(value: &serde_json::Value) -> Vec<String> {
    let title = |item: &serde_json::Value| {
        item.get("Title")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };
    match value {
        serde_json::Value::Array(items) => items.iter().filter_map(title).collect(),
        serde_json::Value::Object(_) => title(value).into_iter().collect(),
        _ => Vec::new(),
    }
}
