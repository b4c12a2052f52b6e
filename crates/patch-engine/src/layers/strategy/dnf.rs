use std::collections::BTreeMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use patch_protocol::PackagesUpdated;
use regex::Regex;

use super::{command_line, query, run_failure, PatchOutcome, PatchStrategy};
use crate::context::RunContext;
use crate::error::{PatchError, GENERIC_FAILURE};
use crate::facts::OsFamily;
use crate::layers::execution::runner::CommandRunner;
use crate::layers::policy::params::JobParams;

const TOOL: &str = "dnf";

// `dnf history` rows look like
//     69 | System <unset>           | 2018-09-17 17:18 | Update  |   12
// and the first one is the most recent transaction.
static HISTORY_ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(\d+)\s*\|\s*[\w\-<>,= ]*\|\s*([\d:\- ]*)")
        .expect("constant regex pattern is valid")
});

static RETURN_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Return-Code\s+:\s+(.*)$").expect("constant regex pattern is valid"));

static PACKAGE_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s+(Installed|Install|Upgraded|Erased|Updated)\s+(\S+)\s")
        .expect("constant regex pattern is valid")
});

pub(crate) struct DnfStrategy;

#[async_trait]
impl PatchStrategy for DnfStrategy {
    fn family(&self) -> OsFamily {
        OsFamily::RedHat
    }

    fn clean_cache_command(&self) -> Option<&'static str> {
        Some("dnf clean all")
    }

    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        ctx: &RunContext,
        params: &JobParams,
    ) -> Result<PatchOutcome, PatchError> {
        let security_flag = params.security_only.then_some("--security");
        let command = command_line([
            Some(TOOL),
            params.yum_params.as_deref(),
            security_flag,
            Some("upgrade -y"),
        ]);
        tracing::info!(%command, timeout_secs = params.timeout.as_secs(), "running dnf upgrade");
        let outcome = runner
            .run(&command, params.timeout)
            .await
            .map_err(|err| run_failure(TOOL, err))?;
        tracing::debug!(
            exit_status = outcome.exit_status,
            elapsed = %humantime::format_duration(outcome.duration),
            "dnf upgrade exited"
        );
        let output = outcome.output_text();
        if !outcome.success() {
            return Err(PatchError::package_manager(
                TOOL,
                outcome.exit_status,
                format!(
                    "dnf upgrade returned non-zero ({}) : {output}",
                    outcome.exit_status
                ),
            ));
        }

        tracing::info!("getting dnf job ID");
        let history = query(runner, TOOL, "dnf history").await?;
        let Some((job, job_time)) = parse_history_row(&history.stdout) else {
            return Err(parse_failure("dnf job ID not found"));
        };
        if job_time.is_empty() {
            return Err(parse_failure("dnf job time not found"));
        }
        check_job_time(&job_time, &ctx.started_at)?;

        tracing::debug!(job = %job, "getting dnf return code and package list");
        let info = query(runner, TOOL, &format!("dnf history info {job}")).await?;
        let Some(return_code) = parse_return_code(&info.stdout) else {
            return Err(parse_failure("dnf return code not found"));
        };
        let actions = parse_package_actions(&info.stdout);

        Ok(PatchOutcome {
            status: return_code,
            packages_updated: PackagesUpdated::Actions(actions),
            job_id: job,
            raw_output: output,
            pinned_packages: ctx.inventory.pinned_packages.clone(),
        })
    }
}

fn parse_failure(message: &str) -> PatchError {
    PatchError::package_manager(TOOL, GENERIC_FAILURE, message)
}

/// Job id and timestamp from the first transaction row.
fn parse_history_row(history: &str) -> Option<(String, String)> {
    history.lines().find_map(|line| {
        HISTORY_ROW
            .captures(line)
            .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
    })
}

/// dnf history only shows minutes, so the row is taken to end at :59 of that
/// minute. A row that still predates the run start belongs to an earlier run.
fn check_job_time(job_time: &str, started_at: &DateTime<Local>) -> Result<(), PatchError> {
    let naive = NaiveDateTime::parse_from_str(&format!("{job_time}:59"), "%Y-%m-%d %H:%M:%S")
        .map_err(|_| parse_failure("dnf job time not found"))?;
    let Some(finished) = Local.from_local_datetime(&naive).latest() else {
        return Err(parse_failure("dnf job time not found"));
    };
    if finished.timestamp() < started_at.timestamp() {
        return Err(parse_failure("dnf did not appear to run"));
    }
    Ok(())
}

fn parse_return_code(info: &str) -> Option<String> {
    info.lines().find_map(|line| {
        RETURN_CODE
            .captures(line.trim_end_matches('\r'))
            .map(|caps| caps[1].trim().to_string())
            .filter(|code| !code.is_empty())
    })
}

fn parse_package_actions(info: &str) -> BTreeMap<String, String> {
    info.lines()
        .filter_map(|line| PACKAGE_ACTION.captures(line))
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}
