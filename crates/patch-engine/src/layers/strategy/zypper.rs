use async_trait::async_trait;
use patch_protocol::PackagesUpdated;

use super::{command_line, run_failure, PatchOutcome, PatchStrategy};
use crate::context::RunContext;
use crate::error::PatchError;
use crate::facts::OsFamily;
use crate::layers::execution::runner::CommandRunner;
use crate::layers::policy::params::JobParams;

const TOOL: &str = "zypper";
const GLOBAL_OPTIONS: &str = "--non-interactive --no-abbrev --quiet";

pub(crate) struct ZypperStrategy;

#[async_trait]
impl PatchStrategy for ZypperStrategy {
    fn family(&self) -> OsFamily {
        OsFamily::Suse
    }

    fn clean_cache_command(&self) -> Option<&'static str> {
        Some("zypper cc --all")
    }

    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        ctx: &RunContext,
        params: &JobParams,
    ) -> Result<PatchOutcome, PatchError> {
        let command = zypper_command(
            params.zypper_params.as_deref(),
            params.security_only,
            ctx.os.release_major,
        );
        let action = if params.security_only { "patch" } else { "update" };
        tracing::info!(%command, "running zypper {action}");
        let outcome = runner
            .run(&command, params.timeout)
            .await
            .map_err(|err| run_failure(TOOL, err))?;
        tracing::debug!(
            exit_status = outcome.exit_status,
            elapsed = %humantime::format_duration(outcome.duration),
            "zypper exited"
        );
        let output = outcome.output_text();
        if !outcome.success() {
            return Err(PatchError::package_manager(
                TOOL,
                outcome.exit_status,
                format!(
                    "zypper {action} returned non-zero ({}) : {output}",
                    outcome.exit_status
                ),
            ));
        }

        Ok(PatchOutcome {
            status: "Success".to_string(),
            packages_updated: PackagesUpdated::Names(
                ctx.inventory.updates(params.security_only).to_vec(),
            ),
            job_id: String::new(),
            raw_output: output,
            pinned_packages: ctx.inventory.pinned_packages.clone(),
        })
    }
}

fn zypper_command(zypper_params: Option<&str>, security_only: bool, release_major: i64) -> String {
    let subcommand = if security_only {
        "patch -g security"
    } else {
        "update -t package"
    };
    let replace_files = (release_major > 11).then_some("--replacefiles");
    command_line([
        Some(TOOL),
        Some(GLOBAL_OPTIONS),
        zypper_params,
        Some(subcommand),
        Some("--auto-agree-with-licenses"),
        replace_files,
    ])
}
