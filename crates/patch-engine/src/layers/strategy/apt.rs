use async_trait::async_trait;
use patch_protocol::PackagesUpdated;

use super::{command_line, run_failure, PatchOutcome, PatchStrategy};
use crate::context::RunContext;
use crate::error::PatchError;
use crate::facts::OsFamily;
use crate::layers::execution::runner::CommandRunner;
use crate::layers::policy::params::JobParams;

const TOOL: &str = "apt";
const FRONTEND: &str = "DEBIAN_FRONTEND=noninteractive";
const OPTIONS: &str = "-o Apt::Get::Purge=false -o Dpkg::Options::=--force-confold -o Dpkg::Options::=--force-confdef --no-install-recommends";

pub(crate) struct AptStrategy;

#[async_trait]
impl PatchStrategy for AptStrategy {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn clean_cache_command(&self) -> Option<&'static str> {
        Some("apt-get clean")
    }

    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        ctx: &RunContext,
        params: &JobParams,
    ) -> Result<PatchOutcome, PatchError> {
        let packages = ctx.inventory.updates(params.security_only).to_vec();
        let command = apt_command(params.dpkg_params.as_deref(), params.security_only, &packages);
        tracing::info!(%command, "running apt-get");
        let outcome = runner
            .run(&command, params.timeout)
            .await
            .map_err(|err| run_failure(TOOL, err))?;
        tracing::debug!(
            exit_status = outcome.exit_status,
            elapsed = %humantime::format_duration(outcome.duration),
            "apt-get exited"
        );
        let output = outcome.output_text();
        if !outcome.success() {
            return Err(PatchError::package_manager(TOOL, outcome.exit_status, output));
        }

        // apt has no transaction log worth parsing; report what was queued.
        Ok(PatchOutcome {
            status: "Success".to_string(),
            packages_updated: PackagesUpdated::Names(packages),
            job_id: String::new(),
            raw_output: output,
            pinned_packages: ctx.inventory.pinned_packages.clone(),
        })
    }
}

fn apt_command(dpkg_params: Option<&str>, security_only: bool, packages: &[String]) -> String {
    let mode = if security_only {
        format!("install {}", shell_words::join(packages))
    } else {
        "dist-upgrade".to_string()
    };
    command_line([
        Some(FRONTEND),
        Some("apt-get"),
        dpkg_params,
        Some("-y"),
        Some(OPTIONS),
        Some(mode.trim_end()),
    ])
}
