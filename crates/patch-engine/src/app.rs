use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use patch_protocol::{PackagesUpdated, PatchRequest, RebootMode, RunReport};
use tracing::Instrument;

use crate::context::{elapsed_secs, timestamp, RunContext};
use crate::error::{lossy, PatchError, GENERIC_FAILURE};
use crate::facts::FactsGateway;
use crate::layers::execution::runner::CommandRunner;
use crate::layers::policy::config::EngineConfig;
use crate::layers::policy::params::JobParams;
use crate::layers::policy::reboot::{resolve_effective, RebootProbe};
use crate::layers::service::ReportingSink;
use crate::layers::strategy::{PatchOutcome, PatchStrategy, StrategyRegistry};

/// A run that got as far as a report, and whether it ends in a reboot.
struct Completed {
    report: RunReport,
    reboot: bool,
}

/// Drives one patch run from the raw request to the report and exit code.
pub(crate) struct Orchestrator {
    config: EngineConfig,
    runner: Arc<dyn CommandRunner>,
    strategies: StrategyRegistry,
}

impl Orchestrator {
    pub(crate) fn new(
        config: EngineConfig,
        runner: Arc<dyn CommandRunner>,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            config,
            runner,
            strategies,
        }
    }

    /// Runs the pipeline and returns the process exit code. Exactly one
    /// document is written to `sink` whatever happens.
    pub(crate) async fn run<W: Write>(&self, raw: &str, sink: &mut ReportingSink<W>) -> i32 {
        let started_at = Local::now();
        let span = tracing::info_span!(
            "patch_run",
            start_time = %timestamp(&started_at),
            os_family = tracing::field::Empty,
        );
        let result = self
            .patch(raw, started_at, span.clone())
            .instrument(span.clone())
            .await;
        let _entered = span.enter();
        match result {
            Ok(completed) => {
                let code = sink.success(&completed.report);
                if completed.reboot {
                    self.trigger_reboot();
                }
                code
            }
            Err(err) => sink.failure(&err, &started_at),
        }
    }

    async fn patch(
        &self,
        raw: &str,
        started_at: DateTime<Local>,
        span: tracing::Span,
    ) -> Result<Completed, PatchError> {
        let request = PatchRequest::parse(raw).map_err(|_| PatchError::Input {
            raw: raw.to_string(),
        })?;
        let params = JobParams::from_request(request)?;

        let paths = &self.config.paths;
        if !paths.fact_generation_script.exists() {
            return Err(PatchError::Setup {
                script: paths.fact_generation_script.clone(),
            });
        }

        let runner = self.runner.as_ref();
        let gateway = FactsGateway::new(
            runner,
            &paths.facts_command,
            &paths.fact_generation_command,
        );
        let facts = gateway.gather().await?;
        span.record("os_family", facts.os.family.as_str());
        let strategy =
            self.strategies
                .get(&facts.os.family)
                .ok_or_else(|| PatchError::UnsupportedOs {
                    family: facts.os.family.to_string(),
                })?;

        if params.clean_cache {
            self.clean_cache(strategy).await?;
        }
        if strategy.refreshes_facts() {
            gateway.refresh().await?;
        }

        let mode = resolve_effective(
            facts.inventory.reboot_override.as_ref(),
            params.reboot.as_ref(),
        )?;
        if let Some(reboot_override) = facts
            .inventory
            .reboot_override
            .as_ref()
            .filter(|value| value.to_string() != "default")
        {
            if params.reboot.as_ref() != Some(reboot_override) {
                tracing::info!(
                    reboot_override = %reboot_override,
                    requested = %params.reboot.as_ref().map(ToString::to_string).unwrap_or_default(),
                    "reboot_override fact takes precedence over the reboot parameter"
                );
            }
        }
        tracing::info!(reboot = %mode, security_only = params.security_only, "reboot mode resolved");

        if facts.inventory.blocked {
            tracing::error!(reasons = ?facts.inventory.blocked_reasons, "patching blocked");
            return Err(PatchError::Blocked {
                reasons: facts.inventory.blocked_reasons.clone(),
            });
        }

        let pre_command = facts
            .inventory
            .pre_patching_command
            .as_deref()
            .or(params.pre_patching_command.as_deref());
        if let Some(command) = pre_command {
            self.run_pre_command(command).await?;
        }

        let ctx = RunContext {
            started_at,
            os: facts.os,
            inventory: facts.inventory,
            span,
        };
        let probe = RebootProbe::new(runner, paths);

        if ctx.inventory.update_count(params.security_only) == 0 {
            let reboot = mode == RebootMode::Always;
            let message = if reboot {
                "No patches to apply, reboot triggered"
            } else {
                "No patches to apply"
            };
            tracing::info!("{message}");
            let outcome = PatchOutcome {
                status: "Success".to_string(),
                packages_updated: PackagesUpdated::none(),
                job_id: String::new(),
                raw_output: String::new(),
                pinned_packages: ctx.inventory.pinned_packages.clone(),
            };
            let reboot_required = probe.pending(&ctx.os).await;
            let report = build_report(&ctx, &params, mode, message, outcome, reboot_required);
            return Ok(Completed { report, reboot });
        }

        tracing::info!(
            updates = ctx.inventory.update_count(params.security_only),
            family = %ctx.os.family,
            "patching started"
        );
        let clock = Instant::now();
        let outcome = strategy
            .execute(runner, &ctx, &params)
            .instrument(ctx.span.clone())
            .await?;
        tracing::info!(
            elapsed = %humantime::format_duration(clock.elapsed()),
            packages = outcome.packages_updated.len(),
            job_id = %outcome.job_id,
            "patching finished"
        );

        if strategy.refreshes_facts() {
            gateway.refresh().await?;
        }

        let reboot = probe.is_reboot_needed(&ctx.os, mode).await;
        let reboot_required = probe.pending(&ctx.os).await;
        let report = build_report(
            &ctx,
            &params,
            mode,
            "Patching complete",
            outcome,
            reboot_required,
        );
        Ok(Completed { report, reboot })
    }

    async fn clean_cache(&self, strategy: &dyn PatchStrategy) -> Result<(), PatchError> {
        let Some(command) = strategy.clean_cache_command() else {
            tracing::info!(family = %strategy.family(), "no package cache to clean");
            return Ok(());
        };
        tracing::info!(%command, "cleaning package cache");
        let captured = self
            .runner
            .capture(command)
            .await
            .map_err(|err| PatchError::CleanCache {
                code: GENERIC_FAILURE,
                stderr: format!("{err:#}"),
            })?;
        if captured.success() {
            Ok(())
        } else {
            Err(PatchError::CleanCache {
                code: captured.code,
                stderr: lossy(captured.stderr.as_bytes()),
            })
        }
    }

    async fn run_pre_command(&self, command: &Path) -> Result<(), PatchError> {
        if !command.is_file() {
            return Err(PatchError::PreCommandMissing {
                path: command.to_path_buf(),
            });
        }
        if !is_executable(command) {
            return Err(PatchError::PreCommandNotExecutable {
                path: command.to_path_buf(),
            });
        }
        tracing::info!(command = %command.display(), "running pre-patching command");
        let captured = self
            .runner
            .capture(&command.display().to_string())
            .await
            .map_err(|err| PatchError::PreCommandFailed {
                code: GENERIC_FAILURE,
                stderr: format!("{err:#}"),
            })?;
        if captured.success() {
            Ok(())
        } else {
            Err(PatchError::PreCommandFailed {
                code: captured.code,
                stderr: lossy(captured.stderr.as_bytes()),
            })
        }
    }

    fn trigger_reboot(&self) {
        let command = &self.config.commands.shutdown;
        tracing::info!(%command, "triggering reboot");
        if let Err(err) = self.runner.spawn_detached(command) {
            tracing::error!(error = %format!("{err:#}"), "failed to trigger reboot");
        }
    }
}

fn build_report(
    ctx: &RunContext,
    params: &JobParams,
    mode: RebootMode,
    message: &str,
    outcome: PatchOutcome,
    reboot_required: bool,
) -> RunReport {
    let finished_at = Local::now();
    RunReport {
        return_code: outcome.status,
        reboot: mode,
        security_only: params.security_only,
        message: message.to_string(),
        packages_updated: outcome.packages_updated,
        debug_output: outcome.raw_output,
        job_id: outcome.job_id,
        pinned_packages: outcome.pinned_packages,
        start_time: ctx.start_time(),
        end_time: timestamp(&finished_at),
        duration: elapsed_secs(&ctx.started_at, &finished_at),
        reboot_required,
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
