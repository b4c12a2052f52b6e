//! One patch strategy per package-manager family.

mod apt;
mod dnf;
mod windows;
mod zypper;

use std::collections::HashMap;

use async_trait::async_trait;
use patch_protocol::PackagesUpdated;

use crate::context::RunContext;
use crate::error::{PatchError, GENERIC_FAILURE};
use crate::facts::OsFamily;
use crate::layers::execution::runner::{CapturedOutput, CommandRunner, RunError};
use crate::layers::policy::config::PathsConfig;
use crate::layers::policy::params::JobParams;

pub(crate) use self::apt::AptStrategy;
pub(crate) use self::dnf::DnfStrategy;
pub(crate) use self::windows::WindowsStrategy;
pub(crate) use self::zypper::ZypperStrategy;

/// Normalized result of a patch run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PatchOutcome {
    pub(crate) status: String,
    pub(crate) packages_updated: PackagesUpdated,
    pub(crate) job_id: String,
    pub(crate) raw_output: String,
    pub(crate) pinned_packages: Vec<String>,
}

#[async_trait]
pub(crate) trait PatchStrategy: Send + Sync {
    fn family(&self) -> OsFamily;

    /// Command that empties the package manager's cache, if it has one.
    fn clean_cache_command(&self) -> Option<&'static str>;

    /// Whether the cached patch fact should be regenerated around a run.
    fn refreshes_facts(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        ctx: &RunContext,
        params: &JobParams,
    ) -> Result<PatchOutcome, PatchError>;
}

/// Maps each supported OS family to its strategy.
pub(crate) struct StrategyRegistry {
    strategies: HashMap<OsFamily, Box<dyn PatchStrategy>>,
}

impl StrategyRegistry {
    pub(crate) fn new(strategies: Vec<Box<dyn PatchStrategy>>) -> Self {
        let strategies = strategies
            .into_iter()
            .map(|strategy| (strategy.family(), strategy))
            .collect();
        Self { strategies }
    }

    pub(crate) fn standard(paths: &PathsConfig) -> Self {
        Self::new(vec![
            Box::new(DnfStrategy),
            Box::new(AptStrategy),
            Box::new(ZypperStrategy),
            Box::new(WindowsStrategy::new(
                paths.powershell.clone(),
                paths.windows_patch_script.clone(),
            )),
        ])
    }

    pub(crate) fn get(&self, family: &OsFamily) -> Option<&dyn PatchStrategy> {
        self.strategies.get(family).map(|strategy| strategy.as_ref())
    }
}

/// Assembles a command line, skipping empty pieces.
pub(super) fn command_line<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(super) fn run_failure(tool: &'static str, err: RunError) -> PatchError {
    match err {
        RunError::TimedOut { seconds, output } => PatchError::Timeout { seconds, output },
        RunError::Io(err) => PatchError::package_manager(tool, GENERIC_FAILURE, format!("{err:#}")),
    }
}

/// Runs a short query and turns a failed start or non-zero exit into a
/// package-manager error carrying stderr.
pub(super) async fn query(
    runner: &dyn CommandRunner,
    tool: &'static str,
    command: &str,
) -> Result<CapturedOutput, PatchError> {
    let captured = runner
        .capture(command)
        .await
        .map_err(|err| PatchError::package_manager(tool, GENERIC_FAILURE, format!("{err:#}")))?;
    if !captured.success() {
        return Err(PatchError::package_manager(
            tool,
            captured.code,
            captured.stderr.trim_end().to_string(),
        ));
    }
    Ok(captured)
}
