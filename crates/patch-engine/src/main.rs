mod app;
mod cli;
mod context;
mod error;
mod facts;
mod layers;
#[cfg(test)]
mod test_support;

use std::io;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tokio::io::AsyncReadExt;

use crate::app::Orchestrator;
use crate::cli::Args;
use crate::error::PatchError;
use crate::layers::execution::runner::SystemRunner;
use crate::layers::policy::config::{EngineConfig, PathsConfig};
use crate::layers::service::{init_tracing, ReportingSink};
use crate::layers::strategy::StrategyRegistry;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let code = {
        let _file_guard = init_tracing(&args.log_dir, args.log_to_stderr);
        run(args).await
    };
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            let err = PatchError::Config {
                message: format!("{err:#}"),
            };
            let mut sink = ReportingSink::new(io::stdout(), PathsConfig::default().history_file);
            return sink.failure(&err, &Local::now());
        }
    };

    let mut raw = String::new();
    if let Err(err) = tokio::io::stdin().read_to_string(&mut raw).await {
        tracing::warn!(error = %err, "failed to read job request from stdin");
        raw.clear();
    }

    let runner = Arc::new(SystemRunner::new(
        config.limits.poll_interval(),
        config.limits.capture_timeout(),
    ));
    let strategies = StrategyRegistry::standard(&config.paths);
    let mut sink = ReportingSink::new(io::stdout(), config.paths.history_file.clone());
    let orchestrator = Orchestrator::new(config, runner, strategies);
    orchestrator.run(&raw, &mut sink).await
}

fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}
