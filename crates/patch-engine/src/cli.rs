use clap::Parser;
use std::path::PathBuf;

use crate::layers::service::logging::default_log_dir;

/// The job request is read as JSON from standard input and the run report is
/// written to standard output.
#[derive(Parser, Debug)]
#[command(
    name = "os-patching",
    version,
    about = "Unattended OS patching task"
)]
pub(crate) struct Args {
    /// Optional TOML file overriding the platform defaults.
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long, default_value_os_t = default_log_dir())]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
}
