use std::io;
use std::path::{Path, PathBuf};

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "os_patching_task.log";

pub(crate) fn default_log_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("C:/ProgramData/os_patching")
    } else {
        PathBuf::from("/var/log/os_patching")
    }
}

/// Installs the global subscriber: a JSON file layer in `log_dir`, plus a
/// human-readable stderr layer when asked for or when the directory is not
/// writable. Stdout stays reserved for the run report.
pub(crate) fn init_tracing(
    log_dir: &Path,
    log_to_stderr: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_writer, file_guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(writer), Some(guard))
        }
        Err(err) => {
            eprintln!(
                "failed to prepare log directory {}: {err}, logging to stderr",
                log_dir.display()
            );
            (None, None)
        }
    };

    let stderr_layer = (log_to_stderr || file_writer.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_target(false)
    });
    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_target(false)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    file_guard
}
