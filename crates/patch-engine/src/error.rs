use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when a failing process reports no status of its own.
pub(crate) const GENERIC_FAILURE: i32 = 1;

/// Every way a patch run can end early. Each variant maps to the `kind` tag and
/// process exit code reported to the caller.
#[derive(Debug, Error)]
pub(crate) enum PatchError {
    #[error("Invalid JSON received: '{raw}'")]
    Input { raw: String },

    #[error(
        "{} does not exist, declare os_patching and run Puppet first",
        .script.display()
    )]
    Setup { script: PathBuf },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("{message}")]
    Facts { code: i32, message: String },

    #[error("Unsupported OS: {family}")]
    UnsupportedOs { family: String },

    #[error("Unsafe content in {field}")]
    UnsafeParameter { field: &'static str },

    #[error("timeout set to {value} seconds - invalid")]
    InvalidTimeout { value: String },

    #[error("Patching blocked {reasons:?}")]
    Blocked { reasons: Vec<String> },

    #[error("Pre patching command not found {}", .path.display())]
    PreCommandMissing { path: PathBuf },

    #[error("Pre patching command not executable {}", .path.display())]
    PreCommandNotExecutable { path: PathBuf },

    #[error("Pre-patching-command failed: {stderr}")]
    PreCommandFailed { code: i32, stderr: String },

    #[error("{message}")]
    PackageManager {
        tool: &'static str,
        code: i32,
        message: String,
    },

    #[error("TIMEOUT AFTER {seconds} seconds\n{output}")]
    Timeout { seconds: u64, output: String },

    #[error("Fact reboot_override invalid: {value}")]
    RebootOverride { value: String },

    #[error("Invalid parameter for reboot: {value}")]
    RebootParam { value: String },

    #[error("{stderr}")]
    FactRefresh { code: i32, stderr: String },

    #[error("{stderr}")]
    CleanCache { code: i32, stderr: String },
}

impl PatchError {
    pub(crate) fn package_manager(
        tool: &'static str,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        PatchError::PackageManager {
            tool,
            code,
            message: message.into(),
        }
    }

    /// Package manager that produced the failure, if any.
    pub(crate) fn tool(&self) -> Option<&'static str> {
        match self {
            PatchError::PackageManager { tool, .. } => Some(tool),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            PatchError::Input { .. } => "input",
            PatchError::Setup { .. } | PatchError::Config { .. } => "setup",
            PatchError::Facts { .. } => "facts",
            PatchError::UnsupportedOs { .. } => "unsupported-os",
            PatchError::UnsafeParameter { .. } => "unsafe-parameter",
            PatchError::InvalidTimeout { .. } => "invalid-timeout",
            PatchError::Blocked { .. } => "blocked",
            PatchError::PreCommandMissing { .. }
            | PatchError::PreCommandNotExecutable { .. }
            | PatchError::PreCommandFailed { .. } => "pre-patching-command",
            PatchError::PackageManager { .. } => "package-manager",
            PatchError::Timeout { .. } => "timeout",
            PatchError::RebootOverride { .. } => "reboot-override",
            PatchError::RebootParam { .. } => "reboot-param",
            PatchError::FactRefresh { .. } => "fact-refresh",
            PatchError::CleanCache { .. } => "clean-cache",
        }
    }

    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            PatchError::Input { .. } => 400,
            PatchError::Setup { .. } | PatchError::Config { .. } => 255,
            PatchError::Facts { code, .. } => *code,
            PatchError::UnsupportedOs { .. } => 200,
            PatchError::UnsafeParameter { .. } => 110,
            PatchError::InvalidTimeout { .. } => 121,
            PatchError::Blocked { .. } => 100,
            PatchError::PreCommandMissing { .. } => 200,
            PatchError::PreCommandNotExecutable { .. } => 210,
            PatchError::PreCommandFailed { code, .. } => *code,
            PatchError::PackageManager { code, .. } => *code,
            PatchError::Timeout { .. } => 403,
            PatchError::RebootOverride { .. } => 105,
            PatchError::RebootParam { .. } => 108,
            PatchError::FactRefresh { code, .. } => *code,
            PatchError::CleanCache { code, .. } => *code,
        }
    }

    /// First line of the message, as recorded in the history file.
    pub(crate) fn summary(&self) -> String {
        self.to_string()
            .lines()
            .next()
            .unwrap_or_default()
            .trim_end()
            .to_string()
    }
}

/// Maps a captured stderr buffer to text for error messages.
pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}
