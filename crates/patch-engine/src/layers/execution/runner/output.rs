use std::time::Duration;

use crate::error::GENERIC_FAILURE;

/// Result of one streamed command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandOutcome {
    pub(crate) exit_status: i32,
    /// stdout and stderr interleaved.
    pub(crate) output: Vec<u8>,
    pub(crate) duration: Duration,
}

impl CommandOutcome {
    pub(crate) fn new(exit_status: Option<i32>, output: Vec<u8>, duration: Duration) -> Self {
        Self {
            exit_status: exit_status.unwrap_or(GENERIC_FAILURE),
            output,
            duration,
        }
    }

    pub(crate) fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub(crate) fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).to_string()
    }
}

/// Result of a short command whose streams are kept apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CapturedOutput {
    pub(crate) code: i32,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CapturedOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == 0
    }
}
