use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::layers::execution::runner::{CapturedOutput, CommandOutcome, CommandRunner, RunError};

struct Rule {
    prefix: String,
    reply: Reply,
}

enum Reply {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        output: String,
    },
}

/// Scripted runner: replies to commands by prefix and records every call.
/// Unmatched commands succeed with no output.
#[derive(Default)]
pub(crate) struct FakeRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<String>>,
    detached: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, prefix: &str, code: i32, stdout: &str, stderr: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply: Reply::Exit {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        });
        self
    }

    pub(crate) fn time_out(mut self, prefix: &str, output: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            reply: Reply::TimedOut {
                output: output.to_string(),
            },
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }

    pub(crate) fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|call| call.starts_with(prefix))
    }

    fn reply(&self, command: &str) -> Option<&Reply> {
        self.calls.lock().unwrap().push(command.to_string());
        self.rules
            .iter()
            .find(|rule| command.starts_with(&rule.prefix))
            .map(|rule| &rule.reply)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutcome, RunError> {
        match self.reply(command) {
            None => Ok(CommandOutcome::new(Some(0), Vec::new(), Duration::ZERO)),
            Some(Reply::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(CommandOutcome::new(
                Some(*code),
                format!("{stdout}{stderr}").into_bytes(),
                Duration::ZERO,
            )),
            Some(Reply::TimedOut { output }) => Err(RunError::TimedOut {
                seconds: timeout.as_secs(),
                output: output.clone(),
            }),
        }
    }

    async fn capture(&self, command: &str) -> anyhow::Result<CapturedOutput> {
        Ok(self.capture_within(command, Duration::from_secs(60)).await?)
    }

    async fn capture_within(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<CapturedOutput, RunError> {
        match self.reply(command) {
            None => Ok(CapturedOutput::default()),
            Some(Reply::Exit {
                code,
                stdout,
                stderr,
            }) => Ok(CapturedOutput {
                code: *code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            }),
            Some(Reply::TimedOut { output }) => Err(RunError::TimedOut {
                seconds: timeout.as_secs(),
                output: output.clone(),
            }),
        }
    }

    fn spawn_detached(&self, command: &str) -> anyhow::Result<()> {
        self.detached.lock().unwrap().push(command.to_string());
        Ok(())
    }
}
