//! Test doubles shared by unit tests and behavioural tests.
//!
//! The fakes here stand in for the system `ssh` and `rsync` processes so the
//! orchestration logic can be exercised without network access.

use std::ffi::OsString;
use std::sync::{Mutex, PoisonError};

use crate::exec::{CommandOutput, CommandRunner, ExecError, RemoteExecutor};

/// Canned response rule: the first rule whose prefix matches the incoming
/// command wins.
#[derive(Clone, Debug)]
struct CannedResponse {
    prefix: String,
    output: CommandOutput,
}

/// Remote executor fake that records every command and answers from canned
/// prefix rules, defaulting to a silent success.
#[derive(Debug, Default)]
pub struct FakeExecutor {
    rules: Vec<CannedResponse>,
    log: Mutex<Vec<String>>,
}

impl FakeExecutor {
    /// Creates a fake that answers every command with an empty success.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a canned response for commands starting with `prefix`.
    #[must_use]
    pub fn respond(mut self, prefix: &str, code: i32, stdout: &str) -> Self {
        self.rules.push(CannedResponse {
            prefix: prefix.to_owned(),
            output: CommandOutput {
                code: Some(code),
                stdout: stdout.to_owned(),
                stderr: String::new(),
            },
        });
        self
    }

    /// Returns every command executed so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RemoteExecutor for FakeExecutor {
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_owned());
        for rule in &self.rules {
            if command.starts_with(&rule.prefix) {
                return Ok(rule.output.clone());
            }
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Command runner fake that records local process invocations.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<(String, Vec<String>)>>,
    fail_with: Option<(i32, String)>,
}

impl RecordingRunner {
    /// Creates a runner that reports success for every invocation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner whose invocations all fail with `code` and `stderr`.
    #[must_use]
    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            fail_with: Some((code, stderr.to_owned())),
        }
    }

    /// Returns the recorded `(program, args)` invocations.
    #[must_use]
    pub fn invocations(&self) -> Vec<(String, Vec<String>)> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let rendered = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((program.to_owned(), rendered));
        match &self.fail_with {
            Some((code, stderr)) => Ok(CommandOutput {
                code: Some(*code),
                stdout: String::new(),
                stderr: stderr.clone(),
            }),
            None => Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }),
        }
    }
}
