//! Local process spawning and remote command execution over SSH.
//!
//! Deployment never links an SSH library; it shells out to the system `ssh`
//! client, the same way the bulk transfer shells out to `rsync`. The
//! [`CommandRunner`] trait isolates process spawning so tests can substitute
//! fakes, and [`RemoteExecutor`] is the narrow handle the rest of the crate
//! uses to run commands on one host.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Merges stdout and stderr into one diagnostic string.
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            return self.stdout.clone();
        }
        if self.stdout.is_empty() {
            return self.stderr.clone();
        }
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| ExecError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Errors surfaced while executing local or remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a remote command exits non-zero or the channel fails.
    #[error("remote command on {host} failed with status {status_text}: {command}: {output}")]
    Remote {
        /// Host the command ran on, as `user@host:port`.
        host: String,
        /// The command that was executed.
        command: String,
        /// Exit status as reported by the remote shell.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Combined stdout and stderr captured from the command.
        output: String,
    },
}

impl ExecError {
    /// Builds a [`ExecError::Remote`] from a failed command's output.
    #[must_use]
    pub fn remote(host: &str, command: &str, output: &CommandOutput) -> Self {
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Self::Remote {
            host: host.to_owned(),
            command: command.to_owned(),
            status: output.code,
            status_text,
            output: output.combined(),
        }
    }
}

/// Command execution handle bound to one remote host.
///
/// One executor is acquired per host and used serially; each `execute` call
/// opens a fresh logical session (one `ssh` invocation) over it. Execution
/// blocks until the command completes with its output fully buffered; there
/// is no timeout in this design, which is a known hardening gap.
pub trait RemoteExecutor {
    /// Runs `command` on the remote host and captures its output.
    ///
    /// A non-zero remote exit is reported in the returned [`CommandOutput`],
    /// not as an `Err`; callers that treat non-zero as fatal wrap it with
    /// [`ExecError::remote`].
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the local `ssh` client cannot start.
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError>;
}

/// Executor backed by the system `ssh` client.
#[derive(Debug)]
pub struct SshExecutor<R: CommandRunner = ProcessCommandRunner> {
    ssh_bin: String,
    user: String,
    host: String,
    port: u16,
    runner: R,
}

impl SshExecutor<ProcessCommandRunner> {
    /// Creates an executor for `user@host:port` using the real process
    /// runner.
    #[must_use]
    pub fn connect(user: &str, host: &str, port: u16) -> Self {
        Self::with_runner(user, host, port, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Creates an executor with a custom runner, used by tests.
    #[must_use]
    pub fn with_runner(user: &str, host: &str, port: u16, runner: R) -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: user.to_owned(),
            host: host.to_owned(),
            port,
            runner,
        }
    }

    fn build_args(&self, command: &str) -> Vec<OsString> {
        vec![
            OsString::from("-p"),
            OsString::from(self.port.to_string()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from(format!("{}@{}", self.user, self.host)),
            OsString::from(command),
        ]
    }
}

impl<R: CommandRunner> RemoteExecutor for SshExecutor<R> {
    fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let args = self.build_args(command);
        self.runner.run(&self.ssh_bin, &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoArgsRunner;

    impl CommandRunner for EchoArgsRunner {
        fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ExecError> {
            let rendered = args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            Ok(CommandOutput {
                code: Some(0),
                stdout: format!("{program} {rendered}"),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn ssh_executor_builds_batch_mode_invocation() {
        let executor = SshExecutor::with_runner("deploy", "10.0.0.1", 2222, EchoArgsRunner);
        let output = executor.execute("echo $HOME").expect("fake runner succeeds");

        assert_eq!(
            output.stdout,
            "ssh -p 2222 -o BatchMode=yes deploy@10.0.0.1 echo $HOME"
        );
    }

    #[test]
    fn combined_concatenates_both_streams() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::from("out\n"),
            stderr: String::from("err\n"),
        };
        assert_eq!(output.combined(), "out\nerr\n");
    }

    #[test]
    fn remote_error_reports_status_and_output() {
        let output = CommandOutput {
            code: Some(127),
            stdout: String::new(),
            stderr: String::from("sh: nope: not found\n"),
        };
        let err = ExecError::remote("deploy@example.com:22", "nope", &output);
        let rendered = err.to_string();
        assert!(rendered.contains("status 127"), "rendered: {rendered}");
        assert!(rendered.contains("not found"), "rendered: {rendered}");
    }
}
