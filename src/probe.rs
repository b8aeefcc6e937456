//! Remote environment probing for lazy path resolution.
//!
//! Unset host attributes (base directory, runtime path root) are resolved by
//! querying the remote environment once per host. Each probe is a discrete
//! blocking remote command whose outcome is an optional value plus an
//! optional diagnostic, so fallback order stays visible and testable instead
//! of hiding inside silent empty-string chains.

use crate::exec::RemoteExecutor;

/// Outcome of one environment probe.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProbeReading {
    /// Trimmed probe result, absent when the probe returned nothing usable.
    pub value: Option<String>,
    /// Failure description when the probe command did not succeed.
    pub diagnostic: Option<String>,
}

impl ProbeReading {
    fn value(text: &str) -> Self {
        let trimmed = text.trim();
        Self {
            value: (!trimmed.is_empty()).then(|| trimmed.to_owned()),
            diagnostic: None,
        }
    }

    fn failure(diagnostic: String) -> Self {
        Self {
            value: None,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Reads environment attributes from a remote host.
///
/// Probe failures are never fatal; callers log the diagnostic and fall back
/// to the next candidate.
pub trait RemoteEnvironmentProbe {
    /// Reads the remote `$HOME`.
    fn read_home(&self) -> ProbeReading;
    /// Reads the remote working directory (`pwd`), the fallback for `$HOME`.
    fn read_working_dir(&self) -> ProbeReading;
    /// Reads the remote runtime path root (`$GOPATH`).
    fn read_runtime_root(&self) -> ProbeReading;
}

/// Probe that issues plain shell commands over a [`RemoteExecutor`].
#[derive(Debug)]
pub struct ShellProbe<'a, E: RemoteExecutor> {
    executor: &'a E,
}

impl<'a, E: RemoteExecutor> ShellProbe<'a, E> {
    /// Creates a probe over the given executor.
    #[must_use]
    pub const fn new(executor: &'a E) -> Self {
        Self { executor }
    }

    fn read(&self, command: &str) -> ProbeReading {
        match self.executor.execute(command) {
            Ok(output) if output.is_success() => ProbeReading::value(&output.stdout),
            Ok(output) => ProbeReading::failure(format!(
                "{command} exited with status {:?}: {}",
                output.code,
                output.combined().trim()
            )),
            Err(err) => ProbeReading::failure(err.to_string()),
        }
    }
}

impl<E: RemoteExecutor> RemoteEnvironmentProbe for ShellProbe<'_, E> {
    fn read_home(&self) -> ProbeReading {
        self.read("echo $HOME")
    }

    fn read_working_dir(&self) -> ProbeReading {
        self.read("pwd")
    }

    fn read_runtime_root(&self) -> ProbeReading {
        self.read("echo $GOPATH")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, ExecError};

    struct ScriptedExecutor {
        status: i32,
        stdout: &'static str,
    }

    impl RemoteExecutor for ScriptedExecutor {
        fn execute(&self, _command: &str) -> Result<CommandOutput, ExecError> {
            Ok(CommandOutput {
                code: Some(self.status),
                stdout: self.stdout.to_owned(),
                stderr: String::new(),
            })
        }
    }

    #[test]
    fn successful_probe_trims_output() {
        let executor = ScriptedExecutor {
            status: 0,
            stdout: "/home/deploy\n",
        };
        let reading = ShellProbe::new(&executor).read_home();
        assert_eq!(reading.value.as_deref(), Some("/home/deploy"));
        assert!(reading.diagnostic.is_none());
    }

    #[test]
    fn empty_output_yields_no_value_and_no_diagnostic() {
        let executor = ScriptedExecutor {
            status: 0,
            stdout: "\n",
        };
        let reading = ShellProbe::new(&executor).read_runtime_root();
        assert!(reading.value.is_none());
        assert!(reading.diagnostic.is_none());
    }

    #[test]
    fn failed_probe_carries_diagnostic() {
        let executor = ScriptedExecutor {
            status: 1,
            stdout: "",
        };
        let reading = ShellProbe::new(&executor).read_working_dir();
        assert!(reading.value.is_none());
        let diagnostic = reading.diagnostic.unwrap_or_default();
        assert!(diagnostic.contains("pwd"), "diagnostic: {diagnostic}");
    }
}
