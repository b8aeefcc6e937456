//! Deployment targets: address parsing, per-host paths, remote sessions.
//!
//! A [`RemoteHost`] owns the command-execution handle for one target and is
//! never shared across concurrent tasks. Identity fields are immutable once
//! parsed; base directory and runtime path root are resolved lazily by
//! probing the remote environment, with lenient fallbacks.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::exec::{CommandOutput, ExecError, ProcessCommandRunner, RemoteExecutor, SshExecutor};
use crate::probe::{RemoteEnvironmentProbe, ShellProbe};


/// Default remote-shell port used when an address omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while parsing a `user@host[:port]` address.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AddressError {
    /// The address has no `@` separator.
    #[error("host group {group} contains malformed address {address:?}: expected user@host[:port]")]
    MissingSeparator {
        /// Host group the address was declared in.
        group: String,
        /// The offending address text.
        address: String,
    },
    /// The user part before `@` is empty.
    #[error("host group {group} contains address {address:?} with an empty user")]
    EmptyUser {
        /// Host group the address was declared in.
        group: String,
        /// The offending address text.
        address: String,
    },
    /// The host part after `@` is empty.
    #[error("host group {group} contains address {address:?} with an empty host")]
    EmptyHost {
        /// Host group the address was declared in.
        group: String,
        /// The offending address text.
        address: String,
    },
    /// The port suffix is not a valid TCP port number.
    #[error("host group {group} contains address {address:?} with invalid port {port:?}")]
    InvalidPort {
        /// Host group the address was declared in.
        group: String,
        /// The offending address text.
        address: String,
        /// The unparseable port text.
        port: String,
    },
}

/// Parsed identity of one deployment target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostAddress {
    /// Login user.
    pub user: String,
    /// Hostname or address.
    pub host: String,
    /// Remote-shell port.
    pub port: u16,
}

impl HostAddress {
    /// Parses `user@host[:port]`, defaulting the port to
    /// [`DEFAULT_SSH_PORT`].
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] naming `group` when the user or host part is
    /// empty, the `@` separator is missing, or the port does not parse.
    pub fn parse(group: &str, address: &str) -> Result<Self, AddressError> {
        let Some((user, rest)) = address.split_once('@') else {
            return Err(AddressError::MissingSeparator {
                group: group.to_owned(),
                address: address.to_owned(),
            });
        };
        if user.is_empty() {
            return Err(AddressError::EmptyUser {
                group: group.to_owned(),
                address: address.to_owned(),
            });
        }

        let (host, port) = match rest.split_once(':') {
            Some((host, port_text)) => {
                let port = port_text
                    .parse::<u16>()
                    .map_err(|_| AddressError::InvalidPort {
                        group: group.to_owned(),
                        address: address.to_owned(),
                        port: port_text.to_owned(),
                    })?;
                (host, port)
            }
            None => (rest, DEFAULT_SSH_PORT),
        };
        if host.is_empty() {
            return Err(AddressError::EmptyHost {
                group: group.to_owned(),
                address: address.to_owned(),
            });
        }

        Ok(Self {
            user: user.to_owned(),
            host: host.to_owned(),
            port,
        })
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// One deployment target with resolved paths and an owned execution handle.
///
/// The executor is acquired once via the constructor and reused serially for
/// every command to this host within a run; each command still runs in a
/// fresh logical session.
pub struct RemoteHost<E: RemoteExecutor = SshExecutor<ProcessCommandRunner>> {
    address: HostAddress,
    group: String,
    app_name: String,
    /// Resolved base working directory; empty until [`Self::resolve_paths`].
    pub home: String,
    /// Resolved runtime path root; empty until [`Self::resolve_paths`].
    pub runtime_root: String,
    /// Optional log directory override.
    pub log_dir: Option<String>,
    /// Host-level environment overrides, applied after application-level
    /// entries.
    pub envs: BTreeMap<String, String>,
    executor: E,
}

impl RemoteHost<SshExecutor<ProcessCommandRunner>> {
    /// Creates a host backed by the system `ssh` client.
    #[must_use]
    pub fn connect(group: &str, address: HostAddress, app_name: &str) -> Self {
        let executor = SshExecutor::connect(&address.user, &address.host, address.port);
        Self::with_executor(group, address, app_name, executor)
    }
}

impl<E: RemoteExecutor> RemoteHost<E> {
    /// Creates a host around an explicitly supplied executor.
    #[must_use]
    pub fn with_executor(group: &str, address: HostAddress, app_name: &str, executor: E) -> Self {
        Self {
            address,
            group: group.to_owned(),
            app_name: app_name.to_owned(),
            home: String::new(),
            runtime_root: String::new(),
            log_dir: None,
            envs: BTreeMap::new(),
            executor,
        }
    }

    /// Parsed address of this host.
    #[must_use]
    pub const fn address(&self) -> &HostAddress {
        &self.address
    }

    /// Host group this target was declared in.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Borrows the host's execution handle.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Resolves the base directory and runtime path root.
    ///
    /// Preference order: `$HOME`, then `pwd` for the base directory;
    /// `$GOPATH`, then the base directory for the runtime root. Probe
    /// failures are logged and tolerated; dependent paths degrade
    /// gracefully.
    pub fn resolve_paths(&mut self) {
        if self.home.is_empty() {
            let reading = ShellProbe::new(&self.executor).read_home();
            if let Some(diagnostic) = reading.diagnostic {
                warn!(host = %self.address, %diagnostic, "failed to probe $HOME");
            }
            self.home = reading.value.unwrap_or_default();
        }
        if self.home.is_empty() {
            let reading = ShellProbe::new(&self.executor).read_working_dir();
            if let Some(diagnostic) = reading.diagnostic {
                warn!(host = %self.address, %diagnostic, "failed to probe working directory");
            }
            self.home = reading.value.unwrap_or_default();
        }

        if self.runtime_root.is_empty() {
            let reading = ShellProbe::new(&self.executor).read_runtime_root();
            if let Some(diagnostic) = reading.diagnostic {
                warn!(host = %self.address, %diagnostic, "failed to probe runtime root");
            }
            self.runtime_root = reading.value.unwrap_or_default();
        }
        if self.runtime_root.is_empty() {
            self.runtime_root = self.home.clone();
        }
    }

    /// Runs `command` on this host, treating a non-zero exit as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Remote`] with this host's identity and the
    /// command's combined output on a non-zero exit, or [`ExecError::Spawn`]
    /// when the channel itself fails.
    pub fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let output = self.executor.execute(command)?;
        if !output.is_success() {
            return Err(ExecError::remote(&self.to_string(), command, &output));
        }
        Ok(output)
    }

    /// Runs `command` without treating a non-zero exit as an error.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Spawn`] when the channel itself fails.
    pub fn execute_unchecked(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.executor.execute(command)
    }

    /// Creates the managed-files directory on the remote side. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the remote `mkdir` fails.
    pub fn ensure_base_layout(&self) -> Result<(), ExecError> {
        self.execute(&format!("mkdir -p {}", self.files_root()))?;
        Ok(())
    }

    /// Remote application root: `<home>/harp/<app>`, or `harp/<app>`
    /// relative to the login directory when no base directory could be
    /// resolved.
    #[must_use]
    pub fn app_root(&self) -> String {
        if self.home.is_empty() {
            return format!("harp/{}", self.app_name);
        }
        format!("{}/harp/{}", self.home, self.app_name)
    }

    /// Remote managed-files directory.
    #[must_use]
    pub fn files_root(&self) -> String {
        format!("{}/files", self.app_root())
    }

    /// Remote build marker path.
    #[must_use]
    pub fn build_info_path(&self) -> String {
        format!("{}/harp-build.info", self.app_root())
    }

    /// Remote PID file path.
    #[must_use]
    pub fn pid_path(&self) -> String {
        format!("{}/app.pid", self.app_root())
    }

    /// Remote log directory, honouring the per-host override.
    #[must_use]
    pub fn log_dir(&self) -> String {
        self.log_dir
            .clone()
            .unwrap_or_else(|| format!("{}/log", self.app_root()))
    }

    /// Remote log file path.
    #[must_use]
    pub fn log_path(&self) -> String {
        format!("{}/app.log", self.log_dir())
    }

    /// Remote releases directory holding archived snapshots.
    #[must_use]
    pub fn releases_dir(&self) -> String {
        format!("{}/releases", self.app_root())
    }

    /// Remote path of a persisted operational script.
    #[must_use]
    pub fn script_path(&self, name: &str) -> String {
        format!("{}/{name}.sh", self.app_root())
    }
}

impl<E: RemoteExecutor> fmt::Display for RemoteHost<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.address.fmt(f)
    }
}

impl<E: RemoteExecutor> fmt::Debug for RemoteHost<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHost")
            .field("address", &self.address)
            .field("group", &self.group)
            .field("app_name", &self.app_name)
            .field("home", &self.home)
            .field("runtime_root", &self.runtime_root)
            .finish_non_exhaustive()
    }
}
