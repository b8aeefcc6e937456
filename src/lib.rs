//! Core library for the harp deployment tool.
//!
//! The crate deploys a prebuilt application artifact and a set of managed
//! files to a fleet of remote hosts over SSH, maintains a versioned release
//! history supporting rollback, and reconciles the local managed-file set
//! against each host's live inventory. Remote work shells out to the system
//! `ssh` and `rsync` clients; nothing here links a transport library.

pub mod config;
pub mod deploy;
pub mod diff;
pub mod exec;
pub mod host;
pub mod probe;
pub mod release;
pub mod script;
pub mod test_support;
pub mod transfer;

pub use config::{AppConfig, ConfigError, HarpConfig, ManagedFile, RunOptions};
pub use deploy::{DeployError, DeployOrchestrator};
pub use diff::{DiffDirection, DiffEntry, FileReconciler};
pub use exec::{
    CommandOutput, CommandRunner, ExecError, ProcessCommandRunner, RemoteExecutor, SshExecutor,
};
pub use host::{AddressError, DEFAULT_SSH_PORT, HostAddress, RemoteHost};
pub use probe::{ProbeReading, RemoteEnvironmentProbe, ShellProbe};
pub use release::{ReleaseStamp, trim_old_releases};
pub use script::{ScriptComposer, ScriptData, ScriptError, escape_interpolation, render};
pub use transfer::{TransferError, Uploader};
