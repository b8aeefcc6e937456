//! Bulk transfer of the artifact and managed files to a host.
//!
//! Transfer shells out to the system `rsync` binary with mirror semantics
//! (`-az --delete`) over the system `ssh` client. The artifact and the
//! files tree can be excluded independently per run. After a successful
//! transfer the build marker is written through the host's session handle.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{AppConfig, RunOptions};
use crate::exec::{CommandRunner, ExecError, ProcessCommandRunner, RemoteExecutor};
use crate::host::RemoteHost;

/// Errors surfaced while uploading to a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransferError {
    /// Raised when a staging source is absent before the transfer starts.
    #[error("missing staging source: {path} (run the build step first)")]
    MissingSource {
        /// Staging path that was expected to exist.
        path: Utf8PathBuf,
    },
    /// Raised when `rsync` completes with a non-zero exit code.
    #[error("rsync to {host} exited with status {status_text}: {stderr}")]
    Rsync {
        /// Destination host, as `user@host:port`.
        host: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the local `rsync` or the remote marker write fails to
    /// run at all.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Uploads the staged artifact and managed files to hosts.
#[derive(Debug)]
pub struct Uploader<'a, R: CommandRunner = ProcessCommandRunner> {
    app: &'a AppConfig,
    options: &'a RunOptions,
    rsync_bin: String,
    runner: R,
}

impl<'a> Uploader<'a, ProcessCommandRunner> {
    /// Creates an uploader using the real process runner.
    #[must_use]
    pub fn new(app: &'a AppConfig, options: &'a RunOptions) -> Self {
        Self::with_runner(app, options, ProcessCommandRunner)
    }
}

impl<'a, R: CommandRunner> Uploader<'a, R> {
    /// Creates an uploader with a custom runner, used by tests.
    #[must_use]
    pub fn with_runner(app: &'a AppConfig, options: &'a RunOptions, runner: R) -> Self {
        Self {
            app,
            options,
            rsync_bin: String::from("rsync"),
            runner,
        }
    }

    fn sources(&self) -> Result<Vec<Utf8PathBuf>, TransferError> {
        let mut sources = Vec::new();
        if !self.options.no_build {
            let artifact = self.options.artifact_path(&self.app.name);
            if !artifact.is_file() {
                return Err(TransferError::MissingSource { path: artifact });
            }
            sources.push(artifact);
        }
        if !self.options.no_files {
            let files = self.options.files_dir();
            if !files.is_dir() {
                return Err(TransferError::MissingSource { path: files });
            }
            sources.push(files);
        }
        Ok(sources)
    }

    fn build_args<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
        sources: &[Utf8PathBuf],
    ) -> Vec<OsString> {
        let address = host.address();
        let remote_shell = format!(
            "ssh -l {} -p {} -o BatchMode=yes",
            address.user, address.port
        );
        let mut args = vec![
            OsString::from("-az"),
            OsString::from("--delete"),
            OsString::from("-e"),
            OsString::from(remote_shell),
        ];
        if self.options.debug {
            args.push(OsString::from("-P"));
        }
        for source in sources {
            args.push(OsString::from(source.as_str()));
        }
        args.push(OsString::from(format!(
            "{}@{}:{}/",
            address.user,
            address.host,
            host.app_root()
        )));
        args
    }

    /// Mirrors the staged artifact and files tree into the host's
    /// application root, then writes the build marker.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when a staging source is missing, `rsync`
    /// exits non-zero, or the marker write fails.
    pub fn upload<E: RemoteExecutor>(&self, host: &RemoteHost<E>) -> Result<(), TransferError> {
        let sources = self.sources()?;
        if !sources.is_empty() {
            let args = self.build_args(host, &sources);
            let output = self.runner.run(&self.rsync_bin, &args)?;
            if !output.is_success() {
                let status_text = output
                    .code
                    .map_or_else(|| String::from("unknown"), |code| code.to_string());
                return Err(TransferError::Rsync {
                    host: host.to_string(),
                    status: output.code,
                    status_text,
                    stderr: output.stderr,
                });
            }
        }
        self.write_build_marker(host)?;
        Ok(())
    }

    /// Writes the free-form build marker verbatim into `harp-build.info`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the remote write fails.
    pub fn write_build_marker<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
    ) -> Result<(), ExecError> {
        let command = format!(
            "cat <<EOF > {}\n{}\nEOF",
            host.build_info_path(),
            self.options.build_info
        );
        host.execute(&command)?;
        Ok(())
    }
}
