//! Orchestrates end-to-end deployment across the target fleet.
//!
//! Per host the sequence is: resolve paths, ensure the remote layout,
//! transfer the artifact and managed files, persist the operational
//! scripts, execute the deploy script, and trim old releases. Hosts share
//! one release stamp per run; the first fatal error aborts the run and
//! leaves already-deployed hosts untouched.

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{AppConfig, RunOptions};
use crate::exec::{CommandRunner, ExecError, ProcessCommandRunner, RemoteExecutor};
use crate::host::RemoteHost;
use crate::release::{ReleaseStamp, trim_old_releases};
use crate::script::{ScriptComposer, ScriptError};
use crate::transfer::{TransferError, Uploader};

/// Errors surfaced while deploying to the fleet.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployError {
    /// Raised when script composition fails for a host.
    #[error("failed to compose scripts for {host}: {source}")]
    Script {
        /// Host being deployed, as `user@host:port`.
        host: String,
        /// Underlying composition error.
        #[source]
        source: ScriptError,
    },
    /// Raised when the bulk transfer to a host fails.
    #[error("failed to upload to {host}: {source}")]
    Transfer {
        /// Host being deployed, as `user@host:port`.
        host: String,
        /// Underlying transfer error.
        #[source]
        source: TransferError,
    },
    /// Raised when a remote command fails; carries the host identity and
    /// the command's combined output.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Sequences deployment over every target host.
#[derive(Debug)]
pub struct DeployOrchestrator<'a, R: CommandRunner = ProcessCommandRunner> {
    composer: ScriptComposer<'a>,
    uploader: Uploader<'a, R>,
    options: &'a RunOptions,
}

impl<'a> DeployOrchestrator<'a> {
    /// Creates an orchestrator using the real process runner for transfers.
    #[must_use]
    pub fn new(app: &'a AppConfig, options: &'a RunOptions) -> Self {
        Self::with_uploader(app, options, Uploader::new(app, options))
    }
}

impl<'a, R: CommandRunner> DeployOrchestrator<'a, R> {
    /// Creates an orchestrator around an explicit uploader, used by tests.
    #[must_use]
    pub const fn with_uploader(
        app: &'a AppConfig,
        options: &'a RunOptions,
        uploader: Uploader<'a, R>,
    ) -> Self {
        Self {
            composer: ScriptComposer::new(app, options),
            uploader,
            options,
        }
    }

    /// Deploys to every host in order, allocating one release stamp for the
    /// whole run.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeployError`] observed; hosts already deployed
    /// are not rolled back.
    pub fn execute<E: RemoteExecutor>(
        &self,
        hosts: &mut [RemoteHost<E>],
    ) -> Result<ReleaseStamp, DeployError> {
        let stamp = ReleaseStamp::now();
        self.execute_with_stamp(hosts, &stamp)?;
        Ok(stamp)
    }

    /// Deploys to every host using a caller-supplied release stamp.
    ///
    /// # Errors
    ///
    /// Returns the first [`DeployError`] observed.
    pub fn execute_with_stamp<E: RemoteExecutor>(
        &self,
        hosts: &mut [RemoteHost<E>],
        stamp: &ReleaseStamp,
    ) -> Result<(), DeployError> {
        for host in hosts.iter_mut() {
            self.deploy_host(host, stamp)?;
        }
        Ok(())
    }

    fn deploy_host<E: RemoteExecutor>(
        &self,
        host: &mut RemoteHost<E>,
        stamp: &ReleaseStamp,
    ) -> Result<(), DeployError> {
        info!(host = %host, release = %stamp, "deploying");
        host.resolve_paths();
        host.ensure_base_layout()?;

        let host_name = host.to_string();
        self.uploader
            .upload(host)
            .map_err(|source| DeployError::Transfer {
                host: host_name.clone(),
                source,
            })?;

        let restart = self
            .composer
            .restart_wrapper(host, stamp)
            .map_err(|source| DeployError::Script {
                host: host_name.clone(),
                source,
            })?;
        let kill = self.composer.kill_script(host);
        let rollback = self
            .composer
            .rollback_script(host)
            .map_err(|source| DeployError::Script {
                host: host_name.clone(),
                source,
            })?;
        for (name, script) in [
            ("restart", restart.as_str()),
            ("kill", kill.as_str()),
            ("rollback", rollback.as_str()),
        ] {
            host.execute(&ScriptComposer::save_script_command(host, name, script))?;
        }

        let deploy = self
            .composer
            .deploy_script(host, stamp)
            .map_err(|source| DeployError::Script {
                host: host_name.clone(),
                source,
            })?;
        debug!(host = %host, script = %deploy, "executing deploy script");
        host.execute(&deploy)?;

        if !self.options.no_rollback {
            trim_old_releases(host, self.options.keep_releases);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;
    use crate::config::ManagedFile;
    use crate::host::HostAddress;
    use crate::test_support::{FakeExecutor, RecordingRunner};

    fn app_config() -> AppConfig {
        AppConfig {
            name: String::from("web"),
            import_path: String::from("example.com/web"),
            files: vec![ManagedFile {
                path: String::from("config/app.yaml"),
                delete: false,
            }],
            args: Vec::new(),
            envs: BTreeMap::new(),
            kill_sig: String::from("KILL"),
            deploy_script: None,
            restart_script: None,
        }
    }

    fn staged_options(staging: &TempDir) -> RunOptions {
        let root = Utf8PathBuf::from_path_buf(staging.path().to_path_buf()).expect("utf8");
        fs::write(staging.path().join("web"), b"binary").expect("write artifact");
        fs::create_dir_all(staging.path().join("files")).expect("files dir");
        fs::create_dir_all(staging.path().join("src/config")).expect("src dir");
        fs::write(staging.path().join("src/config/app.yaml"), b"key: value\n")
            .expect("managed file");
        RunOptions {
            staging_dir: root.clone(),
            search_paths: vec![root],
            build_info: String::from("build info"),
            ..RunOptions::default()
        }
    }

    fn fleet_host(address: &str) -> RemoteHost<FakeExecutor> {
        let executor = FakeExecutor::new()
            .respond("echo $HOME", 0, "/home/deploy\n")
            .respond("echo $GOPATH", 0, "/home/deploy/go\n");
        let parsed = HostAddress::parse("prod", address).expect("valid address");
        RemoteHost::with_executor("prod", parsed, "web", executor)
    }

    #[test]
    fn deploy_sequences_layout_scripts_and_execution() {
        let staging = TempDir::new().expect("tempdir");
        let app = app_config();
        let options = staged_options(&staging);
        let uploader = Uploader::with_runner(&app, &options, RecordingRunner::new());
        let orchestrator = DeployOrchestrator::with_uploader(&app, &options, uploader);
        let mut hosts = vec![fleet_host("deploy@example.com")];

        orchestrator.execute(&mut hosts).expect("deploy succeeds");

        let host = hosts.first().expect("one host");
        let commands = host.executor().commands();
        // Probes, mkdir, marker write, three script writes, the deploy
        // script itself, and the release listing for the trim pass.
        let mkdir_at = commands
            .iter()
            .position(|command| command.starts_with("mkdir -p /home/deploy/harp/web/files"))
            .expect("layout step");
        let restart_at = commands
            .iter()
            .position(|command| command.contains("> /home/deploy/harp/web/restart.sh"))
            .expect("restart persist step");
        let deploy_at = commands
            .iter()
            .position(|command| command.starts_with("set -e\n"))
            .expect("deploy execution step");
        let trim_at = commands
            .iter()
            .position(|command| command.starts_with("if [[ -d /home/deploy/harp/web/releases ]]"))
            .expect("trim listing step");
        assert!(mkdir_at < restart_at && restart_at < deploy_at && deploy_at < trim_at);
    }

    #[test]
    fn all_hosts_share_one_release_stamp() {
        let staging = TempDir::new().expect("tempdir");
        let app = app_config();
        let options = staged_options(&staging);
        let uploader = Uploader::with_runner(&app, &options, RecordingRunner::new());
        let orchestrator = DeployOrchestrator::with_uploader(&app, &options, uploader);
        let mut hosts = vec![
            fleet_host("deploy@alpha.example.com"),
            fleet_host("deploy@beta.example.com"),
        ];

        let stamp = orchestrator.execute(&mut hosts).expect("deploy succeeds");

        for host in &hosts {
            let deploy_command = host
                .executor()
                .commands()
                .into_iter()
                .find(|command| command.starts_with("set -e\n"))
                .expect("deploy script executed");
            assert!(
                deploy_command.contains(&format!("releases/{stamp}")),
                "missing shared stamp in: {deploy_command}"
            );
        }
    }

    #[test]
    fn first_failing_host_aborts_the_run() {
        let staging = TempDir::new().expect("tempdir");
        let app = app_config();
        let options = staged_options(&staging);
        let uploader = Uploader::with_runner(&app, &options, RecordingRunner::new());
        let orchestrator = DeployOrchestrator::with_uploader(&app, &options, uploader);

        let failing = {
            let executor = FakeExecutor::new().respond("mkdir -p", 1, "");
            let parsed = HostAddress::parse("prod", "deploy@alpha.example.com").expect("valid");
            RemoteHost::with_executor("prod", parsed, "web", executor)
        };
        let mut hosts = vec![failing, fleet_host("deploy@beta.example.com")];

        let err = orchestrator
            .execute(&mut hosts)
            .expect_err("first host fails");
        assert!(matches!(err, DeployError::Exec(_)), "unexpected error: {err}");

        // The second host was never scheduled.
        let untouched = hosts.get(1).expect("second host");
        assert!(untouched.executor().commands().is_empty());
    }

    #[test]
    fn no_rollback_skips_trimming() {
        let staging = TempDir::new().expect("tempdir");
        let app = app_config();
        let options = RunOptions {
            no_rollback: true,
            ..staged_options(&staging)
        };
        let uploader = Uploader::with_runner(&app, &options, RecordingRunner::new());
        let orchestrator = DeployOrchestrator::with_uploader(&app, &options, uploader);
        let mut hosts = vec![fleet_host("deploy@example.com")];

        orchestrator.execute(&mut hosts).expect("deploy succeeds");

        let host = hosts.first().expect("one host");
        assert!(
            !host
                .executor()
                .commands()
                .iter()
                .any(|command| command.starts_with("if [[ -d /home/deploy/harp/web/releases ]]")),
            "trim should be skipped"
        );
    }
}
