//! Synthesis of the operational scripts persisted on each host.
//!
//! Four scripts are composed per host: deploy, restart, kill, and rollback.
//! Each is a deterministic function of the host, the application config, and
//! the run-wide release stamp. Custom deploy/restart templates are rendered
//! over a typed [`ScriptData`] with explicit placeholder substitution, and
//! the `$`-escaping applied before heredoc writes is exposed as a named,
//! tested transformation.

use std::fs;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::{AppConfig, RunOptions};
use crate::exec::RemoteExecutor;
use crate::host::RemoteHost;
use crate::release::ReleaseStamp;


/// Placeholder for the file-sync step in script templates.
pub const SYNC_FILES_SLOT: &str = "{{sync_files}}";
/// Placeholder for the save-release step in script templates.
pub const SAVE_RELEASE_SLOT: &str = "{{save_release}}";
/// Placeholder for the restart step in script templates.
pub const RESTART_SERVER_SLOT: &str = "{{restart_server}}";

const DEFAULT_DEPLOY_TEMPLATE: &str = "set -e\n{{sync_files}}\n{{save_release}}\n{{restart_server}}\n";
const DEFAULT_RESTART_TEMPLATE: &str = "set -e\n{{restart_server}}\n";

/// Errors raised while composing scripts.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptError {
    /// Raised when a managed file exists under none of the search paths.
    #[error("failed to find {path} under search paths {searched:?}")]
    FileNotFound {
        /// Managed-file path that could not be located.
        path: String,
        /// Search paths that were probed, in order.
        searched: Vec<Utf8PathBuf>,
    },
    /// Raised when a custom script template cannot be read.
    #[error("failed to read script template {path}: {message}")]
    Template {
        /// Template file path from the configuration.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Rendered bodies substituted into script templates.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScriptData {
    /// Body of the managed-file sync step.
    pub sync_files: String,
    /// Body of the save-release step; empty when rollback is disabled or
    /// not applicable.
    pub save_release: String,
    /// Body of the process restart step.
    pub restart_server: String,
}

/// Renders `template` by substituting the three step placeholders.
#[must_use]
pub fn render(template: &str, data: &ScriptData) -> String {
    template
        .replace(SYNC_FILES_SLOT, &data.sync_files)
        .replace(SAVE_RELEASE_SLOT, &data.save_release)
        .replace(RESTART_SERVER_SLOT, &data.restart_server)
}

/// Escapes every `$` so a script embedded in a remote heredoc write is
/// stored verbatim: interpolation must happen when the script is executed,
/// never while it is being saved.
#[must_use]
pub fn escape_interpolation(script: &str) -> String {
    script.replace('$', "\\$")
}

/// Composes the operational scripts for one application.
#[derive(Clone, Debug)]
pub struct ScriptComposer<'a> {
    app: &'a AppConfig,
    options: &'a RunOptions,
}

impl<'a> ScriptComposer<'a> {
    /// Creates a composer over the shared application config and run options.
    #[must_use]
    pub const fn new(app: &'a AppConfig, options: &'a RunOptions) -> Self {
        Self { app, options }
    }

    /// Locates a managed file under the configured search paths and reports
    /// whether it is a directory. First path containing the entry wins.
    fn locate(&self, path: &str) -> Result<bool, ScriptError> {
        for root in &self.options.search_paths {
            let candidate = root.join("src").join(path);
            if let Ok(metadata) = fs::metadata(&candidate) {
                return Ok(metadata.is_dir());
            }
        }
        Err(ScriptError::FileNotFound {
            path: path.to_owned(),
            searched: self.options.search_paths.clone(),
        })
    }

    /// Composes the managed-file sync step: per-file mirror commands, the
    /// build marker copy, and the artifact install.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::FileNotFound`] when a managed file exists
    /// under none of the search paths.
    pub fn sync_script<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
    ) -> Result<String, ScriptError> {
        let root = &host.runtime_root;
        let app = self.app;
        let mut script = format!(
            "mkdir -p {root}/bin {root}/src {root}/src/{}\n",
            app.import_path
        );

        for file in &app.files {
            let is_dir = self.locate(&file.path)?;
            let mut src = format!("{}/{}", host.files_root(), file.flattened());
            let mut dst = format!("{root}/src/{}", file.path);
            if is_dir {
                src.push('/');
                dst.push('/');
            }

            let parent = dst.rsplit_once('/').map_or("", |(head, _)| head);
            script.push_str(&format!("mkdir -p \"{parent}\"\n"));
            let delete_flag = if file.delete { "--delete " } else { "" };
            script.push_str(&format!("rsync -az {delete_flag}\"{src}\" \"{dst}\"\n"));
        }

        script.push_str(&format!(
            "cp {} {root}/src/{}/\n",
            host.build_info_path(),
            app.import_path
        ));
        script.push_str(&format!(
            "rsync -az {}/{} {root}/bin/{}\n",
            host.app_root(),
            app.name,
            app.name
        ));

        Ok(script.trim_end_matches('\n').to_owned())
    }

    /// Composes the guarded kill step: signal the recorded process only when
    /// the PID file exists and the process is still running.
    #[must_use]
    pub fn kill_script<E: RemoteExecutor>(&self, host: &RemoteHost<E>) -> String {
        let pid = host.pid_path();
        format!(
            "if [[ -f {pid} ]]; then\n\
             \ttarget=$(cat {pid});\n\
             \tif ps -p $target > /dev/null; then\n\
             \t\tkill -{} $target; > /dev/null 2>&1;\n\
             \tfi\n\
             fi\n",
            self.app.kill_sig
        )
    }

    /// Composes the restart step. Safe to re-run: the kill is a no-op when
    /// no stale process is recorded, and exactly one PID is captured.
    #[must_use]
    pub fn restart_script<E: RemoteExecutor>(&self, host: &RemoteHost<E>) -> String {
        let app = self.app;
        let root = &host.runtime_root;
        let log = host.log_path();
        let mut script = self.kill_script(host);
        script.push_str(&format!("mkdir -p {}\n", host.log_dir()));
        script.push_str(&format!("touch {log}\n"));
        script.push_str(&format!("cd {root}/src/{}\n", app.import_path));

        // Runtime root first, then app envs, then host overrides: in shell
        // the later assignment wins on key collision.
        let mut envs = format!("GOPATH=\"{root}\"");
        for (key, value) in &app.envs {
            envs.push_str(&format!(" {key}=\"{value}\""));
        }
        for (key, value) in &host.envs {
            envs.push_str(&format!(" {key}=\"{value}\""));
        }

        let args = app.args.join(" ");
        script.push_str(&format!(
            "{envs} nohup {root}/bin/{} {args} >> {log} 2>&1 &\n",
            app.name
        ));
        script.push_str(&format!("echo $! > {}\n", host.pid_path()));
        script.push_str(&format!("cd {}", host.home));
        script
    }

    /// Composes the save-release step.
    ///
    /// Empty when rollback support is disabled. Otherwise guarded on a prior
    /// build marker, so a fresh install takes no snapshot; when one exists,
    /// the artifact, marker, files tree, and the three persisted scripts are
    /// archived under `releases/<stamp>/` before the restart overwrites
    /// live state.
    #[must_use]
    pub fn save_release_script<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
        stamp: &ReleaseStamp,
    ) -> String {
        if self.options.no_rollback {
            return String::new();
        }
        format!(
            "cd {}\n\
             if [[ -f harp-build.info ]]; then\n\
             \tmkdir -p releases/{stamp}\n\
             \tcp -rf {} harp-build.info files kill.sh restart.sh rollback.sh releases/{stamp}\n\
             fi",
            host.app_root(),
            self.app.name
        )
    }

    fn script_data<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
        stamp: &ReleaseStamp,
    ) -> Result<ScriptData, ScriptError> {
        Ok(ScriptData {
            sync_files: self.sync_script(host)?,
            save_release: self.save_release_script(host, stamp),
            restart_server: self.restart_script(host),
        })
    }

    fn load_template(path: &Utf8PathBuf) -> Result<String, ScriptError> {
        let text = fs::read_to_string(path).map_err(|err| ScriptError::Template {
            path: path.clone(),
            message: err.to_string(),
        })?;
        // Custom scripts always abort on the first failing step.
        if text.starts_with("set -e") {
            Ok(text)
        } else {
            Ok(format!("set -e\n{text}"))
        }
    }

    /// Composes the deploy script: sync, save-release, restart, in that
    /// order, or a custom template rendered over the same data.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] when a managed file cannot be located or a
    /// custom template cannot be read.
    pub fn deploy_script<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
        stamp: &ReleaseStamp,
    ) -> Result<String, ScriptError> {
        let template = match &self.app.deploy_script {
            Some(path) => Self::load_template(path)?,
            None => DEFAULT_DEPLOY_TEMPLATE.to_owned(),
        };
        Ok(render(&template, &self.script_data(host, stamp)?))
    }

    /// Composes the persisted restart script (default or custom template).
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] when a managed file cannot be located or a
    /// custom template cannot be read.
    pub fn restart_wrapper<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
        stamp: &ReleaseStamp,
    ) -> Result<String, ScriptError> {
        let template = match &self.app.restart_script {
            Some(path) => Self::load_template(path)?,
            None => DEFAULT_RESTART_TEMPLATE.to_owned(),
        };
        Ok(render(&template, &self.script_data(host, stamp)?))
    }

    /// Composes the rollback script, parameterized by a version argument.
    ///
    /// With no argument the script lists available release identifiers and
    /// exits with status 1; with one, every archived file replaces its live
    /// counterpart before the sync and restart steps re-run.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::FileNotFound`] when a managed file cannot be
    /// located.
    pub fn rollback_script<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
    ) -> Result<String, ScriptError> {
        let app_root = host.app_root();
        let releases = host.releases_dir();
        let sync_files = self.sync_script(host)?;
        let restart_server = self.restart_script(host);
        Ok(format!(
            "set -e\n\
             version=$1\n\
             if [[ $version == \"\" ]]; then\n\
             \techo \"please specify version in the following list to rollback:\"\n\
             \tls -1 {releases}\n\
             \texit 1\n\
             fi\n\
             \n\
             for file in $(ls {releases}/$version); do\n\
             \trm -rf {app_root}/$file\n\
             \tcp -rf {releases}/$version/$file {app_root}/$file\n\
             done\n\
             \n\
             {sync_files}\n\
             \n\
             {restart_server}"
        ))
    }

    /// Builds the remote command that persists `script` as an executable
    /// file, escaping `$` so the heredoc stores the body verbatim.
    #[must_use]
    pub fn save_script_command<E: RemoteExecutor>(
        host: &RemoteHost<E>,
        name: &str,
        script: &str,
    ) -> String {
        let path = host.script_path(name);
        format!(
            "cat <<EOF > {path}\n{}\nEOF\nchmod +x {path}\n",
            escape_interpolation(script)
        )
    }
}
