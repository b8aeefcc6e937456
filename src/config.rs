//! Configuration loading via `ortho-config`.
//!
//! The application definition and the host inventory are consumed
//! read-only for the duration of a run. Values merge defaults, configuration
//! files (`harp.toml`), environment variables, and CLI flags in that order
//! of precedence.

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of release snapshots retained after trimming.
pub const DEFAULT_KEEP_RELEASES: usize = 5;

/// Default local staging directory populated by the build step.
pub const DEFAULT_STAGING_DIR: &str = "tmp/harp";

fn default_kill_sig() -> String {
    String::from("KILL")
}

/// One managed file synced to every host alongside the artifact.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct ManagedFile {
    /// Path relative to a search-path `src/` root.
    pub path: String,
    /// When set, extraneous remote files under this entry are deleted.
    #[serde(default)]
    pub delete: bool,
}

impl ManagedFile {
    /// Remote name of this entry under the managed-files directory, with
    /// path separators flattened to underscores.
    #[must_use]
    pub fn flattened(&self) -> String {
        self.path.replace('/', "_")
    }
}

/// The application being deployed: artifact identity, managed files, and
/// process launch settings.
#[derive(Clone, Debug, Deserialize, Serialize, Eq, PartialEq)]
pub struct AppConfig {
    /// Application (and artifact) name.
    pub name: String,
    /// Module path of the application source, mirrored on the remote side
    /// under `<runtime root>/src/`.
    pub import_path: String,
    /// Managed files synced to each host, in declaration order.
    #[serde(default)]
    pub files: Vec<ManagedFile>,
    /// Arguments passed to the artifact on restart.
    #[serde(default)]
    pub args: Vec<String>,
    /// Application-level environment exported before launch.
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    /// Signal name delivered to a stale process before relaunch.
    #[serde(default = "default_kill_sig")]
    pub kill_sig: String,
    /// Optional path to a custom deploy script template.
    #[serde(default)]
    pub deploy_script: Option<Utf8PathBuf>,
    /// Optional path to a custom restart script template.
    #[serde(default)]
    pub restart_script: Option<Utf8PathBuf>,
}

/// Top-level configuration merged from `harp.toml`, `HARP_*` environment
/// variables, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "HARP")]
pub struct HarpConfig {
    /// The application to deploy. Nested sections come from the
    /// configuration file and environment, never from CLI flags.
    #[ortho_config(skip_cli)]
    pub app: AppConfig,
    /// Host groups: group name to list of `user@host[:port]` addresses.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub servers: BTreeMap<String, Vec<String>>,
    /// Disables release snapshots and trimming entirely.
    #[serde(default)]
    pub no_rollback: bool,
    /// Number of release snapshots kept per host after trimming.
    #[serde(default)]
    pub keep_releases: Option<usize>,
}

/// Metadata for a configuration field, used to generate actionable error
/// messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl HarpConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in harp.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("harp")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::NoServers`] when the host inventory is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.app.name,
            &FieldMetadata::new("application name", "HARP_APP_NAME", "name", "app"),
        )?;
        Self::require_field(
            &self.app.import_path,
            &FieldMetadata::new(
                "application import path",
                "HARP_APP_IMPORT_PATH",
                "import_path",
                "app",
            ),
        )?;
        Self::require_field(
            &self.app.kill_sig,
            &FieldMetadata::new("termination signal", "HARP_APP_KILL_SIG", "kill_sig", "app"),
        )?;
        if self.servers.values().all(Vec::is_empty) {
            return Err(ConfigError::NoServers);
        }
        Ok(())
    }

    /// Effective release retention count.
    #[must_use]
    pub fn keep_releases(&self) -> usize {
        self.keep_releases.unwrap_or(DEFAULT_KEEP_RELEASES)
    }
}

/// Per-run options assembled from CLI flags and the environment, shared
/// read-only across all hosts in a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunOptions {
    /// Disables release snapshots and trimming.
    pub no_rollback: bool,
    /// Release snapshots kept per host after a deploy.
    pub keep_releases: usize,
    /// Excludes the artifact from the upload.
    pub no_build: bool,
    /// Excludes the managed-files tree from the upload.
    pub no_files: bool,
    /// Enables transfer progress output and composed-script echo.
    pub debug: bool,
    /// Local roots probed (in order) for managed files, each containing a
    /// `src/` tree.
    pub search_paths: Vec<Utf8PathBuf>,
    /// Local staging directory holding the built artifact and flattened
    /// managed files.
    pub staging_dir: Utf8PathBuf,
    /// Free-form provenance text written verbatim into the build marker.
    pub build_info: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            no_rollback: false,
            keep_releases: DEFAULT_KEEP_RELEASES,
            no_build: false,
            no_files: false,
            debug: false,
            search_paths: Vec::new(),
            staging_dir: Utf8PathBuf::from(DEFAULT_STAGING_DIR),
            build_info: String::new(),
        }
    }
}

impl RunOptions {
    /// Local staging path of the built artifact.
    #[must_use]
    pub fn artifact_path(&self, app_name: &str) -> Utf8PathBuf {
        self.staging_dir.join(app_name)
    }

    /// Local staging path of the flattened managed-files tree.
    #[must_use]
    pub fn files_dir(&self) -> Utf8PathBuf {
        self.staging_dir.join("files")
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates the host inventory contains no addresses.
    #[error("no servers configured: add a [servers] group to harp.toml")]
    NoServers,
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> HarpConfig {
        HarpConfig {
            app: AppConfig {
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
            },
            servers: BTreeMap::from([(
                String::from("prod"),
                vec![String::from("deploy@example.com")],
            )]),
            no_rollback: false,
            keep_releases: None,
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_app_name() {
        let mut cfg = base_config();
        cfg.app.name = String::from("  ");
        let err = cfg.validate().expect_err("blank name should fail");
        assert!(
            matches!(err, ConfigError::MissingField(ref message) if message.contains("HARP_APP_NAME")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn validate_rejects_empty_inventory() {
        let mut cfg = base_config();
        cfg.servers = BTreeMap::from([(String::from("prod"), Vec::new())]);
        assert_eq!(
            cfg.validate().expect_err("empty inventory should fail"),
            ConfigError::NoServers
        );
    }

    #[test]
    fn keep_releases_defaults_when_unset() {
        assert_eq!(base_config().keep_releases(), DEFAULT_KEEP_RELEASES);
    }

    #[test]
    fn load_from_iter_reads_nested_sections_from_a_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("harp.toml");
        std::fs::write(
            &path,
            "[app]\n\
             name = \"web\"\n\
             import_path = \"example.com/web\"\n\
             \n\
             [[app.files]]\n\
             path = \"config/app.yaml\"\n\
             delete = true\n\
             \n\
             [servers]\n\
             prod = [\"deploy@example.com\"]\n",
        )
        .expect("write config file");

        let config = HarpConfig::load_from_iter([
            std::ffi::OsString::from("harp"),
            std::ffi::OsString::from("--config-path"),
            path.into_os_string(),
        ])
        .expect("nested sections load without CLI inference");

        assert_eq!(config.app.name, "web");
        assert_eq!(config.app.kill_sig, "KILL");
        assert!(config.app.files.first().is_some_and(|file| file.delete));
        assert_eq!(config.servers.get("prod").map(Vec::len), Some(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn managed_file_flattens_separators() {
        let file = ManagedFile {
            path: String::from("config/app.yaml"),
            delete: false,
        };
        assert_eq!(file.flattened(), "config_app.yaml");
    }
}
