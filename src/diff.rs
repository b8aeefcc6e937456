//! Read-only reconciliation between local managed files and the remote
//! inventory.
//!
//! The diff never mutates either side: it lists regular files under the
//! remote managed-files root, compares them against the locally declared
//! set, and reports the symmetric difference for diagnostics.

use std::fs;

use camino::Utf8PathBuf;

use crate::config::{AppConfig, RunOptions};
use crate::exec::{ExecError, RemoteExecutor};
use crate::host::RemoteHost;

/// Direction of one reconciliation finding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffDirection {
    /// Present locally, absent remotely.
    Added,
    /// Present remotely, absent from the local managed set.
    Removed,
}

/// One symmetric-difference finding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiffEntry {
    /// Path relative to the managed-files root (flattened form).
    pub path: String,
    /// Whether the entry is local-only or remote-only.
    pub direction: DiffDirection,
    /// Size in bytes of the local source, when known.
    pub size: Option<u64>,
    /// Local source path, for `Added` entries.
    pub source: Option<Utf8PathBuf>,
}

/// Compares the declared managed-file set against a host's live inventory.
#[derive(Clone, Debug)]
pub struct FileReconciler<'a> {
    app: &'a AppConfig,
    options: &'a RunOptions,
}

struct LocalEntry {
    flattened: String,
    source: Option<Utf8PathBuf>,
    size: Option<u64>,
}

impl<'a> FileReconciler<'a> {
    /// Creates a reconciler over the shared application config and options.
    #[must_use]
    pub const fn new(app: &'a AppConfig, options: &'a RunOptions) -> Self {
        Self { app, options }
    }

    fn local_inventory(&self) -> Vec<LocalEntry> {
        self.app
            .files
            .iter()
            .map(|file| {
                let located = self.options.search_paths.iter().find_map(|root| {
                    let candidate = root.join("src").join(&file.path);
                    fs::metadata(&candidate)
                        .ok()
                        .map(|metadata| (candidate, metadata))
                });
                match located {
                    Some((source, metadata)) => LocalEntry {
                        flattened: file.flattened(),
                        size: metadata.is_file().then(|| metadata.len()),
                        source: Some(source),
                    },
                    None => LocalEntry {
                        flattened: file.flattened(),
                        source: None,
                        size: None,
                    },
                }
            })
            .collect()
    }

    /// Computes the symmetric difference between the local managed set and
    /// the remote inventory.
    ///
    /// A missing remote application directory yields an empty inventory, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the remote listing command fails.
    pub fn entries<E: RemoteExecutor>(
        &self,
        host: &RemoteHost<E>,
    ) -> Result<Vec<DiffEntry>, ExecError> {
        let files_root = host.files_root();
        let command = format!(
            "if [[ -d \"{}/\" ]]; then\n\tfind {files_root} -type f\nfi",
            host.app_root()
        );
        let output = host.execute(&command)?;

        let prefix = format!("{files_root}/");
        let remote: Vec<String> = output
            .stdout
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| line.strip_prefix(&prefix).unwrap_or(line).to_owned())
            .collect();

        let local = self.local_inventory();
        let mut findings = Vec::new();
        for entry in &local {
            if !remote.iter().any(|name| name == &entry.flattened) {
                findings.push(DiffEntry {
                    path: entry.flattened.clone(),
                    direction: DiffDirection::Added,
                    size: entry.size,
                    source: entry.source.clone(),
                });
            }
        }
        for name in remote {
            if !local.iter().any(|entry| entry.flattened == name) {
                findings.push(DiffEntry {
                    path: name,
                    direction: DiffDirection::Removed,
                    size: None,
                    source: None,
                });
            }
        }
        Ok(findings)
    }

    /// Renders the reconciliation report for one host.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the remote listing command fails.
    pub fn diff<E: RemoteExecutor>(&self, host: &RemoteHost<E>) -> Result<String, ExecError> {
        let mut report = String::new();
        for entry in self.entries(host)? {
            match entry.direction {
                DiffDirection::Added => {
                    let size = entry
                        .size
                        .map_or_else(|| String::from("?"), |bytes| bytes.to_string());
                    let source = entry
                        .source
                        .map_or_else(|| entry.path.clone(), |path| path.to_string());
                    report.push_str(&format!("+ {size} {source}\n"));
                }
                DiffDirection::Removed => {
                    report.push_str(&format!("- {}\n", entry.path));
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs as stdfs;

    use tempfile::TempDir;

    use super::*;
    use crate::config::ManagedFile;
    use crate::host::HostAddress;
    use crate::test_support::FakeExecutor;

    fn app_with_files(paths: &[&str]) -> AppConfig {
        AppConfig {
            name: String::from("web"),
            import_path: String::from("example.com/web"),
            files: paths
                .iter()
                .map(|path| ManagedFile {
                    path: (*path).to_owned(),
                    delete: false,
                })
                .collect(),
            args: Vec::new(),
            envs: BTreeMap::new(),
            kill_sig: String::from("KILL"),
            deploy_script: None,
            restart_script: None,
        }
    }

    fn options_with_root(root: &TempDir) -> RunOptions {
        let path = Utf8PathBuf::from_path_buf(root.path().to_path_buf()).expect("utf8 tempdir");
        RunOptions {
            search_paths: vec![path],
            ..RunOptions::default()
        }
    }

    fn host_listing(listing: &str) -> RemoteHost<FakeExecutor> {
        let executor = FakeExecutor::new().respond("if [[ -d", 0, listing);
        let address = HostAddress::parse("prod", "deploy@example.com").expect("valid address");
        let mut host = RemoteHost::with_executor("prod", address, "web", executor);
        host.home = String::from("/home/deploy");
        host
    }

    fn seed_local(root: &TempDir, relative: &str, content: &str) {
        let path = root.path().join("src").join(relative);
        stdfs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        stdfs::write(path, content).expect("write file");
    }

    #[test]
    fn equal_sets_report_nothing() {
        let root = TempDir::new().expect("tempdir");
        seed_local(&root, "config/app.yaml", "key: value\n");
        let app = app_with_files(&["config/app.yaml"]);
        let options = options_with_root(&root);
        let host = host_listing("/home/deploy/harp/web/files/config_app.yaml\n");

        let reconciler = FileReconciler::new(&app, &options);
        assert_eq!(reconciler.diff(&host).expect("diff"), "");
    }

    #[test]
    fn local_only_entries_are_added_with_size() {
        let root = TempDir::new().expect("tempdir");
        seed_local(&root, "config/app.yaml", "key: value\n");
        let app = app_with_files(&["config/app.yaml"]);
        let options = options_with_root(&root);
        let host = host_listing("");

        let reconciler = FileReconciler::new(&app, &options);
        let entries = reconciler.entries(&host).expect("entries");
        assert_eq!(entries.len(), 1);
        let entry = entries.first().expect("one entry");
        assert_eq!(entry.direction, DiffDirection::Added);
        assert_eq!(entry.path, "config_app.yaml");
        assert_eq!(entry.size, Some(11));

        let report = reconciler.diff(&host).expect("diff");
        assert!(report.starts_with("+ 11 "), "report: {report}");
    }

    #[test]
    fn remote_only_entries_are_removed() {
        let root = TempDir::new().expect("tempdir");
        let app = app_with_files(&[]);
        let options = options_with_root(&root);
        let host = host_listing("/home/deploy/harp/web/files/stale.conf\n");

        let reconciler = FileReconciler::new(&app, &options);
        assert_eq!(reconciler.diff(&host).expect("diff"), "- stale.conf\n");
    }

    #[test]
    fn symmetric_difference_reports_both_sides() {
        let root = TempDir::new().expect("tempdir");
        seed_local(&root, "config/app.yaml", "key: value\n");
        let app = app_with_files(&["config/app.yaml"]);
        let options = options_with_root(&root);
        let host = host_listing("/home/deploy/harp/web/files/stale.conf\n");

        let reconciler = FileReconciler::new(&app, &options);
        let entries = reconciler.entries(&host).expect("entries");
        let added = entries
            .iter()
            .filter(|entry| entry.direction == DiffDirection::Added)
            .count();
        let removed = entries
            .iter()
            .filter(|entry| entry.direction == DiffDirection::Removed)
            .count();
        assert_eq!((added, removed), (1, 1));
    }

    #[test]
    fn missing_remote_directory_is_not_an_error() {
        let root = TempDir::new().expect("tempdir");
        let app = app_with_files(&[]);
        let options = options_with_root(&root);
        // The guard makes the remote command succeed with empty output.
        let host = host_listing("");

        let reconciler = FileReconciler::new(&app, &options);
        assert_eq!(reconciler.diff(&host).expect("diff"), "");
    }
}
