//! Release snapshots: run-wide stamps and retention trimming.
//!
//! A release stamp is allocated exactly once per run, before any host work
//! begins, and passed by parameter into every host-level operation so the
//! whole fleet shares one rollback point.

use chrono::Local;
use tracing::warn;

use crate::exec::RemoteExecutor;
use crate::host::RemoteHost;

/// Lexicographically sortable identifier shared by every host in one run.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct ReleaseStamp(String);

impl ReleaseStamp {
    /// Allocates a stamp from the current local time.
    #[must_use]
    pub fn now() -> Self {
        Self(Local::now().format("%y-%m-%d-%H:%M:%S").to_string())
    }

    /// Builds a stamp from existing text, used by tests and rollback
    /// bookkeeping.
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self(text.to_owned())
    }

    /// The stamp as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deletes all but the newest `keep` releases on `host`.
///
/// Stamps sort lexicographically, so a plain sort orders releases by age.
/// Failures are logged and swallowed: stale releases accumulating is a
/// degraded-but-safe state, not a deploy failure.
pub fn trim_old_releases<E: RemoteExecutor>(host: &RemoteHost<E>, keep: usize) {
    let releases_dir = host.releases_dir();
    let listing = match host.execute_unchecked(&format!(
        "if [[ -d {releases_dir} ]]; then ls -1 {releases_dir}; fi"
    )) {
        Ok(output) if output.is_success() => output.stdout,
        Ok(output) => {
            warn!(host = %host, output = %output.combined().trim(), "failed to list releases");
            return;
        }
        Err(err) => {
            warn!(host = %host, error = %err, "failed to list releases");
            return;
        }
    };

    let mut stamps: Vec<&str> = listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    stamps.sort_unstable();
    if stamps.len() <= keep {
        return;
    }

    let cutoff = stamps.len() - keep;
    let stale: Vec<String> = stamps
        .iter()
        .take(cutoff)
        .map(|stamp| format!("{releases_dir}/{stamp}"))
        .collect();
    let command = format!("rm -rf {}", stale.join(" "));
    match host.execute_unchecked(&command) {
        Ok(output) if output.is_success() => {}
        Ok(output) => {
            warn!(host = %host, output = %output.combined().trim(), "failed to trim releases");
        }
        Err(err) => {
            warn!(host = %host, error = %err, "failed to trim releases");
        }
    }
}
