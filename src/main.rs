//! Binary entry point for the harp CLI.

use std::borrow::Cow;
use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use harp::{
    AddressError, DeployError, DeployOrchestrator, ExecError, FileReconciler, HarpConfig,
    HostAddress, RemoteHost, RunOptions,
};

#[derive(Debug, Parser)]
#[command(
    name = "harp",
    about = "Deploy prebuilt artifacts and managed files to remote hosts over SSH",
    arg_required_else_help = true
)]
enum Cli {
    #[command(name = "deploy", about = "Upload, install, and restart on target hosts")]
    Deploy(DeployCommand),
    #[command(name = "diff", about = "Compare local managed files against a host inventory")]
    Diff(DiffCommand),
    #[command(name = "rollback", about = "Restore a previous release on target hosts")]
    Rollback(RollbackCommand),
}

#[derive(Debug, Parser)]
struct DeployCommand {
    /// Host groups to target; defaults to every configured group.
    #[arg(short = 's', long = "set")]
    sets: Vec<String>,
    /// Exclude the built artifact from the upload.
    #[arg(long)]
    no_build: bool,
    /// Exclude the managed-files tree from the upload.
    #[arg(long)]
    no_files: bool,
    /// Skip release snapshots and trimming for this run.
    #[arg(long)]
    no_rollback: bool,
    /// Show transfer progress and composed scripts.
    #[arg(long)]
    debug: bool,
    /// Provenance text recorded verbatim in the build marker.
    #[arg(long, default_value = "")]
    build_info: String,
}

#[derive(Debug, Parser)]
struct DiffCommand {
    /// Host groups to inspect; defaults to every configured group.
    #[arg(short = 's', long = "set")]
    sets: Vec<String>,
}

#[derive(Debug, Parser)]
struct RollbackCommand {
    /// Release identifier to restore; omit to list available releases.
    version: Option<String>,
    /// Host groups to target; defaults to every configured group.
    #[arg(short = 's', long = "set")]
    sets: Vec<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("blocking task failed: {0}")]
    Join(String),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    // Remote execution blocks on ssh/rsync, so each command runs on the
    // blocking pool.
    let handle = match cli {
        Cli::Deploy(command) => tokio::task::spawn_blocking(move || run_deploy(&command)),
        Cli::Diff(command) => tokio::task::spawn_blocking(move || run_diff(&command)),
        Cli::Rollback(command) => tokio::task::spawn_blocking(move || run_rollback(&command)),
    };
    handle.await.map_err(|err| CliError::Join(err.to_string()))?
}

fn load_config() -> Result<HarpConfig, CliError> {
    let config =
        HarpConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(config)
}

fn search_paths_from_env() -> Vec<Utf8PathBuf> {
    env::var("GOPATH")
        .unwrap_or_default()
        .split(':')
        .filter(|part| !part.is_empty())
        .map(Utf8PathBuf::from)
        .collect()
}

fn select_hosts(config: &HarpConfig, sets: &[String]) -> Result<Vec<RemoteHost>, CliError> {
    let mut hosts = Vec::new();
    for (group, addresses) in &config.servers {
        if !sets.is_empty() && !sets.contains(group) {
            continue;
        }
        for address in addresses {
            let parsed = HostAddress::parse(group, address)?;
            hosts.push(RemoteHost::connect(group, parsed, &config.app.name));
        }
    }
    if hosts.is_empty() {
        return Err(CliError::Config(format!(
            "no hosts matched the requested sets {sets:?}"
        )));
    }
    Ok(hosts)
}

fn run_deploy(args: &DeployCommand) -> Result<i32, CliError> {
    let config = load_config()?;
    let options = RunOptions {
        no_rollback: config.no_rollback || args.no_rollback,
        keep_releases: config.keep_releases(),
        no_build: args.no_build,
        no_files: args.no_files,
        debug: args.debug,
        search_paths: search_paths_from_env(),
        build_info: args.build_info.clone(),
        ..RunOptions::default()
    };
    let mut hosts = select_hosts(&config, &args.sets)?;

    let orchestrator = DeployOrchestrator::new(&config.app, &options);
    orchestrator.execute(&mut hosts)?;
    Ok(0)
}

fn run_diff(args: &DiffCommand) -> Result<i32, CliError> {
    let config = load_config()?;
    let options = RunOptions {
        search_paths: search_paths_from_env(),
        ..RunOptions::default()
    };
    let mut hosts = select_hosts(&config, &args.sets)?;
    let reconciler = FileReconciler::new(&config.app, &options);

    let mut stdout = io::stdout();
    for host in &mut hosts {
        host.resolve_paths();
        let report = reconciler.diff(host)?;
        writeln!(stdout, "{host}:").ok();
        if report.is_empty() {
            writeln!(stdout, "  in sync").ok();
        } else {
            write!(stdout, "{report}").ok();
        }
    }
    Ok(0)
}

fn run_rollback(args: &RollbackCommand) -> Result<i32, CliError> {
    let config = load_config()?;
    let mut hosts = select_hosts(&config, &args.sets)?;

    let mut stdout = io::stdout();
    for host in &mut hosts {
        host.resolve_paths();
        let script = host.script_path("rollback");
        // The version comes straight from the CLI; quote it for the remote
        // shell.
        let command = args.version.as_ref().map_or_else(
            || format!("bash {script}"),
            |version| {
                let quoted = shell_escape::unix::escape(Cow::from(version.as_str()));
                format!("bash {script} {quoted}")
            },
        );
        let output = host.execute_unchecked(&command)?;
        write!(stdout, "{}", output.combined()).ok();
        if !output.is_success() {
            // Missing version argument exits 1 after listing releases; any
            // other failure propagates the remote status as-is.
            return Ok(output.code.unwrap_or(1));
        }
    }
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
