use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, warn};

use crate::config::{parse_size, CollectorConfig};
use crate::coordinator::RunCoordinator;
use crate::exclusion::ExclusionPolicy;
use crate::history::ScanHistoryStore;
use crate::logging;
use crate::output::{self, OutputMode};
use crate::source::{ContainerRuntime, FixedMounts, HostRuntime, MountTable, SourceRuntime};
use crate::submit::UreqTransport;

#[derive(Parser)]
#[command(name = "diff-collector")]
#[command(version)]
#[command(about = "Submit changed files from containers or the host to a scanning engine")]
#[command(long_about = "diff-collector finds files that changed since a baseline, drops \
    irrelevant and already-scanned content, and uploads the rest to a scanning engine.\n\n\
    Examples:\n  \
    diff-collector containers -s http://scanner:8080       # Scan container diffs\n  \
    diff-collector host /home /srv -s http://scanner:8080  # Walk host paths\n  \
    diff-collector containers --dry-run -v                  # Show what would be sent\n  \
    diff-collector history                                  # List recorded runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// TOML configuration file; CLI flags override its values
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v, -vv for more)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write log output to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit files changed inside running containers
    #[command(visible_alias = "c")]
    Containers {
        #[command(flatten)]
        run: RunArgs,

        /// Docker-compatible CLI to drive (docker, podman, ...)
        #[arg(long, value_name = "CLI")]
        container_cli: Option<String>,
    },

    /// Walk host paths and submit recent files
    Host {
        /// Walk roots (default: /)
        #[arg(value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,

        /// Descend into network and pseudo filesystems too
        #[arg(long)]
        all_filesystems: bool,
    },

    /// Show the recorded scan history
    History {
        /// History file (default: from configuration)
        #[arg(long, value_name = "FILE")]
        history_file: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Flags shared by both collection modes
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Scanning engine base URL, e.g. http://scanner:8080
    #[arg(short = 's', long, value_name = "URL")]
    pub server: Option<String>,

    /// Source name reported to the engine (default: host name)
    #[arg(long, value_name = "NAME")]
    pub source: Option<String>,

    /// Use the synchronous check endpoint and keep full verdicts
    #[arg(long)]
    pub sync: bool,

    /// Run the whole pipeline without sending or recording anything
    #[arg(long)]
    pub dry_run: bool,

    /// Concurrent uploads
    #[arg(short = 't', long, value_name = "N")]
    pub threads: Option<usize>,

    /// Probe/extract/hash workers
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Largest file to submit, e.g. 20MB (0 disables)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Skip files modified more than N days ago (0 disables)
    #[arg(long, value_name = "DAYS")]
    pub max_age: Option<u64>,

    /// Only submit files with this suffix (repeatable)
    #[arg(short = 'e', long = "extension", value_name = "EXT")]
    pub extensions: Vec<String>,

    /// Additional path regex to exclude (repeatable)
    #[arg(long = "exclude", value_name = "REGEX")]
    pub excludes: Vec<String>,

    /// Resubmit content already recorded in the history
    #[arg(long)]
    pub full: bool,

    /// Do not record this run in the history
    #[arg(long)]
    pub no_save_history: bool,

    /// Retries per file after the first attempt
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Upload rate limit (0 = unlimited)
    #[arg(long, value_name = "N")]
    pub uploads_per_minute: Option<u32>,

    /// Do not send begin/end collection markers
    #[arg(long)]
    pub no_markers: bool,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Extra CA certificate (PEM, repeatable)
    #[arg(long = "ca", value_name = "FILE")]
    pub ca_files: Vec<PathBuf>,

    /// HTTP proxy URL (default: from the environment)
    #[arg(long, value_name = "URL")]
    pub proxy: Option<String>,

    /// Keep staged copies after the run
    #[arg(long)]
    pub keep_staged: bool,

    #[arg(long, value_name = "FILE")]
    pub history_file: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    pub lock_file: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut CollectorConfig) {
        if let Some(server) = &self.server {
            config.server = server.clone();
        }
        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        config.sync |= self.sync;
        config.dry_run |= self.dry_run;
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_size) = self.max_size {
            config.max_size_bytes = max_size;
        }
        if let Some(max_age) = self.max_age {
            config.max_age_days = max_age;
        }
        if !self.extensions.is_empty() {
            config.extensions = self.extensions.clone();
        }
        config.exclude_patterns.extend(self.excludes.iter().cloned());
        if self.full {
            config.incremental = false;
        }
        if self.no_save_history {
            config.save_history = false;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(rate) = self.uploads_per_minute {
            config.uploads_per_minute = rate;
        }
        if self.no_markers {
            config.collection_markers = false;
        }
        config.insecure |= self.insecure;
        config.ca_files.extend(self.ca_files.iter().cloned());
        if let Some(proxy) = &self.proxy {
            config.proxy = Some(proxy.clone());
        }
        config.keep_staged |= self.keep_staged;
        if let Some(path) = &self.history_file {
            config.history_file = path.clone();
        }
        if let Some(path) = &self.results_dir {
            config.results_dir = path.clone();
        }
        if let Some(path) = &self.lock_file {
            config.lock_file = path.clone();
        }
        if let Some(path) = &self.staging_dir {
            config.staging_dir = path.clone();
        }
    }
}

enum Mode {
    Containers,
    Host,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn run(self) -> anyhow::Result<ExitCode> {
        logging::init_logging(self.verbose, self.quiet, self.log_file.as_deref())?;

        let output_mode = if self.quiet {
            OutputMode::Quiet
        } else if self.verbose >= 2 {
            OutputMode::VeryVerbose
        } else if self.verbose == 1 {
            OutputMode::Verbose
        } else {
            OutputMode::Normal
        };

        let mut config = CollectorConfig::load_or_default(self.config.as_deref())?;

        match self.command {
            Commands::Containers { run, container_cli } => {
                run.apply(&mut config);
                if let Some(cli) = container_cli {
                    config.container_cli = cli;
                }
                collect(config, Mode::Containers, &run, output_mode)
            }
            Commands::Host {
                paths,
                run,
                all_filesystems,
            } => {
                run.apply(&mut config);
                if !paths.is_empty() {
                    config.roots = paths;
                }
                config.all_filesystems |= all_filesystems;
                collect(config, Mode::Host, &run, output_mode)
            }
            Commands::History { history_file } => {
                let path = history_file.unwrap_or(config.history_file);
                show_history(&ScanHistoryStore::new(path), output_mode)?;
                Ok(ExitCode::SUCCESS)
            }
            Commands::Config => {
                print!("{}", config.to_toml()?);
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn collect(
    config: CollectorConfig,
    mode: Mode,
    args: &RunArgs,
    output_mode: OutputMode,
) -> anyhow::Result<ExitCode> {
    config.validate()?;

    let source_name = config
        .source
        .clone()
        .or_else(HostRuntime::local_host_name)
        .unwrap_or_else(|| "unknown-host".to_string());

    let (policy, runtime) = match mode {
        Mode::Containers => {
            // Host mounts say nothing about paths inside containers
            let policy = Arc::new(ExclusionPolicy::from_config(&config, &FixedMounts::default())?);
            let runtime: Arc<dyn SourceRuntime> =
                Arc::new(ContainerRuntime::new(config.container_cli.clone()));
            (policy, runtime)
        }
        Mode::Host => {
            let policy = Arc::new(ExclusionPolicy::from_config(&config, &MountTable::default())?);
            let runtime: Arc<dyn SourceRuntime> = Arc::new(HostRuntime::new(
                config.roots.clone(),
                source_name.clone(),
                policy.clone(),
            ));
            (policy, runtime)
        }
    };

    let transport =
        Arc::new(UreqTransport::from_config(&config).context("Failed to set up HTTP client")?);
    let show_progress =
        output_mode != OutputMode::Quiet && !args.json && std::io::stderr().is_terminal();

    let mut coordinator = RunCoordinator::new(config, runtime, transport, policy)
        .with_source_name(source_name)
        .with_progress(show_progress);

    let report = match coordinator.run() {
        Ok(report) => report,
        Err(e) if e.is_fatal() => {
            error!("Run aborted: {}", e);
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            warn!("Run ended early: {}", e);
            return Ok(ExitCode::SUCCESS);
        }
    };

    if args.json {
        output::print_json(&report)?;
    } else {
        output::print_human(&report, output_mode);
    }
    Ok(ExitCode::SUCCESS)
}

fn show_history(store: &ScanHistoryStore, mode: OutputMode) -> anyhow::Result<()> {
    let history = store.load()?;
    if mode == OutputMode::Quiet {
        return Ok(());
    }

    println!();
    println!("{} {}", "Scan history".bold(), store.path().display().to_string().dimmed());
    println!("{}", "=".repeat(48).dimmed());
    if history.run_count() == 0 {
        println!("No runs recorded yet.");
        println!();
        return Ok(());
    }

    println!("{:<24} {:>12}", "Run", "Files");
    for (stamp, fingerprints) in history.runs() {
        println!("{:<24} {:>12}", stamp, fingerprints.len());
        if mode == OutputMode::VeryVerbose {
            for fp in fingerprints {
                println!("  {}", fp.as_str().dimmed());
            }
        }
    }
    println!("{}", "-".repeat(48).dimmed());
    println!(
        "{:<24} {:>12}",
        "Distinct fingerprints",
        history.known_fingerprints().len().to_string().cyan()
    );
    println!();
    Ok(())
}
