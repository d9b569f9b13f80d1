//! Tracing subscriber setup
//!
//! Filter priority: `DIFF_COLLECTOR_LOG`, then `RUST_LOG`, then the level
//! derived from `-v` / `-q`.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV_VAR: &str = "DIFF_COLLECTOR_LOG";

/// Default level for a verbosity count and quiet flag
pub fn level_for(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Directive string to use, honouring the environment overrides
pub fn filter_directive(
    project_env: Option<String>,
    rust_log: Option<String>,
    verbose: u8,
    quiet: bool,
) -> String {
    project_env
        .filter(|v| !v.trim().is_empty())
        .or_else(|| rust_log.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| level_for(verbose, quiet).to_string())
}

/// Install the global subscriber; stderr plus an optional plain-text log file
pub fn init_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let directive = filter_directive(
        std::env::var(LOG_ENV_VAR).ok(),
        std::env::var("RUST_LOG").ok(),
        verbose,
        quiet,
    );
    let filter = EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| EnvFilter::new(level_for(verbose, quiet)));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init();

    tracing::debug!("Logging initialized with filter: {}", directive);
    Ok(())
}
