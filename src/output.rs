use crate::error::CollectorError;
use crate::fingerprint::Fingerprint;
use crate::stats::StatsSnapshot;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,       // Only errors
    Normal,      // Standard output
    Verbose,     // More details
    VeryVerbose, // Every result and failure
}

/// Outcome of one collection run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stamp: String,
    pub scan_id: Option<String>,
    /// Engine payloads of accepted submissions, by identifier
    pub results: BTreeMap<String, serde_json::Value>,
    /// Submissions that ended in permanent failure, by identifier
    pub failures: BTreeMap<String, String>,
    /// Fingerprints of accepted submissions
    pub submitted: Vec<Fingerprint>,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
    pub dry_run: bool,
    pub results_file: Option<PathBuf>,
}

/// Results file name for a run
pub fn results_file_name(stamp: &str) -> String {
    format!("scan_diff_results_{}.json", stamp)
}

/// Write `{ "<identifier>": <payload> }` to the results directory
pub fn write_results(
    dir: &Path,
    stamp: &str,
    results: &BTreeMap<String, serde_json::Value>,
) -> Result<PathBuf, CollectorError> {
    fs::create_dir_all(dir).map_err(|e| CollectorError::persistence(dir, e))?;
    let path = dir.join(results_file_name(stamp));
    let json =
        serde_json::to_string_pretty(results).map_err(|e| CollectorError::persistence(&path, e))?;
    fs::write(&path, json).map_err(|e| CollectorError::persistence(&path, e))?;
    Ok(path)
}

pub fn print_human(report: &RunReport, mode: OutputMode) {
    if mode == OutputMode::Quiet {
        return;
    }
    let stats = &report.stats;

    println!();
    if report.dry_run {
        println!("{}", "Collection Summary (dry run)".bold());
    } else {
        println!("{}", "Collection Summary".bold());
    }
    println!("{}", "=".repeat(48).dimmed());

    let rows = [
        ("Discovered", stats.discovered),
        ("Submitted", stats.submitted),
        ("Submission errors", stats.submission_errors),
        ("Deleted", stats.deleted),
        ("Not regular", stats.irregular),
        ("Excluded", stats.excluded),
        ("Wrong type", stats.wrong_type),
        ("Too big", stats.too_big),
        ("Too old", stats.too_old),
        ("Duplicates", stats.duplicates),
        ("Already scanned", stats.already_scanned),
        ("Extraction errors", stats.extraction_errors),
    ];
    for (label, value) in rows {
        // Zero rows are noise except for the headline counters
        if value == 0 && !matches!(label, "Discovered" | "Submitted") {
            continue;
        }
        let value = value.to_string();
        let value = match label {
            "Submitted" => value.green(),
            "Submission errors" | "Extraction errors" => value.red(),
            _ => value.normal(),
        };
        println!("{:<20} {:>10}", label, value);
    }

    println!("{}", "-".repeat(48).dimmed());
    println!(
        "{:<20} {:>10}",
        "Elapsed",
        format!("{:.1}s", report.elapsed.as_secs_f64())
    );
    if let Some(scan_id) = &report.scan_id {
        println!("{:<20} {:>10}", "Scan id", scan_id);
    }
    if let Some(path) = &report.results_file {
        println!("Results written to {}", path.display().to_string().cyan());
    }

    if !report.failures.is_empty() {
        println!();
        println!("{}", "Failed submissions".red().bold());
        let show_count = match mode {
            OutputMode::VeryVerbose => report.failures.len(),
            OutputMode::Verbose => 10,
            _ => 3,
        };
        for (identifier, reason) in report.failures.iter().take(show_count) {
            println!("  {} {}", identifier, reason.dimmed());
        }
        if report.failures.len() > show_count {
            println!(
                "  {}",
                format!("... and {} more", report.failures.len() - show_count).dimmed()
            );
        }
    }

    if mode == OutputMode::VeryVerbose {
        for identifier in report.results.keys() {
            println!("  {} {}", "[OK]".green(), identifier);
        }
    }
    println!();
}

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    stamp: &'a str,
    scan_id: Option<&'a str>,
    dry_run: bool,
    elapsed_secs: f64,
    stats: &'a StatsSnapshot,
    results_file: Option<String>,
    failures: &'a BTreeMap<String, String>,
}

pub fn print_json(report: &RunReport) -> anyhow::Result<()> {
    let json = JsonReport {
        version: env!("CARGO_PKG_VERSION"),
        stamp: &report.stamp,
        scan_id: report.scan_id.as_deref(),
        dry_run: report.dry_run,
        elapsed_secs: report.elapsed.as_secs_f64(),
        stats: &report.stats,
        results_file: report
            .results_file
            .as_ref()
            .map(|p| p.display().to_string()),
        failures: &report.failures,
    };
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
