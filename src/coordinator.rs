//! Run orchestration
//!
//! A run moves through `Idle -> LockAcquired -> Enumerating -> Filtering ->
//! Submitting -> Persisting -> Done`. Only a failure to take the run lock
//! aborts; every other failure is logged, counted and skipped.
//!
//! Probing, extraction and hashing fan out over a bounded worker pool but
//! are collected back in enumeration order, so deduplication and the history
//! check run on a single thread and always keep the same candidate.

use crate::candidate::Candidate;
use crate::config::CollectorConfig;
use crate::dedup::DedupIndex;
use crate::error::CollectorError;
use crate::exclusion::ExclusionPolicy;
use crate::filter::{FilterChain, SkipReason};
use crate::fingerprint::{fingerprint_file, Fingerprint};
use crate::history::ScanHistoryStore;
use crate::lock::RunLock;
use crate::output::{write_results, RunReport};
use crate::progress;
use crate::retry::{Clock, SystemClock, Transient};
use crate::source::{enumerate_all, ChangeRecord, SourceRuntime};
use crate::staging::{ArtifactExtractor, StagingArea};
use crate::stats::RunStats;
use crate::submit::{CollectionMarkers, SubmissionArtifact, SubmissionClient, Transport, Verdict};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Run timestamp format, used for history keys and file names
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LockAcquired,
    Enumerating,
    Filtering,
    Submitting,
    Persisting,
    Done,
    Aborted,
}

pub struct RunCoordinator {
    config: CollectorConfig,
    runtime: Arc<dyn SourceRuntime>,
    transport: Arc<dyn Transport>,
    policy: Arc<ExclusionPolicy>,
    clock: Arc<dyn Clock>,
    source_name: String,
    show_progress: bool,
    state: RunState,
}

impl RunCoordinator {
    pub fn new(
        config: CollectorConfig,
        runtime: Arc<dyn SourceRuntime>,
        transport: Arc<dyn Transport>,
        policy: Arc<ExclusionPolicy>,
    ) -> Self {
        let source_name = config.source.clone().unwrap_or_else(|| "unknown".to_string());
        Self {
            config,
            runtime,
            transport,
            policy,
            clock: Arc::new(SystemClock),
            source_name,
            show_progress: false,
            state: RunState::Idle,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Name reported in the collection markers
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = name.into();
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Execute one collection run
    ///
    /// Returns an error only when the run lock cannot be taken; nothing is
    /// read, sent or written in that case.
    pub fn run(&mut self) -> Result<RunReport, CollectorError> {
        let started = self.clock.now();

        let mut lock = match RunLock::open(&self.config.lock_file) {
            Ok(lock) => lock,
            Err(e) => return Err(self.abort(e)),
        };
        let _guard = match lock.try_acquire() {
            Ok(guard) => guard,
            Err(e) => return Err(self.abort(e)),
        };
        self.transition(RunState::LockAcquired);

        let stamp = self.clock.wall_time().format(STAMP_FORMAT).to_string();
        let stats = RunStats::new();
        let dry_run = self.config.dry_run;
        info!("Starting collection run {}", stamp);
        if dry_run {
            info!("Dry run: nothing will be sent or recorded");
        }

        let history = ScanHistoryStore::new(&self.config.history_file);
        let known = if self.config.incremental {
            match history.load() {
                Ok(h) => {
                    let known = h.known_fingerprints();
                    info!(
                        "Loaded {} known fingerprint(s) from {} previous run(s)",
                        known.len(),
                        h.run_count()
                    );
                    Some(known)
                }
                Err(e) => {
                    warn!("{}; continuing without history", e);
                    None
                }
            }
        } else {
            None
        };

        let client =
            SubmissionClient::from_config(&self.config, self.transport.clone(), self.clock.clone());
        if let Err(e) = client.check_status() {
            warn!("Scanning engine health check failed: {}", e);
        }
        let markers = (self.config.collection_markers && !dry_run)
            .then(|| CollectionMarkers::new(self.transport.clone(), self.source_name.clone()));
        let scan_id = markers
            .as_ref()
            .and_then(|m| m.begin(self.clock.wall_time()));

        self.transition(RunState::Enumerating);
        let spinner = progress::create_spinner("Enumerating changes...", self.show_progress);
        let records = enumerate_all(self.runtime.as_ref());
        stats.add_discovered(records.len() as u64);
        info!("Discovered {} changed path(s)", records.len());

        self.transition(RunState::Filtering);
        spinner.set_message("Filtering and hashing...");
        let staging = StagingArea::for_run(&self.config.staging_dir, &stamp);
        let chain = FilterChain::from_config(&self.config, self.policy.clone(), known);
        let now = self.clock.wall_time();
        let artifacts = self.select(records, &chain, &staging, &stats, now);
        spinner.finish_and_clear();
        info!("{} file(s) selected for submission", artifacts.len());

        self.transition(RunState::Submitting);
        if !artifacts.is_empty() {
            debug!("Submitting to {}", client.endpoint());
        }
        let outcomes = self.submit_all(&client, &artifacts, scan_id.as_deref());

        self.transition(RunState::Persisting);
        let mut report = RunReport {
            stamp: stamp.clone(),
            scan_id: scan_id.clone(),
            dry_run,
            ..RunReport::default()
        };
        for (artifact, fingerprint, verdict) in outcomes {
            match verdict {
                Verdict::Accepted(payload) => {
                    stats.record_submitted();
                    report.results.insert(artifact.identifier, payload);
                    report.submitted.push(fingerprint);
                }
                Verdict::PermanentFailure(reason)
                | Verdict::TransientFailure(Transient { reason, .. }) => {
                    stats.record_submission_error();
                    let failure = CollectorError::PermanentSubmission {
                        artifact: artifact.identifier.clone(),
                        reason: reason.clone(),
                    };
                    warn!("{}", failure);
                    report.failures.insert(artifact.identifier, reason);
                }
            }
        }

        if !dry_run {
            if self.config.save_history && !report.submitted.is_empty() {
                if let Err(e) = history.append_run(&stamp, &report.submitted) {
                    warn!("{}", e);
                }
            }
            match write_results(&self.config.results_dir, &stamp, &report.results) {
                Ok(path) => {
                    info!("Results written to {}", path.display());
                    report.results_file = Some(path);
                }
                Err(e) => warn!("{}", e),
            }
        }

        if self.config.keep_staged {
            debug!("Keeping staged copies in {}", staging.root().display());
        } else {
            staging.cleanup();
        }

        report.stats = stats.snapshot();
        report.elapsed = self.clock.now().saturating_duration_since(started);
        if let Some(markers) = &markers {
            markers.end(
                self.clock.wall_time(),
                scan_id.as_deref(),
                &report.stats,
                report.elapsed,
            );
        }
        log_statistics(&report);
        self.transition(RunState::Done);
        Ok(report)
    }

    fn abort(&mut self, e: CollectorError) -> CollectorError {
        error!("{}", e);
        self.transition(RunState::Aborted);
        e
    }

    /// Filter, extract, hash and deduplicate the enumerated records
    fn select(
        &self,
        records: Vec<ChangeRecord>,
        chain: &FilterChain,
        staging: &StagingArea,
        stats: &RunStats,
        now: DateTime<Utc>,
    ) -> Vec<(SubmissionArtifact, Fingerprint)> {
        let extractor = ArtifactExtractor::new(self.runtime.as_ref(), staging);
        let prepare = |record: ChangeRecord| self.prepare(record, chain, &extractor, now);

        let prepared: Vec<(String, Result<Candidate, SkipReason>)> =
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .build()
            {
                Ok(pool) => pool.install(|| records.into_par_iter().map(prepare).collect()),
                Err(e) => {
                    warn!("Could not start worker pool ({}); preparing sequentially", e);
                    records.into_iter().map(prepare).collect()
                }
            };

        let mut dedup = DedupIndex::new();
        let mut artifacts = Vec::new();
        for (identifier, outcome) in prepared {
            let candidate = match outcome {
                Ok(candidate) => candidate,
                Err(reason) => {
                    skip(stats, &identifier, &reason);
                    continue;
                }
            };
            let Some(fingerprint) = candidate.fingerprint.clone() else {
                continue;
            };
            if let Some(original) = dedup.admit(&fingerprint, &candidate) {
                stats.record_skip(&SkipReason::Duplicate { original });
                continue;
            }
            if let Err(reason) = chain.evaluate(&candidate, now) {
                skip(stats, &identifier, &reason);
                continue;
            }
            let Some(upload_path) = candidate.staged_path.clone() else {
                continue;
            };
            artifacts.push((
                SubmissionArtifact {
                    identifier,
                    source_id: candidate.record.source_id.clone(),
                    original_path: candidate.record.path.clone(),
                    upload_path,
                },
                fingerprint,
            ));
        }
        debug!("{} distinct fingerprint(s) admitted", dedup.admitted());
        artifacts
    }

    /// Probe, extract and hash one record, re-checking the chain as
    /// metadata becomes known
    fn prepare(
        &self,
        record: ChangeRecord,
        chain: &FilterChain,
        extractor: &ArtifactExtractor<'_>,
        now: DateTime<Utc>,
    ) -> (String, Result<Candidate, SkipReason>) {
        let identifier = record.identifier();
        let mut candidate = Candidate::new(record);
        let outcome = (|| -> Result<(), SkipReason> {
            chain.evaluate(&candidate, now)?;

            // Without a probe the entry could be a symlink, a directory or
            // oversized; never copy it blind
            let probe = self
                .runtime
                .probe(&candidate.record)
                .map_err(|e| SkipReason::Unreadable {
                    message: format!("probe failed: {}", e),
                })?;
            candidate.apply_probe(probe);
            chain.evaluate(&candidate, now)?;

            extractor
                .extract(&mut candidate)
                .map_err(|e| SkipReason::Unreadable {
                    message: e.to_string(),
                })?;
            chain.evaluate(&candidate, now)?;

            let staged = candidate.staged_path.as_deref().ok_or_else(|| SkipReason::Unreadable {
                message: "no staged copy".to_string(),
            })?;
            let fingerprint = fingerprint_file(staged).map_err(|e| SkipReason::Unreadable {
                message: format!("hashing {}: {}", staged.display(), e),
            })?;
            candidate.fingerprint = Some(fingerprint);
            Ok(())
        })();
        (identifier, outcome.map(|()| candidate))
    }

    fn submit_all(
        &self,
        client: &SubmissionClient,
        artifacts: &[(SubmissionArtifact, Fingerprint)],
        scan_id: Option<&str>,
    ) -> Vec<(SubmissionArtifact, Fingerprint, Verdict)> {
        let bar = progress::create_progress_bar(
            artifacts.len() as u64,
            "Submitting",
            self.show_progress && !artifacts.is_empty(),
        );
        let submit_one = |(artifact, fingerprint): &(SubmissionArtifact, Fingerprint)| {
            let verdict = client.submit(artifact, scan_id);
            if matches!(verdict, Verdict::Accepted(_)) {
                debug!("Submitted {}", artifact.identifier);
            }
            bar.inc(1);
            (artifact.clone(), fingerprint.clone(), verdict)
        };

        let outcomes: Vec<(SubmissionArtifact, Fingerprint, Verdict)> = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
        {
            Ok(pool) => pool.install(|| artifacts.par_iter().map(submit_one).collect()),
            Err(e) => {
                warn!("Could not start submission pool ({}); submitting sequentially", e);
                artifacts.iter().map(submit_one).collect()
            }
        };
        bar.finish_and_clear();
        outcomes
    }
}

fn skip(stats: &RunStats, identifier: &str, reason: &SkipReason) {
    stats.record_skip(reason);
    match reason {
        SkipReason::Unreadable { .. } => warn!("Skipping {}: {}", identifier, reason),
        _ => debug!("Skipping {}: {}", identifier, reason),
    }
}

fn log_statistics(report: &RunReport) {
    let s = &report.stats;
    info!("=== Collection Statistics ===");
    info!("Discovered:        {}", s.discovered);
    info!("Submitted:         {}", s.submitted);
    info!("Submission errors: {}", s.submission_errors);
    info!(
        "Skipped:           {} (deleted {}, irregular {}, excluded {}, wrong type {}, too big {}, too old {}, duplicate {}, already scanned {}, unreadable {})",
        s.skipped(),
        s.deleted,
        s.irregular,
        s.excluded,
        s.wrong_type,
        s.too_big,
        s.too_old,
        s.duplicates,
        s.already_scanned,
        s.extraction_errors
    );
    info!("Elapsed:           {:.1}s", report.elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FixedMounts;
    use crate::submit::markers::COLLECTION_ENDPOINT;
    use crate::submit::{HttpReply, ASYNC_ENDPOINT};
    use crate::testing::{test_config, FakeFile, FakeRuntime, ManualClock, ScriptedTransport};
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(runtime: FakeRuntime) -> Self {
            Self {
                runtime: Arc::new(runtime),
                transport: Arc::new(ScriptedTransport::new()),
                clock: Arc::new(ManualClock::at(
                    DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                        .unwrap()
                        .with_timezone(&Utc),
                )),
            }
        }

        fn coordinator(&self, config: CollectorConfig) -> RunCoordinator {
            let policy =
                Arc::new(ExclusionPolicy::from_config(&config, &FixedMounts::default()).unwrap());
            RunCoordinator::new(config, self.runtime.clone(), self.transport.clone(), policy)
                .with_clock(self.clock.clone())
                .with_source_name("test-host")
        }

        fn uploads(&self) -> Vec<crate::testing::RecordedRequest> {
            self.transport.requests_to(ASYNC_ENDPOINT)
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn test_identical_content_in_two_sources_submitted_once() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("aaa", "/etc/app.conf", FakeFile::regular(b"port=80"))
                .with_file("bbb", "/etc/app.conf", FakeFile::regular(b"port=80")),
        );
        let mut coordinator = harness.coordinator(test_config(temp_dir.path()));

        let report = coordinator.run().unwrap();

        assert_eq!(coordinator.state(), RunState::Done);
        assert_eq!(harness.uploads().len(), 1);
        assert_eq!(report.stats.submitted, 1);
        assert_eq!(report.stats.duplicates, 1);

        let results = read_json(report.results_file.as_deref().unwrap());
        let keys: Vec<&String> = results.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["aaa:/etc/app.conf"]);
        assert!(report
            .results_file
            .unwrap()
            .ends_with("scan_diff_results_2024-05-01_10-00-00.json"));
    }

    #[test]
    fn test_oversized_candidate_never_extracted() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/data/huge.bin", FakeFile::regular(b"x").with_size(50 * 1024 * 1024))
                .with_file("c1", "/data/small.bin", FakeFile::regular(b"y")),
        );
        let config = CollectorConfig {
            max_size_bytes: 20 * 1024 * 1024,
            ..test_config(temp_dir.path())
        };

        let report = harness.coordinator(config).run().unwrap();

        assert_eq!(harness.runtime.extracted(), vec!["c1:/data/small.bin"]);
        assert_eq!(report.stats.too_big, 1);
        assert_eq!(harness.uploads().len(), 1);
    }

    #[test]
    fn test_held_lock_aborts_without_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a.sh", FakeFile::regular(b"echo")),
        );

        let mut held = RunLock::open(&config.lock_file).unwrap();
        let _guard = held.try_acquire().unwrap();

        let mut coordinator = harness.coordinator(config.clone());
        let err = coordinator.run().unwrap_err();

        assert!(matches!(err, CollectorError::RunConflict { .. }));
        assert_eq!(coordinator.state(), RunState::Aborted);
        assert!(harness.transport.requests().is_empty());
        assert!(harness.runtime.probed().is_empty());
        assert!(!config.history_file.exists());
        assert!(!config.results_dir.exists());
    }

    #[test]
    fn test_incremental_run_skips_known_content() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/opt/tool", FakeFile::regular(b"\x7fELF")),
        );
        let config = test_config(temp_dir.path());

        let first = harness.coordinator(config.clone()).run().unwrap();
        assert_eq!(first.stats.submitted, 1);

        harness.clock.sleep(Duration::from_secs(3600));
        let second = harness.coordinator(config.clone()).run().unwrap();
        assert_eq!(second.stats.submitted, 0);
        assert_eq!(second.stats.already_scanned, 1);
        assert_eq!(harness.uploads().len(), 1);

        // Non-incremental runs resend
        let third = harness
            .coordinator(CollectorConfig {
                incremental: false,
                ..config
            })
            .run()
            .unwrap();
        assert_eq!(third.stats.submitted, 1);
    }

    #[test]
    fn test_history_records_submitted_fingerprints() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/opt/tool", FakeFile::regular(b"payload")),
        );
        let config = test_config(temp_dir.path());

        harness.coordinator(config.clone()).run().unwrap();

        let history = read_json(&config.history_file);
        assert_eq!(
            history["2024-05-01_10-00-00"][0],
            Fingerprint::of_bytes(b"payload").as_str()
        );
    }

    #[test]
    fn test_symlink_never_extracted_nor_submitted() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/usr/bin/python", FakeFile::symlink())
                .with_file("c1", "/app/main.py", FakeFile::regular(b"print()")),
        );

        let report = harness.coordinator(test_config(temp_dir.path())).run().unwrap();

        assert_eq!(harness.runtime.extracted(), vec!["c1:/app/main.py"]);
        assert_eq!(report.stats.irregular, 1);
        assert!(!report.results.contains_key("c1:/usr/bin/python"));
    }

    #[test]
    fn test_deleted_and_excluded_never_probed() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/var/log/gone.log", FakeFile::deleted())
                .with_file("c1", "/proc/1/environ", FakeFile::regular(b"PATH=/"))
                .with_file("c1", "/srv/disk.vmdk", FakeFile::regular(b"vm")),
        );

        let report = harness.coordinator(test_config(temp_dir.path())).run().unwrap();

        assert!(harness.runtime.probed().is_empty());
        assert_eq!(report.stats.deleted, 1);
        assert_eq!(report.stats.excluded, 2);
        assert!(harness.uploads().is_empty());
    }

    #[test]
    fn test_exhausted_retries_recorded_and_run_continues() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/tmp/one", FakeFile::regular(b"1"))
                .with_file("c1", "/tmp/two", FakeFile::regular(b"2")),
        );
        let busy = HttpReply {
            status: 503,
            retry_after: None,
            body: String::new(),
        };
        for _ in 0..4 {
            harness.transport.push_reply_for(ASYNC_ENDPOINT, busy.clone());
        }
        let config = CollectorConfig {
            threads: 1,
            ..test_config(temp_dir.path())
        };

        let report = harness.coordinator(config.clone()).run().unwrap();

        assert_eq!(report.stats.submission_errors, 1);
        assert_eq!(report.stats.submitted, 1);
        assert!(report.failures.contains_key("c1:/tmp/one"));
        assert!(report.results.contains_key("c1:/tmp/two"));
        assert_eq!(harness.clock.total_slept(), Duration::from_secs(90));

        // Only the accepted fingerprint is remembered
        let history = read_json(&config.history_file);
        let recorded = history["2024-05-01_10-00-00"].as_array().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], Fingerprint::of_bytes(b"2").as_str());
    }

    #[test]
    fn test_failing_source_does_not_stop_run() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_failing_source("broken")
                .with_file("ok", "/etc/motd", FakeFile::regular(b"hello")),
        );

        let report = harness.coordinator(test_config(temp_dir.path())).run().unwrap();

        assert_eq!(report.stats.submitted, 1);
        assert!(report.results.contains_key("ok:/etc/motd"));
    }

    #[test]
    fn test_markers_bracket_run_and_tag_uploads() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a", FakeFile::regular(b"a")),
        );
        harness
            .transport
            .push_reply_for(COLLECTION_ENDPOINT, HttpReply::ok(r#"{"scan_id":"scan-1"}"#));
        let config = CollectorConfig {
            collection_markers: true,
            ..test_config(temp_dir.path())
        };

        let report = harness.coordinator(config).run().unwrap();

        assert_eq!(report.scan_id.as_deref(), Some("scan-1"));
        let uploads = harness.uploads();
        assert!(uploads[0]
            .query
            .contains(&("scan_id".to_string(), "scan-1".to_string())));

        let markers = harness.transport.requests_to(COLLECTION_ENDPOINT);
        assert_eq!(markers.len(), 2);
        let end: serde_json::Value = serde_json::from_slice(&markers[1].body).unwrap();
        assert_eq!(end["type"], "end");
        assert_eq!(end["source"], "test-host");
        assert_eq!(end["stats"]["submitted"], 1);
        assert!(end["elapsed_secs"].is_number());
    }

    #[test]
    fn test_marker_failure_omits_scan_id() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a", FakeFile::regular(b"a")),
        );
        harness.transport.push_reply_for(
            COLLECTION_ENDPOINT,
            HttpReply {
                status: 500,
                retry_after: None,
                body: String::new(),
            },
        );
        let config = CollectorConfig {
            collection_markers: true,
            ..test_config(temp_dir.path())
        };

        let report = harness.coordinator(config).run().unwrap();

        assert_eq!(report.scan_id, None);
        assert_eq!(report.stats.submitted, 1);
        assert!(harness.uploads()[0].query.iter().all(|(k, _)| k != "scan_id"));
    }

    #[test]
    fn test_dry_run_sends_and_records_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a", FakeFile::regular(b"a")),
        );
        let config = CollectorConfig {
            dry_run: true,
            collection_markers: true,
            ..test_config(temp_dir.path())
        };

        let report = harness.coordinator(config.clone()).run().unwrap();

        assert!(report.dry_run);
        assert_eq!(report.stats.submitted, 1);
        assert!(harness.transport.requests().is_empty());
        assert!(!config.history_file.exists());
        assert!(report.results_file.is_none());
    }

    #[test]
    fn test_staging_removed_unless_kept() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a", FakeFile::regular(b"a")),
        );
        let config = test_config(temp_dir.path());
        let run_dir = config.staging_dir.join("diff_2024-05-01_10-00-00");

        harness.coordinator(config.clone()).run().unwrap();
        assert!(!run_dir.exists());

        let kept = CollectorConfig {
            keep_staged: true,
            incremental: false,
            ..config
        };
        harness.coordinator(kept).run().unwrap();
        assert!(run_dir.join("c1/tmp/a").exists());
    }

    #[test]
    fn test_old_files_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(FakeRuntime::new().with_file(
            "c1",
            "/tmp/old",
            FakeFile::regular(b"old").with_mtime(
                DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
        ));

        let report = harness.coordinator(test_config(temp_dir.path())).run().unwrap();

        assert_eq!(report.stats.too_old, 1);
        assert!(harness.runtime.extracted().is_empty());
    }

    #[test]
    fn test_uninspectable_entry_skipped_before_extraction() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/usr/bin/python", FakeFile::symlink().with_inspect_failure())
                .with_file("c1", "/app/main.py", FakeFile::regular(b"print()")),
        );

        let report = harness.coordinator(test_config(temp_dir.path())).run().unwrap();

        assert_eq!(harness.runtime.extracted(), vec!["c1:/app/main.py"]);
        assert_eq!(report.stats.extraction_errors, 1);
        assert_eq!(report.stats.submitted, 1);
        assert!(!report.results.contains_key("c1:/usr/bin/python"));
    }

    #[test]
    fn test_extraction_failure_skips_only_that_candidate() {
        let temp_dir = TempDir::new().unwrap();
        let harness = Harness::new(
            FakeRuntime::new()
                .with_file("c1", "/root/.ssh/id_rsa", FakeFile::unreadable(b"key"))
                .with_file("c1", "/tmp/dropper", FakeFile::regular(b"MZ")),
        );

        let mut coordinator = harness.coordinator(test_config(temp_dir.path()));
        let report = coordinator.run().unwrap();

        assert_eq!(coordinator.state(), RunState::Done);
        assert_eq!(report.stats.extraction_errors, 1);
        assert_eq!(report.stats.submitted, 1);
        assert_eq!(harness.uploads().len(), 1);
        assert!(report.results.contains_key("c1:/tmp/dropper"));
    }

    #[test]
    fn test_unwritable_persistence_still_reports() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let harness = Harness::new(
            FakeRuntime::new().with_file("c1", "/tmp/a", FakeFile::regular(b"a")),
        );
        let config = CollectorConfig {
            history_file: blocker.join("history.json"),
            results_dir: blocker.join("results"),
            ..test_config(temp_dir.path())
        };

        let mut coordinator = harness.coordinator(config);
        let report = coordinator.run().unwrap();

        assert_eq!(coordinator.state(), RunState::Done);
        assert_eq!(report.stats.submitted, 1);
        assert_eq!(report.submitted.len(), 1);
        assert!(report.results_file.is_none());
        assert_eq!(harness.uploads().len(), 1);
    }
}
