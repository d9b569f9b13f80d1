//! Submission of artifacts to the scanning engine
//!
//! Each artifact is posted as a single-part multipart upload. Failed attempts
//! go through [`RetryPolicy`]; a 503 also pauses every other worker through
//! the shared [`UploadGate`].

pub mod markers;
pub mod transport;

pub use markers::CollectionMarkers;
pub use transport::{HttpReply, MultipartBody, Transport, UreqTransport};

use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::retry::{Clock, RetryPolicy, RetryState, Transient, UploadGate};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ASYNC_ENDPOINT: &str = "/api/checkAsync";
pub const SYNC_ENDPOINT: &str = "/api/check";
pub const STATUS_ENDPOINT: &str = "/api/status";

/// Outcome of a submission
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Engine accepted the file; payload is its JSON reply
    Accepted(serde_json::Value),
    /// Attempt failed but may be retried
    TransientFailure(Transient),
    /// Retries exhausted or artifact unusable
    PermanentFailure(String),
}

/// A file ready to send
#[derive(Debug, Clone)]
pub struct SubmissionArtifact {
    pub identifier: String,
    pub source_id: String,
    /// Path inside the source, sent as the upload's filename
    pub original_path: PathBuf,
    /// Local path the bytes are read from
    pub upload_path: PathBuf,
}

pub struct SubmissionClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    gate: UploadGate,
    endpoint: &'static str,
    dry_run: bool,
}

impl SubmissionClient {
    pub fn from_config(
        config: &CollectorConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            clock,
            policy: RetryPolicy::from_config(config),
            gate: UploadGate::new(config.min_upload_period()),
            endpoint: if config.sync {
                SYNC_ENDPOINT
            } else {
                ASYNC_ENDPOINT
            },
            dry_run: config.dry_run,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint
    }

    /// Probe `GET /api/status`
    pub fn check_status(&self) -> Result<(), CollectorError> {
        if self.dry_run {
            return Ok(());
        }
        let reply = self.transport.get(STATUS_ENDPOINT)?;
        if reply.status == 200 {
            debug!("Scanning engine status: {}", reply.body.trim());
            Ok(())
        } else {
            Err(CollectorError::TransientSubmission(format!(
                "status endpoint answered {}",
                reply.status
            )))
        }
    }

    /// Submit one artifact, retrying until accepted or out of attempts
    ///
    /// The file is re-read for every attempt so each retry sends the whole
    /// artifact.
    pub fn submit(&self, artifact: &SubmissionArtifact, scan_id: Option<&str>) -> Verdict {
        if self.dry_run {
            info!("Dry run: would submit {}", artifact.identifier);
            return Verdict::Accepted(serde_json::json!({ "dry_run": true }));
        }

        let mut state = RetryState::Attempting { attempt: 1 };
        let mut last_failure = String::new();
        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    let content = match fs::read(&artifact.upload_path) {
                        Ok(content) => content,
                        Err(e) => {
                            return Verdict::PermanentFailure(format!(
                                "cannot read {}: {}",
                                artifact.upload_path.display(),
                                e
                            ))
                        }
                    };
                    self.gate.wait_turn(self.clock.as_ref());
                    match self.attempt(artifact, scan_id, &content) {
                        Verdict::TransientFailure(failure) => {
                            debug!(
                                "Attempt {} for {} failed: {}",
                                attempt, artifact.identifier, failure.reason
                            );
                            let next = self.policy.after_failure(attempt, &failure);
                            last_failure = failure.reason;
                            next
                        }
                        verdict => return verdict,
                    }
                }
                RetryState::Backoff {
                    attempt,
                    delay,
                    busy,
                } => {
                    if busy {
                        self.gate.pause_for(self.clock.as_ref(), delay);
                    } else {
                        debug!(
                            "Retrying {} in {}s",
                            artifact.identifier,
                            delay.as_secs()
                        );
                        self.clock.sleep(delay);
                    }
                    RetryState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                RetryState::Exhausted { attempts } => {
                    warn!(
                        "Giving up on {} after {} attempt(s): {}",
                        artifact.identifier, attempts, last_failure
                    );
                    return Verdict::PermanentFailure(format!(
                        "gave up after {} attempt(s): {}",
                        attempts, last_failure
                    ));
                }
            };
        }
    }

    fn attempt(&self, artifact: &SubmissionArtifact, scan_id: Option<&str>, content: &[u8]) -> Verdict {
        let filename = artifact.original_path.to_string_lossy();
        let multipart = MultipartBody::single_file(&filename, content);
        let mut query = vec![("source", artifact.source_id.as_str())];
        if let Some(scan_id) = scan_id {
            query.push(("scan_id", scan_id));
        }

        match self
            .transport
            .post(self.endpoint, &query, &multipart.content_type, &multipart.body)
        {
            Ok(reply) => classify(&reply),
            Err(e) => Verdict::TransientFailure(Transient::failed(e.to_string())),
        }
    }
}

/// Map one HTTP reply to a verdict
pub fn classify(reply: &HttpReply) -> Verdict {
    match reply.status {
        200 => Verdict::Accepted(
            serde_json::from_str(&reply.body)
                .unwrap_or_else(|_| serde_json::Value::String(reply.body.clone())),
        ),
        503 => {
            let retry_after = reply
                .retry_after
                .as_deref()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            Verdict::TransientFailure(Transient::busy(retry_after))
        }
        status => {
            let body: String = reply.body.trim().chars().take(200).collect();
            Verdict::TransientFailure(Transient::failed(format!("HTTP {}: {}", status, body)))
        }
    }
}
