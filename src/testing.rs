//! In-memory runtime, transport and clock for unit tests

use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::retry::Clock;
use crate::source::{ChangeKind, ChangeRecord, EntryKind, FileProbe, Source, SourceRuntime};
use crate::staging::StagingArea;
use crate::submit::HttpReply;
use crate::submit::Transport;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FakeFile {
    content: Vec<u8>,
    kind: EntryKind,
    change: ChangeKind,
    probe_size: Option<u64>,
    mtime: Option<DateTime<Utc>>,
    probe_fails: bool,
    extract_fails: bool,
}

impl FakeFile {
    pub fn regular(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            kind: EntryKind::Regular,
            change: ChangeKind::Added,
            probe_size: None,
            mtime: Some(Utc::now()),
            probe_fails: false,
            extract_fails: false,
        }
    }

    pub fn symlink() -> Self {
        Self {
            kind: EntryKind::Symlink,
            ..Self::regular(b"")
        }
    }

    pub fn deleted() -> Self {
        Self {
            change: ChangeKind::Deleted,
            ..Self::regular(b"")
        }
    }

    /// Probes fine but cannot be copied out
    pub fn unreadable(content: &[u8]) -> Self {
        Self {
            extract_fails: true,
            ..Self::regular(content)
        }
    }

    /// The runtime cannot inspect the entry, as in images without a shell
    pub fn with_inspect_failure(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Size reported by the probe, independent of the content
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.probe_size = Some(size_bytes);
        self
    }

    pub fn with_mtime(mut self, mtime: DateTime<Utc>) -> Self {
        self.mtime = Some(mtime);
        self
    }
}

#[derive(Debug)]
struct FakeSource {
    id: String,
    files: Vec<(PathBuf, FakeFile)>,
    fails: bool,
}

/// Scripted [`SourceRuntime`]; sources keep insertion order
#[derive(Debug, Default)]
pub struct FakeRuntime {
    sources: Vec<FakeSource>,
    listing_fails: bool,
    probed: Mutex<Vec<String>>,
    extracted: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, source: &str, path: &str, file: FakeFile) -> Self {
        let entry = (PathBuf::from(path), file);
        match self.sources.iter_mut().find(|s| s.id == source) {
            Some(existing) => existing.files.push(entry),
            None => self.sources.push(FakeSource {
                id: source.to_string(),
                files: vec![entry],
                fails: false,
            }),
        }
        self
    }

    pub fn with_failing_source(mut self, source: &str) -> Self {
        self.sources.push(FakeSource {
            id: source.to_string(),
            files: Vec::new(),
            fails: true,
        });
        self
    }

    pub fn with_listing_failure(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    /// Identifiers passed to `extract`, in call order
    pub fn extracted(&self) -> Vec<String> {
        self.extracted.lock().unwrap().clone()
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }

    fn file(&self, record: &ChangeRecord) -> Option<&FakeFile> {
        self.sources
            .iter()
            .find(|s| s.id == record.source_id)?
            .files
            .iter()
            .find(|(path, _)| *path == record.path)
            .map(|(_, file)| file)
    }
}

impl SourceRuntime for FakeRuntime {
    fn list_sources(&self) -> Result<Vec<Source>, CollectorError> {
        if self.listing_fails {
            return Err(CollectorError::SourceEnumeration {
                source_id: "*".into(),
                message: "runtime unavailable".into(),
            });
        }
        Ok(self
            .sources
            .iter()
            .map(|s| Source {
                id: s.id.clone(),
                label: format!("fake/{}", s.id),
            })
            .collect())
    }

    fn changes(&self, source: &Source) -> Result<Vec<ChangeRecord>, CollectorError> {
        let fake = self
            .sources
            .iter()
            .find(|s| s.id == source.id)
            .ok_or_else(|| CollectorError::SourceEnumeration {
                source_id: source.id.clone(),
                message: "unknown source".into(),
            })?;
        if fake.fails {
            return Err(CollectorError::SourceEnumeration {
                source_id: source.id.clone(),
                message: "diff failed".into(),
            });
        }
        Ok(fake
            .files
            .iter()
            .map(|(path, file)| ChangeRecord::new(&fake.id, path.clone(), file.change))
            .collect())
    }

    fn probe(&self, record: &ChangeRecord) -> Result<FileProbe, CollectorError> {
        self.probed.lock().unwrap().push(record.identifier());
        let file = self
            .file(record)
            .ok_or_else(|| CollectorError::extraction(&record.path, "no such file"))?;
        if file.probe_fails {
            return Err(CollectorError::extraction(&record.path, "exec failed with status 126"));
        }
        Ok(FileProbe {
            kind: file.kind,
            size_bytes: Some(file.probe_size.unwrap_or(file.content.len() as u64)),
            mtime: file.mtime,
        })
    }

    fn extract(
        &self,
        record: &ChangeRecord,
        staging: &StagingArea,
    ) -> Result<PathBuf, CollectorError> {
        self.extracted.lock().unwrap().push(record.identifier());
        let file = self
            .file(record)
            .ok_or_else(|| CollectorError::extraction(&record.path, "no such file"))?;
        if file.extract_fails {
            return Err(CollectorError::extraction(&record.path, "permission denied"));
        }
        let staged = staging.path_for(record);
        staging.prepare(&staged)?;
        fs::write(&staged, &file.content).map_err(|e| CollectorError::extraction(&record.path, e))?;
        Ok(staged)
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub content_type: String,
    pub body: Vec<u8>,
}

type Scripted = Result<HttpReply, String>;

/// Transport answering from queued replies
///
/// Replies queued for an endpoint take precedence over the shared queue;
/// with both empty the answer is `200 {}`.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    by_endpoint: Mutex<HashMap<String, VecDeque<Scripted>>>,
    shared: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: HttpReply) {
        self.shared.lock().unwrap().push_back(Ok(reply));
    }

    pub fn push_error(&self, message: &str) {
        self.shared.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn push_reply_for(&self, endpoint: &str, reply: HttpReply) {
        self.by_endpoint
            .lock()
            .unwrap()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(Ok(reply));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, endpoint: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.endpoint == endpoint)
            .collect()
    }

    fn answer(&self, request: RecordedRequest) -> Result<HttpReply, CollectorError> {
        let scripted = self
            .by_endpoint
            .lock()
            .unwrap()
            .get_mut(&request.endpoint)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.shared.lock().unwrap().pop_front());
        self.requests.lock().unwrap().push(request);
        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(CollectorError::TransientSubmission(message)),
            None => Ok(HttpReply::ok("{}")),
        }
    }
}

impl Transport for ScriptedTransport {
    fn post(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpReply, CollectorError> {
        self.answer(RecordedRequest {
            method: "POST",
            endpoint: endpoint.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            content_type: content_type.to_string(),
            body: body.to_vec(),
        })
    }

    fn get(&self, endpoint: &str) -> Result<HttpReply, CollectorError> {
        self.answer(RecordedRequest {
            method: "GET",
            endpoint: endpoint.to_string(),
            query: Vec::new(),
            content_type: String::new(),
            body: Vec::new(),
        })
    }
}

/// Clock whose `sleep` advances time instantly and is recorded
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    wall_start: DateTime<Utc>,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(wall_start: DateTime<Utc>) -> Self {
        Self {
            start: Instant::now(),
            wall_start,
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let elapsed = *self.elapsed.lock().unwrap();
        self.wall_start + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// Configuration with every path inside `dir` and markers off
pub fn test_config(dir: &Path) -> CollectorConfig {
    CollectorConfig {
        server: "http://scanner.test:8080".into(),
        workers: 2,
        threads: 2,
        collection_markers: false,
        lock_file: dir.join("collector.lock"),
        history_file: dir.join("history.json"),
        results_dir: dir.join("results"),
        staging_dir: dir.join("staging"),
        ..CollectorConfig::default()
    }
}
