//! Begin/end markers bracketing a collection run
//!
//! `POST /api/collection` with a small JSON document. The engine answers the
//! begin marker with a `scan_id` that tags every submission of the run.
//! Marker failures never affect the run.

use super::transport::Transport;
use crate::stats::StatsSnapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const COLLECTION_ENDPOINT: &str = "/api/collection";
const COLLECTOR_NAME: &str = concat!("diff-collector/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Begin,
    End,
}

#[derive(Debug, Serialize)]
struct Marker<'a> {
    #[serde(rename = "type")]
    kind: MarkerKind,
    source: &'a str,
    collector: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scan_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<&'a StatsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BeginReply {
    scan_id: Option<String>,
}

pub struct CollectionMarkers {
    transport: Arc<dyn Transport>,
    source: String,
}

impl CollectionMarkers {
    pub fn new(transport: Arc<dyn Transport>, source: impl Into<String>) -> Self {
        Self {
            transport,
            source: source.into(),
        }
    }

    /// Send the begin marker; returns the engine's scan id if it issued one
    pub fn begin(&self, at: DateTime<Utc>) -> Option<String> {
        let reply = self.send(MarkerKind::Begin, at, None, None, None)?;
        match serde_json::from_str::<BeginReply>(&reply) {
            Ok(BeginReply {
                scan_id: Some(scan_id),
            }) if !scan_id.is_empty() => {
                debug!("Collection started with scan id {}", scan_id);
                Some(scan_id)
            }
            _ => {
                warn!("Begin marker reply carried no scan id; submitting without one");
                None
            }
        }
    }

    /// Send the end marker with the run's counters and elapsed time
    pub fn end(
        &self,
        at: DateTime<Utc>,
        scan_id: Option<&str>,
        stats: &StatsSnapshot,
        elapsed: Duration,
    ) {
        self.send(
            MarkerKind::End,
            at,
            scan_id,
            Some(stats),
            Some(elapsed.as_secs_f64()),
        );
    }

    fn send(
        &self,
        kind: MarkerKind,
        at: DateTime<Utc>,
        scan_id: Option<&str>,
        stats: Option<&StatsSnapshot>,
        elapsed_secs: Option<f64>,
    ) -> Option<String> {
        let marker = Marker {
            kind,
            source: &self.source,
            collector: COLLECTOR_NAME,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            scan_id,
            stats,
            elapsed_secs,
        };
        let body = match serde_json::to_vec(&marker) {
            Ok(body) => body,
            Err(e) => {
                warn!("Could not encode {:?} marker: {}", kind, e);
                return None;
            }
        };
        match self
            .transport
            .post(COLLECTION_ENDPOINT, &[], "application/json", &body)
        {
            Ok(reply) if reply.status == 200 => Some(reply.body),
            Ok(reply) => {
                warn!(
                    "{:?} marker rejected with status {}",
                    kind, reply.status
                );
                None
            }
            Err(e) => {
                warn!("{:?} marker not delivered: {}", kind, e);
                None
            }
        }
    }
}
