//! Retry policy, clock and the shared upload gate
//!
//! A submission moves through `Attempting -> Backoff -> Attempting -> ... ->
//! Exhausted`. The policy only decides the next state; the caller sleeps on
//! the injected [`Clock`], so tests can drive the machine without waiting.

use crate::config::CollectorConfig;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn wall_time(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// A failed attempt that may be retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transient {
    pub reason: String,
    /// Server-requested wait, from `Retry-After`
    pub retry_after: Option<Duration>,
    /// The engine answered 503
    pub busy: bool,
}

impl Transient {
    pub fn busy(retry_after: Option<Duration>) -> Self {
        Self {
            reason: "server busy (503)".to_string(),
            retry_after,
            busy: true,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retry_after: None,
            busy: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to send attempt number `attempt` (1-based)
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed; wait `delay` before the next one
    Backoff {
        attempt: u32,
        delay: Duration,
        busy: bool,
    },
    /// No attempts left
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub backoff_base: Duration,
    /// Wait used for a 503 without a usable `Retry-After`
    pub default_retry_after: Duration,
    /// Upper bound on any single wait, whatever the server asks for
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CollectorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(config.backoff_base_secs),
            default_retry_after: Duration::from_secs(config.default_retry_after_secs),
            max_wait: Duration::from_secs(config.max_retry_wait_secs),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Next state after attempt number `attempt` failed
    pub fn after_failure(&self, attempt: u32, failure: &Transient) -> RetryState {
        if attempt >= self.max_attempts() {
            return RetryState::Exhausted { attempts: attempt };
        }
        let requested = if failure.busy {
            failure.retry_after.unwrap_or(self.default_retry_after)
        } else {
            self.backoff_delay(attempt)
        };
        let delay = requested.min(self.max_wait);
        if delay < requested {
            debug!(
                "Capping wait of {}s to {}s",
                requested.as_secs(),
                delay.as_secs()
            );
        }
        RetryState::Backoff {
            attempt,
            delay,
            busy: failure.busy,
        }
    }

    /// `base * 2^(attempt - 1)`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Default)]
struct GateState {
    last_upload: Option<Instant>,
    paused_until: Option<Instant>,
}

/// Admission gate shared by every submission worker
///
/// Enforces the minimum upload spacing and holds all workers while the
/// engine has signalled it is busy.
#[derive(Debug, Default)]
pub struct UploadGate {
    min_interval: Option<Duration>,
    state: Mutex<GateState>,
}

impl UploadGate {
    pub fn new(min_interval: Option<Duration>) -> Self {
        Self {
            min_interval,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Block until this worker may upload, then claim the slot
    pub fn wait_turn(&self, clock: &dyn Clock) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                let now = clock.now();
                let mut ready_at = now;
                if let Some(paused_until) = state.paused_until {
                    ready_at = ready_at.max(paused_until);
                }
                if let (Some(interval), Some(last)) = (self.min_interval, state.last_upload) {
                    ready_at = ready_at.max(last.checked_add(interval).unwrap_or(now));
                }
                if ready_at <= now {
                    state.last_upload = Some(now);
                    return;
                }
                ready_at - now
            };
            debug!("Waiting {:.1}s for upload slot", wait.as_secs_f64());
            clock.sleep(wait);
        }
    }

    /// Hold every worker for `duration` from now
    pub fn pause_for(&self, clock: &dyn Clock, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let now = clock.now();
        // An unrepresentable deadline would never end; skip the pause instead
        let Some(until) = now.checked_add(duration) else {
            warn!("Ignoring busy pause of {}s", duration.as_secs());
            return;
        };
        if state.paused_until.map_or(true, |current| until > current) {
            info!(
                "Scanning engine busy, pausing submissions for {}s",
                duration.as_secs()
            );
            state.paused_until = Some(until);
        }
    }
}
