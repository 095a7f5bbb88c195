use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::models::classification::ClassificationResult;
use crate::models::task::TaskPayload;

/// Retry delays are capped so a long exponential chain cannot overflow timestamps.
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Broker-assigned job identifier. Opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a job.
///
/// Transitions:
/// - waiting -> active
/// - delayed -> waiting
/// - active -> completed | failed
/// - active -> delayed (retry after backoff) | waiting (retry without backoff)
///
/// `completed` and `failed` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Waiting, Active)
                | (Delayed, Waiting)
                | (Active, Completed)
                | (Active, Failed)
                | (Active, Delayed)
                | (Active, Waiting)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay policy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub delay_ms: u64,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: base.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempt.saturating_sub(1).min(32);
                self.delay_ms.saturating_mul(1u64 << exponent)
            }
        };
        Duration::from_millis(ms).min(MAX_BACKOFF)
    }
}

/// Per-job enqueue options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Lower values are served first. Equal priorities are served in insertion order.
    pub priority: u32,
    /// Initial delay before the job becomes claimable.
    pub delay_ms: u64,
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay_ms: 0,
            attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(2)),
        }
    }
}

/// What happened after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Job goes back to the queue after `delay`.
    Retry { delay: Duration },
    /// Attempts exhausted or failure not retryable.
    Failed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid transition for job {job_id}: {from} -> {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: JobState,
    pub to: JobState,
}

/// The queue's bookkeeping entry for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: TaskPayload,
    pub state: JobState,
    pub options: JobOptions,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    pub processed_on: Option<DateTime<Utc>>,
    pub finished_on: Option<DateTime<Utc>>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub result: Option<ClassificationResult>,
    pub failed_reason: Option<String>,
}

impl JobRecord {
    /// A fresh record: `waiting`, or `delayed` when the options ask for an initial delay.
    pub fn new(id: JobId, payload: TaskPayload, options: JobOptions, now: DateTime<Utc>) -> Self {
        let (state, delayed_until) = if options.delay_ms > 0 {
            let delay = Duration::from_millis(options.delay_ms).min(MAX_BACKOFF);
            (JobState::Delayed, Some(now + to_chrono(delay)))
        } else {
            (JobState::Waiting, None)
        };

        Self {
            id,
            payload,
            state,
            options,
            attempts_made: 0,
            created_at: now,
            processed_on: None,
            finished_on: None,
            delayed_until,
            result: None,
            failed_reason: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.options.attempts.max(1)
    }

    fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// A worker claimed the job.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobState::Active)?;
        self.processed_on = Some(now);
        Ok(())
    }

    /// A delayed job's due time passed.
    pub fn promote(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Waiting)
    }

    pub fn complete(
        &mut self,
        result: ClassificationResult,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(JobState::Completed)?;
        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts());
        self.result = Some(result);
        self.finished_on = Some(now);
        Ok(())
    }

    /// Record a failed attempt and decide between retry and permanent failure.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome, TransitionError> {
        if self.state != JobState::Active {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to: JobState::Failed,
            });
        }

        self.attempts_made = (self.attempts_made + 1).min(self.max_attempts());
        self.failed_reason = Some(reason.into());

        if retryable && self.attempts_made < self.max_attempts() {
            let delay = self.options.backoff.delay_for(self.attempts_made);
            if delay.is_zero() {
                self.transition(JobState::Waiting)?;
                self.delayed_until = None;
            } else {
                self.transition(JobState::Delayed)?;
                self.delayed_until = Some(now + to_chrono(delay));
            }
            return Ok(FailOutcome::Retry { delay });
        }

        self.transition(JobState::Failed)?;
        self.finished_on = Some(now);
        Ok(FailOutcome::Failed)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}
