use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::sync::broadcast;

use crate::models::api::QueueCounts;
use crate::models::classification::ClassificationResult;
use crate::models::job::{FailOutcome, JobId, JobOptions, JobRecord, JobState, TransitionError};
use crate::models::task::TaskPayload;
use crate::services::broker::BrokerStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle notification emitted on every state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Waiting { job_id: JobId },
    Delayed { job_id: JobId, delay_ms: u64 },
    Active { job_id: JobId, attempt: u32 },
    Completed { job_id: JobId, attempts_made: u32 },
    Retrying {
        job_id: JobId,
        attempts_made: u32,
        delay_ms: u64,
        reason: String,
    },
    Failed {
        job_id: JobId,
        attempts_made: u32,
        reason: String,
    },
}

/// Named job queue on top of a [`BrokerStore`].
///
/// The queue owns the retry policy: every transition is computed on a
/// [`JobRecord`] first and then written with a compare-and-move, so a job
/// reaches exactly one terminal state even with several workers.
pub struct TaskQueue {
    name: String,
    broker: Arc<dyn BrokerStore>,
    defaults: JobOptions,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, broker: Arc<dyn BrokerStore>, defaults: JobOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            broker,
            defaults,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observe lifecycle events emitted by this queue instance.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Add a task. Returns as soon as the record is persisted.
    pub async fn enqueue(
        &self,
        payload: TaskPayload,
        options: Option<JobOptions>,
    ) -> Result<JobId, QueueError> {
        let options = options.unwrap_or(self.defaults);
        let id = self.broker.next_job_id().await?;
        let job = JobRecord::new(id.clone(), payload, options, Utc::now());
        self.broker.insert(&job).await?;

        tracing::info!(
            queue = %self.name,
            job_id = %id,
            state = %job.state,
            image = job.payload.image.kind(),
            "Job enqueued"
        );
        let event = match job.state {
            JobState::Delayed => QueueEvent::Delayed {
                job_id: id.clone(),
                delay_ms: job
                    .delayed_until
                    .map(|until| (until - job.created_at).num_milliseconds().max(0) as u64)
                    .unwrap_or_default(),
            },
            _ => QueueEvent::Waiting { job_id: id.clone() },
        };
        self.emit(event).await;
        Ok(id)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        self.broker.get(id).await
    }

    pub async fn list_by_state(&self, state: JobState) -> Result<Vec<JobRecord>, QueueError> {
        self.broker.list(state).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let mut counts = QueueCounts::default();
        for state in JobState::iter() {
            counts.set(state, self.broker.count(state).await?);
        }
        Ok(counts)
    }

    /// Claim the next runnable job, promoting delayed jobs that are due.
    pub async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let claim = self.broker.claim(Utc::now()).await?;
        for job_id in claim.promoted {
            self.emit(QueueEvent::Waiting { job_id }).await;
        }
        let Some(job) = claim.job else {
            return Ok(None);
        };

        self.emit(QueueEvent::Active {
            job_id: job.id.clone(),
            attempt: job.attempts_made + 1,
        })
        .await;
        Ok(Some(job))
    }

    /// Store the result of an active job.
    pub async fn complete(
        &self,
        job: &JobRecord,
        result: ClassificationResult,
    ) -> Result<JobRecord, QueueError> {
        let mut updated = job.clone();
        updated.complete(result, Utc::now())?;
        self.commit(&updated, job.state).await?;

        self.emit(QueueEvent::Completed {
            job_id: updated.id.clone(),
            attempts_made: updated.attempts_made,
        })
        .await;
        Ok(updated)
    }

    /// Record a failed attempt. Retryable failures go back to the queue with
    /// backoff until attempts are exhausted.
    pub async fn fail(
        &self,
        job: &JobRecord,
        reason: &str,
        retryable: bool,
    ) -> Result<(JobRecord, FailOutcome), QueueError> {
        let mut updated = job.clone();
        let outcome = updated.fail(reason, retryable, Utc::now())?;
        self.commit(&updated, job.state).await?;

        let event = match outcome {
            FailOutcome::Retry { delay } => QueueEvent::Retrying {
                job_id: updated.id.clone(),
                attempts_made: updated.attempts_made,
                delay_ms: delay.as_millis() as u64,
                reason: reason.to_string(),
            },
            FailOutcome::Failed => QueueEvent::Failed {
                job_id: updated.id.clone(),
                attempts_made: updated.attempts_made,
                reason: reason.to_string(),
            },
        };
        self.emit(event).await;
        Ok((updated, outcome))
    }

    /// Fail active jobs that have been running longer than `ceiling`.
    ///
    /// Catches jobs whose worker died mid-flight. Returns how many were failed.
    pub async fn fail_stalled(&self, ceiling: Duration) -> Result<usize, QueueError> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(ceiling.as_millis() as i64);
        let mut failed = 0;

        for job in self.broker.list(JobState::Active).await? {
            let started = job.processed_on.unwrap_or(job.created_at);
            if started > cutoff {
                continue;
            }

            let reason = format!("job timed out after {}s", ceiling.as_secs());
            match self.fail(&job, &reason, false).await {
                Ok(_) => failed += 1,
                // Finished by its worker between the listing and now.
                Err(QueueError::StaleState { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(failed)
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        self.broker.ping().await
    }

    /// Log every lifecycle event of this queue instance until it is dropped.
    pub fn spawn_event_log(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.subscribe();
        let queue = self.name.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&queue, &event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(queue = %queue, skipped, "Event log lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn commit(&self, job: &JobRecord, from: JobState) -> Result<(), QueueError> {
        if self.broker.transition(job, from).await? {
            Ok(())
        } else {
            Err(QueueError::StaleState {
                id: job.id.clone(),
                expected: from,
            })
        }
    }

    async fn emit(&self, event: QueueEvent) {
        if let Err(e) = self.broker.publish(&event).await {
            tracing::warn!(queue = %self.name, error = %e, "Failed to publish queue event");
        }
        // No receivers is fine: events are informational.
        let _ = self.events.send(event);
    }
}

fn log_event(queue: &str, event: &QueueEvent) {
    match event {
        QueueEvent::Waiting { job_id } => {
            tracing::debug!(queue, job_id = %job_id, "Job waiting");
        }
        QueueEvent::Delayed { job_id, delay_ms } => {
            tracing::debug!(queue, job_id = %job_id, delay_ms, "Job delayed");
        }
        QueueEvent::Active { job_id, attempt } => {
            tracing::debug!(queue, job_id = %job_id, attempt, "Job active");
        }
        QueueEvent::Completed {
            job_id,
            attempts_made,
        } => {
            tracing::info!(queue, job_id = %job_id, attempts_made, "Job completed");
        }
        QueueEvent::Retrying {
            job_id,
            attempts_made,
            delay_ms,
            reason,
        } => {
            tracing::info!(queue, job_id = %job_id, attempts_made, delay_ms, reason = %reason, "Job retrying");
        }
        QueueEvent::Failed {
            job_id,
            attempts_made,
            reason,
        } => {
            tracing::warn!(queue, job_id = %job_id, attempts_made, reason = %reason, "Job failed");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: JobId, reason: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Job {id} is no longer {expected}")]
    StaleState { id: JobId, expected: JobState },
}
