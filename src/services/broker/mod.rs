//! Persistence backends for the task queue.
//!
//! A broker keeps one record per job plus one ordered bucket per [`JobState`].
//! Claiming and state transitions are atomic inside the broker, so any number
//! of worker processes can share one store without client-side locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{JobId, JobRecord, JobState};
use crate::services::queue::{QueueError, QueueEvent};

pub mod memory;
pub mod redis_store;

pub use memory::MemoryBroker;
pub use redis_store::RedisBroker;

/// Priorities above this share the lowest tier so bucket scores stay exact.
pub(crate) const MAX_PRIORITY: i64 = 1 << 20;

#[async_trait]
pub trait BrokerStore: Send + Sync {
    /// Allocate a new unique job identifier.
    async fn next_job_id(&self) -> Result<JobId, QueueError>;

    /// Persist a new record into the bucket of its current state.
    async fn insert(&self, job: &JobRecord) -> Result<(), QueueError>;

    /// Promote delayed jobs that are due, then move the next waiting job to
    /// `active`. Reports both the promotions and the claimed job, if any.
    async fn claim(&self, now: DateTime<Utc>) -> Result<Claim, QueueError>;

    /// Store `job` and move it from the `from` bucket to the bucket of
    /// `job.state`. Returns `false` without writing anything when the stored
    /// state is no longer `from`.
    async fn transition(&self, job: &JobRecord, from: JobState) -> Result<bool, QueueError>;

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError>;

    /// Records in one bucket, in bucket order.
    async fn list(&self, state: JobState) -> Result<Vec<JobRecord>, QueueError>;

    async fn count(&self, state: JobState) -> Result<u64, QueueError>;

    /// Broadcast an event to out-of-process observers.
    async fn publish(&self, _event: &QueueEvent) -> Result<(), QueueError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError>;
}

/// Outcome of [`BrokerStore::claim`].
#[derive(Debug, Default)]
pub struct Claim {
    /// Delayed jobs moved back to `waiting`, in promotion order.
    pub promoted: Vec<JobId>,
    pub job: Option<JobRecord>,
}

/// Numeric insertion sequence of a broker-assigned id.
pub(crate) fn sequence(id: &JobId) -> i64 {
    id.as_str().parse().unwrap_or(0)
}

/// Ordering key of a job inside its state bucket.
///
/// Waiting jobs sort by priority, then insertion. Delayed jobs sort by due
/// time. Active and finished jobs sort by the time they entered the bucket.
pub(crate) fn bucket_score(job: &JobRecord) -> i64 {
    match job.state {
        JobState::Waiting => {
            let priority = i64::from(job.options.priority).min(MAX_PRIORITY);
            (priority << 32) + sequence(&job.id)
        }
        JobState::Delayed => job
            .delayed_until
            .unwrap_or(job.created_at)
            .timestamp_millis(),
        JobState::Active => job.processed_on.unwrap_or(job.created_at).timestamp_millis(),
        JobState::Completed | JobState::Failed => {
            job.finished_on.unwrap_or(job.created_at).timestamp_millis()
        }
    }
}

/// Total order inside a bucket: score, then insertion sequence for ties.
pub(crate) fn bucket_order(job: &JobRecord) -> (i64, i64) {
    (bucket_score(job), sequence(&job.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobOptions;
    use crate::models::task::{ImageReference, TaskPayload};

    fn job(id: &str, priority: u32) -> JobRecord {
        let payload = TaskPayload::new(ImageReference::Url {
            url: "https://example.com/a.png".to_string(),
        });
        let options = JobOptions {
            priority,
            ..JobOptions::default()
        };
        JobRecord::new(JobId::new(id), payload, options, Utc::now())
    }

    #[test]
    fn test_waiting_score_orders_priority_before_sequence() {
        assert!(bucket_score(&job("1", 0)) < bucket_score(&job("2", 0)));
        assert!(bucket_score(&job("9", 0)) < bucket_score(&job("2", 1)));
        assert!(bucket_score(&job("2", 1)) < bucket_score(&job("1", 2)));
    }

    #[test]
    fn test_same_millisecond_finishes_keep_insertion_order() {
        let finished = Utc::now();
        let mut records: Vec<JobRecord> = ["10", "9", "100"]
            .into_iter()
            .map(|id| {
                let mut job = job(id, 0);
                job.start(finished).unwrap();
                job.fail("boom", false, finished).unwrap();
                job
            })
            .collect();

        records.sort_by_key(bucket_order);
        let ids: Vec<&str> = records.iter().map(|job| job.id.as_str()).collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[test]
    fn test_sequence_of_non_numeric_id() {
        assert_eq!(sequence(&JobId::new("abc")), 0);
        assert_eq!(sequence(&JobId::new("42")), 42);
    }
}
