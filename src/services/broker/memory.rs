use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{bucket_order, BrokerStore, Claim};
use crate::models::job::{JobId, JobRecord, JobState};
use crate::services::queue::QueueError;

/// In-process broker with the same semantics as [`super::RedisBroker`].
///
/// Nothing survives a restart. Used by tests and single-process setups.
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

type BucketKey = (i64, i64);

#[derive(Default)]
struct Inner {
    next_id: u64,
    jobs: HashMap<JobId, JobRecord>,
    buckets: HashMap<JobState, BTreeMap<BucketKey, JobId>>,
    positions: HashMap<JobId, BucketKey>,
}

impl Inner {
    /// Store the record and index it under its current state.
    fn place(&mut self, job: JobRecord) {
        let key = bucket_order(&job);
        self.buckets
            .entry(job.state)
            .or_default()
            .insert(key, job.id.clone());
        self.positions.insert(job.id.clone(), key);
        self.jobs.insert(job.id.clone(), job);
    }

    fn unindex(&mut self, state: JobState, id: &JobId) {
        if let Some(key) = self.positions.remove(id) {
            if let Some(bucket) = self.buckets.get_mut(&state) {
                bucket.remove(&key);
            }
        }
    }

    fn promote_due(&mut self, now: DateTime<Utc>) -> Result<Vec<JobId>, QueueError> {
        let now_ms = now.timestamp_millis();
        let due: Vec<JobId> = self
            .buckets
            .get(&JobState::Delayed)
            .map(|bucket| {
                bucket
                    .iter()
                    .take_while(|((score, _), _)| *score <= now_ms)
                    .map(|(_, id)| id.clone())
                    .collect()
            })
            .unwrap_or_default();

        let mut promoted = Vec::with_capacity(due.len());
        for id in due {
            let Some(mut job) = self.jobs.get(&id).cloned() else {
                continue;
            };
            job.promote()?;
            self.unindex(JobState::Delayed, &id);
            self.place(job);
            promoted.push(id);
        }
        Ok(promoted)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrokerStore for MemoryBroker {
    async fn next_job_id(&self) -> Result<JobId, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        Ok(JobId::new(inner.next_id.to_string()))
    }

    async fn insert(&self, job: &JobRecord) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner.place(job.clone());
        Ok(())
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<Claim, QueueError> {
        let mut inner = self.inner.lock().await;
        let promoted = inner.promote_due(now)?;

        let next = inner
            .buckets
            .get(&JobState::Waiting)
            .and_then(|bucket| bucket.values().next().cloned());
        let Some(id) = next else {
            return Ok(Claim { promoted, job: None });
        };
        let Some(mut job) = inner.jobs.get(&id).cloned() else {
            inner.unindex(JobState::Waiting, &id);
            return Ok(Claim { promoted, job: None });
        };

        job.start(now)?;
        inner.unindex(JobState::Waiting, &id);
        inner.place(job.clone());
        Ok(Claim {
            promoted,
            job: Some(job),
        })
    }

    async fn transition(&self, job: &JobRecord, from: JobState) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get(&job.id) {
            Some(stored) if stored.state == from => {}
            _ => return Ok(false),
        }

        inner.unindex(from, &job.id);
        inner.place(job.clone());
        Ok(true)
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).cloned())
    }

    async fn list(&self, state: JobState) -> Result<Vec<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        let jobs = inner
            .buckets
            .get(&state)
            .map(|bucket| {
                bucket
                    .values()
                    .filter_map(|id| inner.jobs.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(jobs)
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.buckets.get(&state).map_or(0, |b| b.len() as u64))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobOptions;
    use crate::models::task::{ImageReference, TaskPayload};

    async fn insert(broker: &MemoryBroker, options: JobOptions) -> JobId {
        let id = broker.next_job_id().await.unwrap();
        let payload = TaskPayload::new(ImageReference::Base64 {
            data: "aGVsbG8=".to_string(),
        });
        let job = JobRecord::new(id.clone(), payload, options, Utc::now());
        broker.insert(&job).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_claim_moves_job_to_active() {
        let broker = MemoryBroker::new();
        let id = insert(&broker, JobOptions::default()).await;

        let claimed = broker.claim(Utc::now()).await.unwrap().job.unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.state, JobState::Active);
        assert!(claimed.processed_on.is_some());
        assert_eq!(broker.count(JobState::Waiting).await.unwrap(), 0);
        assert_eq!(broker.count(JobState::Active).await.unwrap(), 1);

        assert!(broker.claim(Utc::now()).await.unwrap().job.is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_priority() {
        let broker = MemoryBroker::new();
        let low = insert(
            &broker,
            JobOptions {
                priority: 5,
                ..JobOptions::default()
            },
        )
        .await;
        let high = insert(&broker, JobOptions::default()).await;

        assert_eq!(broker.claim(Utc::now()).await.unwrap().job.unwrap().id, high);
        assert_eq!(broker.claim(Utc::now()).await.unwrap().job.unwrap().id, low);
    }

    #[tokio::test]
    async fn test_delayed_job_promoted_when_due() {
        let broker = MemoryBroker::new();
        let id = insert(
            &broker,
            JobOptions {
                delay_ms: 60_000,
                ..JobOptions::default()
            },
        )
        .await;

        assert!(broker.claim(Utc::now()).await.unwrap().job.is_none());

        let later = Utc::now() + chrono::Duration::minutes(2);
        let claim = broker.claim(later).await.unwrap();
        assert_eq!(claim.promoted, vec![id.clone()]);
        assert_eq!(claim.job.unwrap().id, id);
    }

    #[tokio::test]
    async fn test_list_breaks_score_ties_by_sequence() {
        let broker = MemoryBroker::new();
        let finished = Utc::now();
        for _ in 0..10 {
            insert(&broker, JobOptions::default()).await;
        }

        // Finish job 10 first, then job 9, in the same millisecond.
        let mut claimed = Vec::new();
        while let Some(job) = broker.claim(finished).await.unwrap().job {
            claimed.push(job);
        }
        for mut job in claimed.into_iter().rev() {
            job.fail("boom", false, finished).unwrap();
            assert!(broker.transition(&job, JobState::Active).await.unwrap());
        }

        let ids: Vec<String> = broker
            .list(JobState::Failed)
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.id.to_string())
            .collect();
        let expected: Vec<String> = (1..=10).map(|n| n.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_transition_rejects_stale_state() {
        let broker = MemoryBroker::new();
        insert(&broker, JobOptions::default()).await;
        let mut job = broker.claim(Utc::now()).await.unwrap().job.unwrap();

        job.fail("boom", false, Utc::now()).unwrap();
        assert!(broker.transition(&job, JobState::Active).await.unwrap());
        // A second writer still believing the job is active loses.
        assert!(!broker.transition(&job, JobState::Active).await.unwrap());
        assert_eq!(broker.count(JobState::Failed).await.unwrap(), 1);
    }
}
