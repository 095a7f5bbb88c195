use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::models::classification::ClassificationResult;
use crate::models::job::{FailOutcome, JobRecord};
use crate::services::classifier::ClassificationAdapter;
use crate::services::queue::TaskQueue;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Maximum jobs processed at once.
    pub concurrency: usize,
    /// Sleep between claims when the queue is empty.
    pub poll_interval: Duration,
    /// Ceiling for a single job; also used to detect stalled jobs.
    pub job_timeout: Duration,
    /// How often active jobs are checked against `job_timeout`.
    pub stall_check_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(30 * 60),
            stall_check_interval: Duration::from_secs(60),
        }
    }
}

/// Claims jobs from a [`TaskQueue`] and runs them through the classifier.
pub struct Worker {
    queue: Arc<TaskQueue>,
    adapter: Arc<ClassificationAdapter>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(
        queue: Arc<TaskQueue>,
        adapter: Arc<ClassificationAdapter>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            queue,
            adapter,
            options,
        }
    }

    /// Process jobs until `shutdown` resolves, then wait for in-flight jobs.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let concurrency = self.options.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();
        let mut last_stall_check = Instant::now();

        tracing::info!(
            queue = self.queue.name(),
            concurrency,
            "Worker ready, starting job processing loop"
        );

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Job task panicked");
                }
            }

            if last_stall_check.elapsed() >= self.options.stall_check_interval {
                last_stall_check = Instant::now();
                match self.queue.fail_stalled(self.options.job_timeout).await {
                    Ok(0) => {}
                    Ok(count) => tracing::warn!(count, "Failed stalled jobs"),
                    Err(e) => tracing::error!(error = %e, "Stalled job check failed"),
                }
            }

            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.claim().await {
                Ok(Some(job)) => {
                    let queue = Arc::clone(&self.queue);
                    let adapter = Arc::clone(&self.adapter);
                    let timeout = self.options.job_timeout;
                    in_flight.spawn(async move {
                        process_job(&queue, &adapter, job, timeout).await;
                        drop(permit);
                    });
                    // Go straight for the next job.
                    continue;
                }
                Ok(None) => {
                    tracing::trace!("No jobs available, sleeping");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim job, will retry");
                }
            }

            drop(permit);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.options.poll_interval) => {}
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Shutting down, draining in-flight jobs");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task panicked");
            }
        }
        tracing::info!("Worker stopped");
    }
}

/// Run one claimed job and report the outcome to the queue.
pub async fn process_job(
    queue: &TaskQueue,
    adapter: &ClassificationAdapter,
    job: JobRecord,
    timeout: Duration,
) {
    let attempt = job.attempts_made + 1;
    tracing::info!(
        job_id = %job.id,
        attempt,
        max_attempts = job.max_attempts(),
        image = job.payload.image.kind(),
        "Processing food validation job"
    );

    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, adapter.classify(&job.payload)).await;
    let elapsed = start.elapsed();
    metrics::histogram!("food_validation_processing_seconds").record(elapsed.as_secs_f64());

    let reported = match outcome {
        Ok(Ok(result)) => report_success(queue, &job, result, elapsed).await,
        Ok(Err(e)) => report_failure(queue, &job, &e.to_string(), e.is_retryable()).await,
        Err(_) => {
            let reason = format!("job timed out after {}s", timeout.as_secs());
            report_failure(queue, &job, &reason, false).await
        }
    };

    if let Err(e) = reported {
        tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
    }
}

async fn report_success(
    queue: &TaskQueue,
    job: &JobRecord,
    result: ClassificationResult,
    elapsed: Duration,
) -> Result<(), crate::services::queue::QueueError> {
    let updated = queue.complete(job, result).await?;
    metrics::counter!("food_validation_jobs_completed").increment(1);

    if let Some(result) = &updated.result {
        tracing::info!(
            job_id = %updated.id,
            duration_ms = elapsed.as_millis() as u64,
            food = %result.food_name,
            vegetarian = %result.is_vegetarian,
            jain = %result.is_jain_compliant,
            vegan = %result.is_vegan_compliant,
            "Job completed successfully"
        );
    }
    Ok(())
}

async fn report_failure(
    queue: &TaskQueue,
    job: &JobRecord,
    reason: &str,
    retryable: bool,
) -> Result<(), crate::services::queue::QueueError> {
    tracing::error!(job_id = %job.id, error = %reason, retryable, "Job processing failed");

    let (updated, outcome) = queue.fail(job, reason, retryable).await?;
    match outcome {
        FailOutcome::Retry { delay } => {
            metrics::counter!("food_validation_jobs_retried").increment(1);
            tracing::info!(
                job_id = %updated.id,
                attempts_made = updated.attempts_made,
                delay_ms = delay.as_millis() as u64,
                "Job re-queued for retry"
            );
        }
        FailOutcome::Failed => {
            metrics::counter!("food_validation_jobs_failed").increment(1);
            tracing::warn!(
                job_id = %updated.id,
                attempts_made = updated.attempts_made,
                "Job failed permanently"
            );
        }
    }
    Ok(())
}
