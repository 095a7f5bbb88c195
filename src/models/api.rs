use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::classification::ClassificationResult;
use crate::models::job::{JobId, JobRecord, JobState};

/// Optional text hints sent alongside the image.
#[derive(Debug, Default, Validate)]
pub struct FoodHints {
    #[garde(length(min = 1, max = 200))]
    pub food_name: Option<String>,

    #[garde(length(min = 1, max = 2000))]
    pub ingredients: Option<String>,
}

/// Response after submitting a food image.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: JobId,
    pub status_endpoint: String,
    pub message: String,
}

/// Response for polling a task.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: JobId,
    pub status: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<JobRecord> for TaskStatusResponse {
    fn from(job: JobRecord) -> Self {
        let max_attempts = job.max_attempts();
        // Intermediate failure reasons stay internal until the job gives up.
        let error = match job.state {
            JobState::Failed => job.failed_reason,
            _ => None,
        };

        Self {
            task_id: job.id,
            status: job.state,
            attempts_made: job.attempts_made,
            max_attempts,
            created_at: job.created_at,
            finished_at: job.finished_on,
            result: job.result,
            error,
        }
    }
}

/// Job counts per state.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl QueueCounts {
    pub fn set(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Waiting => self.waiting = count,
            JobState::Active => self.active = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Delayed => self.delayed = count,
        }
    }

    /// Jobs not yet finished.
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}

/// Response for the queue introspection endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatusResponse {
    pub queue: String,
    #[serde(flatten)]
    pub counts: QueueCounts,
}
