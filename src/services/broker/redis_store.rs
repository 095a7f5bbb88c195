use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo, Script};
use std::collections::HashMap;

use super::{bucket_order, bucket_score, BrokerStore, Claim, MAX_PRIORITY};
use crate::models::job::{JobId, JobRecord, JobState};
use crate::services::queue::{QueueError, QueueEvent};

const KEY_PREFIX: &str = "food_validator";

/// Redis-backed broker.
///
/// Layout under `food_validator:<queue>:`
/// - `id`: counter used for job ids
/// - `job:<id>`: hash with one field per record attribute
/// - `waiting`, `active`, `completed`, `failed`, `delayed`: sorted sets of ids
/// - `events`: pub/sub channel carrying [`QueueEvent`] JSON
pub struct RedisBroker {
    conn: ConnectionManager,
    prefix: String,
    claim_script: Script,
    transition_script: Script,
}

impl RedisBroker {
    pub async fn connect(
        info: impl IntoConnectionInfo,
        queue_name: &str,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(info)?;
        let conn = client.get_connection_manager().await?;

        Ok(Self {
            conn,
            prefix: format!("{KEY_PREFIX}:{queue_name}"),
            claim_script: Script::new(include_str!("scripts/claim.lua")),
            transition_script: Script::new(include_str!("scripts/transition.lua")),
        })
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn bucket_key(&self, state: JobState) -> String {
        format!("{}:{}", self.prefix, state)
    }

    fn id_key(&self) -> String {
        format!("{}:id", self.prefix)
    }

    fn events_channel(&self) -> String {
        format!("{}:events", self.prefix)
    }
}

#[async_trait]
impl BrokerStore for RedisBroker {
    async fn next_job_id(&self) -> Result<JobId, QueueError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(self.id_key(), 1).await?;
        Ok(JobId::new(id.to_string()))
    }

    async fn insert(&self, job: &JobRecord) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let fields = to_fields(job)?;

        redis::pipe()
            .atomic()
            .hset_multiple(self.job_key(&job.id), fields.as_slice())
            .zadd(self.bucket_key(job.state), job.id.as_str(), bucket_score(job))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn claim(&self, now: DateTime<Utc>) -> Result<Claim, QueueError> {
        let mut conn = self.conn.clone();
        let (promoted, flat): (Vec<String>, Vec<String>) = self
            .claim_script
            .key(self.bucket_key(JobState::Waiting))
            .key(self.bucket_key(JobState::Delayed))
            .key(self.bucket_key(JobState::Active))
            .arg(now.timestamp_millis())
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        let promoted = promoted.into_iter().map(JobId::new).collect();
        if flat.is_empty() {
            return Ok(Claim { promoted, job: None });
        }

        let fields = pairs(flat);
        let id = fields
            .get("id")
            .map(|id| JobId::new(id.clone()))
            .ok_or_else(|| QueueError::CorruptRecord {
                id: JobId::new("?"),
                reason: "claimed hash has no id".to_string(),
            })?;
        Ok(Claim {
            promoted,
            job: Some(from_fields(id, fields)?),
        })
    }

    async fn transition(&self, job: &JobRecord, from: JobState) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let fields = to_fields(job)?;

        let mut invocation = self.transition_script.prepare_invoke();
        invocation
            .key(self.job_key(&job.id))
            .key(self.bucket_key(from))
            .key(self.bucket_key(job.state))
            .arg(job.id.as_str())
            .arg(from.as_ref())
            .arg(bucket_score(job));
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let moved: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(moved == 1)
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        from_fields(id.clone(), fields).map(Some)
    }

    async fn list(&self, state: JobState) -> Result<Vec<JobRecord>, QueueError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrange(self.bucket_key(state), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(format!("{}{}", self.job_key_prefix(), id));
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut records = ids
            .into_iter()
            .zip(hashes)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| from_fields(JobId::new(id), fields))
            .collect::<Result<Vec<_>, _>>()?;
        // ZRANGE breaks score ties by member bytes, so "10" sorts before "9".
        records.sort_by_key(bucket_order);
        Ok(records)
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(self.bucket_key(state)).await?;
        Ok(count)
    }

    async fn publish(&self, event: &QueueEvent) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(event)?;
        conn.publish::<_, _, ()>(self.events_channel(), payload)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

fn pairs(flat: Vec<String>) -> HashMap<String, String> {
    let mut fields = HashMap::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(field, value);
    }
    fields
}

fn to_fields(job: &JobRecord) -> Result<Vec<(&'static str, String)>, QueueError> {
    let priority = i64::from(job.options.priority).min(MAX_PRIORITY);
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("state", job.state.to_string()),
        ("payload", serde_json::to_string(&job.payload)?),
        ("opts", serde_json::to_string(&job.options)?),
        ("priority", priority.to_string()),
        ("attempts_made", job.attempts_made.to_string()),
        ("created_at", job.created_at.timestamp_millis().to_string()),
    ];

    let timestamps = [
        ("processed_on", job.processed_on),
        ("finished_on", job.finished_on),
        ("delayed_until", job.delayed_until),
    ];
    for (field, value) in timestamps {
        if let Some(at) = value {
            fields.push((field, at.timestamp_millis().to_string()));
        }
    }
    if let Some(result) = &job.result {
        fields.push(("result", serde_json::to_string(result)?));
    }
    if let Some(reason) = &job.failed_reason {
        fields.push(("failed_reason", reason.clone()));
    }
    Ok(fields)
}

fn from_fields(id: JobId, mut fields: HashMap<String, String>) -> Result<JobRecord, QueueError> {
    let corrupt = |reason: String| QueueError::CorruptRecord {
        id: id.clone(),
        reason,
    };

    let required = |fields: &mut HashMap<String, String>, name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| corrupt(format!("missing field {name}")))
    };

    let state = required(&mut fields, "state")?;
    let state: JobState = state
        .parse()
        .map_err(|_| corrupt(format!("unknown state {state:?}")))?;
    let payload = serde_json::from_str(&required(&mut fields, "payload")?)?;
    let options = serde_json::from_str(&required(&mut fields, "opts")?)?;
    let attempts_made = required(&mut fields, "attempts_made")?
        .parse()
        .map_err(|e| corrupt(format!("attempts_made: {e}")))?;
    let created_at = parse_millis(&required(&mut fields, "created_at")?)
        .ok_or_else(|| corrupt("created_at is not a timestamp".to_string()))?;

    let optional_time = |fields: &HashMap<String, String>, name: &str| {
        fields.get(name).and_then(|value| parse_millis(value))
    };
    let processed_on = optional_time(&fields, "processed_on");
    let finished_on = optional_time(&fields, "finished_on");
    let delayed_until = optional_time(&fields, "delayed_until");

    let result = match fields.remove("result") {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(JobRecord {
        id,
        payload,
        state,
        options,
        attempts_made,
        created_at,
        processed_on,
        finished_on,
        delayed_until,
        result,
        failed_reason: fields.remove("failed_reason"),
    })
}

fn parse_millis(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
