use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::Deserialize;
use std::time::Duration;

use crate::models::job::{Backoff, JobOptions};
use crate::services::vision::ModelSettings;
use crate::services::worker::WorkerOptions;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default)]
    pub redis_password: Option<String>,

    #[serde(default)]
    pub redis_db: i64,

    /// Queue name; also namespaces the broker keys.
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Attempts per job, including the first.
    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,

    /// Base delay of the exponential retry backoff.
    #[serde(default = "default_job_backoff_ms")]
    pub job_backoff_ms: u64,

    /// Ceiling for one job before it counts as failed.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Credential for the vision model API. Required by the worker only.
    #[serde(default)]
    pub anthropic_api_key: Option<String>,

    #[serde(default = "default_model_name")]
    pub model_name: String,

    #[serde(default = "default_model_api_url")]
    pub model_api_url: String,

    #[serde(default = "default_model_max_tokens")]
    pub model_max_tokens: u32,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    #[serde(default = "default_system_prompt_path")]
    pub system_prompt_path: String,

    /// Optional Prometheus listener for the worker (e.g., "0.0.0.0:9091").
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_queue_name() -> String {
    "food-validation".to_string()
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_job_attempts() -> u32 {
    3
}

fn default_job_backoff_ms() -> u64 {
    2000
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_model_name() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_model_api_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model_max_tokens() -> u32 {
    1024
}

fn default_model_timeout_secs() -> u64 {
    120
}

fn default_system_prompt_path() -> String {
    "prompts/system_prompt.txt".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn redis_connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.redis_host.clone(), self.redis_port),
            redis: RedisConnectionInfo {
                db: self.redis_db,
                password: self.redis_password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.job_attempts.max(1),
            backoff: Backoff::exponential(Duration::from_millis(self.job_backoff_ms)),
            ..JobOptions::default()
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            concurrency: self.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            ..WorkerOptions::default()
        }
    }

    /// Model client settings. Fails when no API key is configured.
    pub fn model_settings(&self) -> Result<ModelSettings, ConfigError> {
        let api_key = self
            .anthropic_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("ANTHROPIC_API_KEY"))?;

        Ok(ModelSettings {
            api_url: self.model_api_url.clone(),
            api_key,
            model: self.model_name.clone(),
            max_tokens: self.model_max_tokens,
            timeout: Duration::from_secs(self.model_timeout_secs),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}
