use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const QUEUE_PLAN: &str = "plan";
pub const QUEUE_TASK: &str = "task";
pub const QUEUE_DEPLOY: &str = "deploy";
pub const QUEUE_RECOVERY: &str = "recovery";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Leased,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "leased" => Ok(JobStatus::Leased),
            "done" => Ok(JobStatus::Done),
            "dead" => Ok(JobStatus::Dead),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A unit of queued work. The lease (time-boxed exclusive claim) is the only
/// thing preventing two workers from running the same job; an expired lease
/// puts the job back into rotation.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    pub build_id: Uuid,
    pub payload: Value,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_after: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: &str, build_id: Uuid, payload: Value, max_attempts: i32) -> Self {
        Self {
            id: Uuid::now_v7(),
            queue: queue.to_string(),
            build_id,
            payload,
            status: JobStatus::Pending.to_string(),
            attempts: 0,
            max_attempts,
            run_after: Utc::now(),
            lease_expires_at: None,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for Job {
    fn default() -> Self {
        Job::new("", Uuid::nil(), Value::Null, 0)
    }
}
