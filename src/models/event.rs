use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Failed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "started",
            EventKind::Progress => "progress",
            EventKind::Completed => "completed",
            EventKind::Failed => "failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queue,
    Plan,
    Task,
    Build,
    Deploy,
    Recovery,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Queue => "queue",
            Phase::Plan => "plan",
            Phase::Task => "task",
            Phase::Build => "build",
            Phase::Deploy => "deploy",
            Phase::Recovery => "recovery",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable fact about a build's progress. `event_id` is monotone and
/// gap-free within a build; a NULL `owner_id` makes the event visible to
/// every viewer of the build.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Event {
    pub build_id: Uuid,
    pub event_id: i64,
    pub owner_id: Option<String>,
    pub phase: String,
    pub kind: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            build_id: Uuid::nil(),
            event_id: 0,
            owner_id: None,
            phase: Phase::Queue.to_string(),
            kind: EventKind::Started.to_string(),
            payload: Value::Null,
            created_at: Utc::now(),
        }
    }
}
