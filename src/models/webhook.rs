use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registered external endpoint. Delivery progress lives in per-build
/// cursors (`webhook_cursor`): one last-acknowledged event id per build,
/// advanced only on a 2xx from the receiver, so replay after a failed run
/// resumes from the right point and a still-active older build never
/// falls behind a newer one.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub owner_id: String,
    pub project_id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn new(owner_id: String, project_id: Uuid, url: String, secret: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id,
            project_id,
            url,
            secret,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for WebhookSubscription {
    fn default() -> Self {
        WebhookSubscription::new(String::new(), Uuid::nil(), String::new(), String::new())
    }
}

/// One delivery attempt, kept for replay decisions and SLA reporting.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub build_id: Uuid,
    pub event_id: i64,
    pub attempt: i32,
    pub status_code: Option<i32>,
    pub ok: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
