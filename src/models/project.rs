use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    // resumable session token of the code-generation tool, reused across
    // builds to preserve context
    pub codegen_session: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(id: Uuid, owner_id: String, name: String) -> Self {
        Self {
            id,
            owner_id,
            name,
            codegen_session: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl Default for Project {
    fn default() -> Self {
        Project::new(Uuid::nil(), String::new(), String::new())
    }
}
