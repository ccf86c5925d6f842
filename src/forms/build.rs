use crate::models::{self, BuildStatus};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBuildForm {
    #[serde(rename = "userId")]
    pub owner_id: String,
    #[serde(rename = "projectId")]
    pub project_id: Uuid,
    #[validate(min_length = 1)]
    #[validate(max_length = 20000)]
    pub prompt: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl EventsQuery {
    /// Resolves the effective lower bound. Supplying both bounds at once is
    /// ambiguous and rejected rather than silently combined.
    pub fn effective_since(&self) -> Result<i64, String> {
        if self.since.is_some() && self.until.is_some() {
            return Err("supply either 'since' or 'until', not both".to_string());
        }
        if let Some(since) = self.since {
            if since < 0 {
                return Err("'since' must be non-negative".to_string());
            }
            return Ok(since);
        }
        Ok(0)
    }
}

#[derive(Debug, Serialize, Default)]
pub struct EventsPage {
    pub events: Vec<models::Event>,
    /// Pass this back as `since` on the next poll.
    pub watermark: i64,
}

/// Derived status view: authoritative build status plus a coarse progress
/// share, never inferred from event payload contents.
#[derive(Debug, Serialize, Default)]
pub struct StatusView {
    pub status: String,
    pub progress: f32,
    pub finished: bool,
    pub artifact_url: Option<String>,
    pub error: Option<String>,
    pub version_number: Option<i32>,
    pub version_name: Option<String>,
}

impl StatusView {
    pub fn from_build(build: &models::Build) -> Result<Self, String> {
        let status = build.status()?;
        let progress = match status {
            BuildStatus::Executing if build.tasks_total > 0 => {
                let ratio = build.tasks_done as f32 / build.tasks_total as f32;
                0.2 + 0.5 * ratio.clamp(0.0, 1.0)
            }
            other => other.base_progress(),
        };

        Ok(Self {
            status: status.to_string(),
            progress,
            finished: status.is_terminal(),
            artifact_url: build.artifact_url.clone(),
            error: build.error.clone(),
            version_number: build.version_number,
            version_name: build.version_name.clone(),
        })
    }
}
