use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a build. Transitions form a strict DAG; `deployed` and
/// `failed` are terminal and immutable (rollback creates a new build with
/// `parent_build_id` pointing at the old one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Queued,
    Planning,
    Executing,
    Building,
    Deploying,
    Deployed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Planning => "planning",
            BuildStatus::Executing => "executing",
            BuildStatus::Building => "building",
            BuildStatus::Deploying => "deploying",
            BuildStatus::Deployed => "deployed",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Deployed | BuildStatus::Failed)
    }

    pub fn can_transition(&self, to: BuildStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == BuildStatus::Failed {
            return true;
        }
        matches!(
            (self, to),
            (BuildStatus::Queued, BuildStatus::Planning)
                | (BuildStatus::Planning, BuildStatus::Executing)
                | (BuildStatus::Executing, BuildStatus::Building)
                | (BuildStatus::Building, BuildStatus::Deploying)
                | (BuildStatus::Deploying, BuildStatus::Deployed)
        )
    }

    /// Coarse progress of the build at the start of each phase; the
    /// executing share is refined by the task completion ratio.
    pub fn base_progress(&self) -> f32 {
        match self {
            BuildStatus::Queued => 0.0,
            BuildStatus::Planning => 0.1,
            BuildStatus::Executing => 0.2,
            BuildStatus::Building => 0.7,
            BuildStatus::Deploying => 0.9,
            BuildStatus::Deployed => 1.0,
            BuildStatus::Failed => 1.0,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BuildStatus::Queued),
            "planning" => Ok(BuildStatus::Planning),
            "executing" => Ok(BuildStatus::Executing),
            "building" => Ok(BuildStatus::Building),
            "deploying" => Ok(BuildStatus::Deploying),
            "deployed" => Ok(BuildStatus::Deployed),
            "failed" => Ok(BuildStatus::Failed),
            other => Err(format!("unknown build status '{}'", other)),
        }
    }
}

// One attempt to materialize a project from a prompt. Version metadata is
// co-located on this row and stays NULL until enrichment lands.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Build {
    pub id: Uuid,
    pub project_id: Uuid,
    pub owner_id: String,
    pub status: String,
    pub parent_build_id: Option<Uuid>,
    pub prompt: String,
    pub prompt_hash: String,
    pub error: Option<String>,
    pub artifact_url: Option<String>,
    pub checksum: Option<String>,
    pub output_size_bytes: Option<i64>,
    pub install_ms: Option<i64>,
    pub build_ms: Option<i64>,
    pub deploy_ms: Option<i64>,
    pub tasks_total: i32,
    pub tasks_done: i32,
    pub last_event_id: i64,
    pub codegen_session: Option<String>,
    pub version_number: Option<i32>,
    pub version_name: Option<String>,
    pub version_description: Option<String>,
    pub change_kind: Option<String>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    pub fn new(project_id: Uuid, owner_id: String, prompt: String, prompt_hash: String) -> Self {
        Self {
            // UUIDv7: time-sortable, so build ids order by creation
            id: Uuid::now_v7(),
            project_id,
            owner_id,
            status: BuildStatus::Queued.to_string(),
            parent_build_id: None,
            prompt,
            prompt_hash,
            error: None,
            artifact_url: None,
            checksum: None,
            output_size_bytes: None,
            install_ms: None,
            build_ms: None,
            deploy_ms: None,
            tasks_total: 0,
            tasks_done: 0,
            last_event_id: 0,
            codegen_session: None,
            version_number: None,
            version_name: None,
            version_description: None,
            change_kind: None,
            published: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn status(&self) -> Result<BuildStatus, String> {
        self.status.parse()
    }
}

impl Default for Build {
    fn default() -> Self {
        Build::new(Uuid::nil(), String::new(), String::new(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_legal() {
        let chain = [
            BuildStatus::Queued,
            BuildStatus::Planning,
            BuildStatus::Executing,
            BuildStatus::Building,
            BuildStatus::Deploying,
            BuildStatus::Deployed,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn skipping_phases_is_rejected() {
        assert!(!BuildStatus::Queued.can_transition(BuildStatus::Deployed));
        assert!(!BuildStatus::Queued.can_transition(BuildStatus::Executing));
        assert!(!BuildStatus::Planning.can_transition(BuildStatus::Building));
        assert!(!BuildStatus::Deploying.can_transition(BuildStatus::Planning));
    }

    #[test]
    fn any_non_terminal_state_can_fail() {
        for status in [
            BuildStatus::Queued,
            BuildStatus::Planning,
            BuildStatus::Executing,
            BuildStatus::Building,
            BuildStatus::Deploying,
        ] {
            assert!(status.can_transition(BuildStatus::Failed));
        }
    }

    #[test]
    fn terminal_states_are_immutable() {
        for status in [BuildStatus::Deployed, BuildStatus::Failed] {
            for to in [
                BuildStatus::Queued,
                BuildStatus::Planning,
                BuildStatus::Executing,
                BuildStatus::Building,
                BuildStatus::Deploying,
                BuildStatus::Deployed,
                BuildStatus::Failed,
            ] {
                assert!(!status.can_transition(to), "{} -> {}", status, to);
            }
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            BuildStatus::Queued,
            BuildStatus::Planning,
            BuildStatus::Executing,
            BuildStatus::Building,
            BuildStatus::Deploying,
            BuildStatus::Deployed,
            BuildStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<BuildStatus>().is_err());
    }
}
