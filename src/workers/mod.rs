pub mod deploy;
pub mod plan;
pub mod recovery;
pub mod runner;
pub mod task;

use crate::configuration::Settings;
use crate::services::codegen::CodegenError;
use crate::services::deployer::DeployerError;
use crate::services::{CodegenClient, DeployClient};
use crate::{db, models};
use sqlx::PgPool;
use std::path::PathBuf;
use uuid::Uuid;

/// Failure taxonomy for phase execution. Transient errors go back to the
/// queue with backoff; deterministic ones dead-letter immediately; fatal
/// ones dead-letter and settle the build as failed.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("{0}")]
    Deterministic(String),
    #[error("fatal: {0}")]
    Fatal(String),
    /// The build turned terminal under our feet (operator cancel, watchdog).
    /// Not an error to report, just stop emitting progress.
    #[error("build is already terminal")]
    Aborted,
}

impl WorkerError {
    pub fn retryable(&self) -> bool {
        matches!(self, WorkerError::Transient(_))
    }

    pub fn settles_build(&self) -> bool {
        matches!(self, WorkerError::Fatal(_))
    }
}

impl From<String> for WorkerError {
    // db-layer errors are network/transaction failures: retry
    fn from(msg: String) -> Self {
        WorkerError::Transient(msg)
    }
}

impl From<CodegenError> for WorkerError {
    fn from(err: CodegenError) -> Self {
        match err {
            CodegenError::Timeout(_) => WorkerError::Transient(err.to_string()),
            CodegenError::Failed { .. } => WorkerError::Transient(err.to_string()),
            CodegenError::Spawn(_) => WorkerError::Fatal(err.to_string()),
            CodegenError::Malformed(_) => WorkerError::Deterministic(err.to_string()),
        }
    }
}

impl From<DeployerError> for WorkerError {
    fn from(err: DeployerError) -> Self {
        match err {
            DeployerError::Timeout(_) => WorkerError::Transient(err.to_string()),
            DeployerError::Failed { .. } => WorkerError::Transient(err.to_string()),
            DeployerError::Spawn(_) => WorkerError::Fatal(err.to_string()),
            DeployerError::Parse(_) => WorkerError::Deterministic(err.to_string()),
        }
    }
}

pub struct WorkerContext {
    pub pg_pool: PgPool,
    pub settings: Settings,
    pub codegen: CodegenClient,
    pub deployer: DeployClient,
}

impl WorkerContext {
    pub fn new(pg_pool: PgPool, settings: Settings) -> Self {
        let codegen = CodegenClient::new(&settings.codegen);
        let deployer = DeployClient::new(&settings.deployer);
        Self {
            pg_pool,
            settings,
            codegen,
            deployer,
        }
    }

    /// One workspace directory per project; the codegen tool and the deploy
    /// CLI both operate in it.
    pub fn workspace_dir(&self, project_id: Uuid) -> PathBuf {
        PathBuf::from(&self.settings.deployer.workspace_root).join(project_id.to_string())
    }
}

/// Cancellation checkpoint: workers call this after every subprocess
/// invocation and abort instead of emitting further progress for a build
/// someone already settled.
pub async fn ensure_build_active(
    pool: &PgPool,
    build_id: Uuid,
) -> Result<models::Build, WorkerError> {
    let build = db::build::fetch(pool, build_id)
        .await?
        .ok_or_else(|| WorkerError::Deterministic(format!("build {} not found", build_id)))?;

    let status = build.status().map_err(WorkerError::Deterministic)?;
    if status.is_terminal() {
        return Err(WorkerError::Aborted);
    }
    Ok(build)
}
