use crate::models::{self, BuildStatus, EventKind, Phase, QUEUE_DEPLOY};
use crate::workers::{ensure_build_active, runner, WorkerContext, WorkerError};
use crate::{db, queue};
use serde_json::json;

/// Error-recovery phase: one scoped remediation attempt for a dead deploy
/// job — wipe the dependency tree and reinstall from scratch, then re-queue
/// the deploy once. A build that arrives here marked `recovered` already had
/// its chance and is settled as failed.
pub async fn execute(ctx: &WorkerContext, job: &models::Job) -> Result<(), WorkerError> {
    let build = ensure_build_active(&ctx.pg_pool, job.build_id).await?;
    let status = build.status().map_err(WorkerError::Deterministic)?;

    if !matches!(status, BuildStatus::Building | BuildStatus::Deploying) {
        // nothing to remediate outside the deploy phases
        runner::settle_build_failed(ctx, job, "unrecoverable failure").await;
        return Ok(());
    }

    db::event::append(
        &ctx.pg_pool,
        build.id,
        None,
        Phase::Recovery,
        EventKind::Started,
        json!({ "message": "attempting dependency reinstall" }),
    )
    .await?;

    let workdir = ctx.workspace_dir(build.project_id);
    let modules_dir = workdir.join("node_modules");
    if tokio::fs::metadata(&modules_dir).await.is_ok() {
        tokio::fs::remove_dir_all(&modules_dir)
            .await
            .map_err(|err| WorkerError::Transient(format!("cannot clean workspace: {}", err)))?;
    }

    match ctx.deployer.install(&workdir).await {
        Ok(()) => {
            ensure_build_active(&ctx.pg_pool, build.id).await?;

            db::event::append(
                &ctx.pg_pool,
                build.id,
                None,
                Phase::Recovery,
                EventKind::Completed,
                json!({ "message": "reinstall succeeded, retrying deploy" }),
            )
            .await?;

            // fresh deploy job, flagged so a second dead-letter settles the
            // build instead of looping back here
            queue::enqueue(
                &ctx.pg_pool,
                QUEUE_DEPLOY,
                build.id,
                json!({ "recovered": true }),
                ctx.settings.queue.max_attempts,
            )
            .await?;
            Ok(())
        }
        Err(err) => {
            tracing::warn!(build_id = %build.id, "remediation failed: {}", err);
            runner::settle_build_failed(ctx, job, &err.to_string()).await;
            Ok(())
        }
    }
}
