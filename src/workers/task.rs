use crate::models::{self, BuildStatus, EventKind, Phase, QUEUE_DEPLOY};
use crate::workers::{ensure_build_active, WorkerContext, WorkerError};
use crate::{db, queue};
use serde_json::json;

/// Task phase: one leased job per planned task. The executor that finishes
/// the last task owns the `executing -> building` transition and enqueues
/// the deploy job.
pub async fn execute(ctx: &WorkerContext, job: &models::Job) -> Result<(), WorkerError> {
    let build = ensure_build_active(&ctx.pg_pool, job.build_id).await?;

    let index = job.payload.get("index").and_then(|v| v.as_i64()).unwrap_or(0);
    let title = job
        .payload
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("task");
    let description = job
        .payload
        .get("description")
        .and_then(|v| v.as_str())
        .ok_or_else(|| WorkerError::Deterministic("task job without description".to_string()))?;

    // task detail is scoped to the build owner; shared viewers only see the
    // phase-level events
    db::event::append(
        &ctx.pg_pool,
        build.id,
        Some(&build.owner_id),
        Phase::Task,
        EventKind::Started,
        json!({ "task": index, "title": title }),
    )
    .await?;

    let workdir = ctx.workspace_dir(build.project_id);
    let outcome = ctx
        .codegen
        .run_task(description, &workdir, build.codegen_session.as_deref())
        .await?;

    // checkpoint after the subprocess call
    let build = ensure_build_active(&ctx.pg_pool, build.id).await?;

    db::event::append(
        &ctx.pg_pool,
        build.id,
        Some(&build.owner_id),
        Phase::Task,
        EventKind::Completed,
        json!({ "task": index, "title": title, "files": outcome.files.len() }),
    )
    .await?;

    let (done, total) = db::build::increment_tasks_done(&ctx.pg_pool, build.id).await?;

    // exact match so only one executor triggers the handoff even when a
    // redelivered task bumps the counter past the total
    if done == total {
        db::event::append(
            &ctx.pg_pool,
            build.id,
            None,
            Phase::Task,
            EventKind::Progress,
            json!({ "message": "all tasks completed", "tasks": total }),
        )
        .await?;

        db::build::transition(
            &ctx.pg_pool,
            build.id,
            BuildStatus::Executing,
            BuildStatus::Building,
        )
        .await?;

        queue::enqueue(
            &ctx.pg_pool,
            QUEUE_DEPLOY,
            build.id,
            json!({}),
            ctx.settings.queue.max_attempts,
        )
        .await?;
    }

    Ok(())
}
