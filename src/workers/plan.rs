use crate::models::{self, BuildStatus, EventKind, Phase, QUEUE_TASK};
use crate::workers::{ensure_build_active, WorkerContext, WorkerError};
use crate::{db, queue};
use serde_json::json;

/// Plan phase: ask the codegen tool for a task list, then fan one task job
/// out per planned task. `queued -> planning -> executing`.
pub async fn execute(ctx: &WorkerContext, job: &models::Job) -> Result<(), WorkerError> {
    let build = ensure_build_active(&ctx.pg_pool, job.build_id).await?;
    let status = build.status().map_err(WorkerError::Deterministic)?;

    match status {
        BuildStatus::Queued => {
            db::build::transition(&ctx.pg_pool, build.id, BuildStatus::Queued, BuildStatus::Planning)
                .await?;
            db::event::append(
                &ctx.pg_pool,
                build.id,
                None,
                Phase::Plan,
                EventKind::Started,
                json!({ "message": "planning started" }),
            )
            .await?;
        }
        // redelivered mid-plan: pick up where we left off
        BuildStatus::Planning => {}
        // redelivered after completion: nothing left to do
        _ => return Ok(()),
    }

    let project = db::project::fetch(&ctx.pg_pool, build.project_id)
        .await?
        .ok_or_else(|| {
            WorkerError::Deterministic(format!("project {} not found", build.project_id))
        })?;

    let workdir = ctx.workspace_dir(build.project_id);
    tokio::fs::create_dir_all(&workdir)
        .await
        .map_err(|err| WorkerError::Fatal(format!("cannot create workspace: {}", err)))?;

    let outcome = ctx
        .codegen
        .plan(&build.prompt, &workdir, project.codegen_session.as_deref())
        .await?;

    // checkpoint: the build may have been cancelled while the tool ran
    ensure_build_active(&ctx.pg_pool, build.id).await?;

    if let Some(session) = &outcome.session {
        db::project::set_codegen_session(&ctx.pg_pool, project.id, session).await?;
        db::build::set_codegen_session(&ctx.pg_pool, build.id, session).await?;
    }

    let total = outcome.tasks.len() as i32;
    db::build::set_tasks_total(&ctx.pg_pool, build.id, total).await?;

    for (index, task) in outcome.tasks.iter().enumerate() {
        queue::enqueue(
            &ctx.pg_pool,
            QUEUE_TASK,
            build.id,
            json!({
                "index": index,
                "title": task.title,
                "description": task.description,
            }),
            ctx.settings.queue.max_attempts,
        )
        .await?;
    }

    db::build::transition(
        &ctx.pg_pool,
        build.id,
        BuildStatus::Planning,
        BuildStatus::Executing,
    )
    .await?;

    db::event::append(
        &ctx.pg_pool,
        build.id,
        None,
        Phase::Plan,
        EventKind::Completed,
        json!({ "message": "plan ready", "tasks": total }),
    )
    .await?;

    Ok(())
}
