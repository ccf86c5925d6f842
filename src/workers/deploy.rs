use crate::db::build::DeployOutcome;
use crate::models::{self, BuildStatus, EventKind, Phase};
use crate::workers::{ensure_build_active, WorkerContext, WorkerError};
use crate::db;
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

/// Deploy phase: dependency install and compile (`building`), then the
/// actual deploy (`deploying -> deployed`), version stamping and the
/// terminal `completed` event.
pub async fn execute(ctx: &WorkerContext, job: &models::Job) -> Result<(), WorkerError> {
    let build = db::build::fetch(&ctx.pg_pool, job.build_id)
        .await?
        .ok_or_else(|| WorkerError::Deterministic(format!("build {} not found", job.build_id)))?;
    let status = build.status().map_err(WorkerError::Deterministic)?;

    // A crash between the terminal transition and the version stamp leaves
    // a deployed build without a version or closing event; the redelivered
    // job finishes those instead of aborting on the terminal state.
    if status == BuildStatus::Deployed {
        return finish_deployed(ctx, &build).await;
    }
    if status.is_terminal() {
        return Err(WorkerError::Aborted);
    }

    let workdir = ctx.workspace_dir(build.project_id);

    let (install_ms, build_ms) = match status {
        BuildStatus::Building => {
            db::event::append(
                &ctx.pg_pool,
                build.id,
                None,
                Phase::Build,
                EventKind::Started,
                json!({ "message": "installing dependencies" }),
            )
            .await?;

            let started = Instant::now();
            ctx.deployer.install(&workdir).await?;
            let install_ms = started.elapsed().as_millis() as i64;

            ensure_build_active(&ctx.pg_pool, build.id).await?;

            let started = Instant::now();
            ctx.deployer.compile(&workdir).await?;
            let build_ms = started.elapsed().as_millis() as i64;

            ensure_build_active(&ctx.pg_pool, build.id).await?;

            db::event::append(
                &ctx.pg_pool,
                build.id,
                None,
                Phase::Build,
                EventKind::Completed,
                json!({ "message": "compile finished", "install_ms": install_ms, "build_ms": build_ms }),
            )
            .await?;

            db::build::transition(
                &ctx.pg_pool,
                build.id,
                BuildStatus::Building,
                BuildStatus::Deploying,
            )
            .await?;

            (install_ms, build_ms)
        }
        // redelivered after the compile finished; carry on with the deploy
        BuildStatus::Deploying => (
            build.install_ms.unwrap_or_default(),
            build.build_ms.unwrap_or_default(),
        ),
        _ => {
            return Err(WorkerError::Deterministic(format!(
                "deploy job for build in state {}",
                status
            )))
        }
    };

    db::event::append(
        &ctx.pg_pool,
        build.id,
        None,
        Phase::Deploy,
        EventKind::Started,
        json!({ "message": "deploying" }),
    )
    .await?;

    let started = Instant::now();
    let result = ctx
        .deployer
        .deploy(&workdir, &project_slug(build.project_id))
        .await?;
    let deploy_ms = started.elapsed().as_millis() as i64;

    let build = ensure_build_active(&ctx.pg_pool, build.id).await?;

    db::build::record_deploy_outcome(
        &ctx.pg_pool,
        build.id,
        &DeployOutcome {
            artifact_url: result.url.clone(),
            checksum: None,
            output_size_bytes: None,
            install_ms,
            build_ms,
            deploy_ms,
        },
    )
    .await?;

    db::build::transition(
        &ctx.pg_pool,
        build.id,
        BuildStatus::Deploying,
        BuildStatus::Deployed,
    )
    .await?;

    let version = db::build::assign_version(&ctx.pg_pool, build.project_id, build.id).await?;

    // the classification is already in hand here, so it is written directly
    // instead of bouncing through another queue hop
    let change_kind = if build.parent_build_id.is_some() {
        "iteration"
    } else {
        "initial"
    };
    db::build::set_version_enrichment(
        &ctx.pg_pool,
        build.id,
        Some(&format!("v{}", version)),
        Some(&build.prompt.chars().take(140).collect::<String>()),
        Some(change_kind),
    )
    .await?;

    db::event::append(
        &ctx.pg_pool,
        build.id,
        None,
        Phase::Deploy,
        EventKind::Completed,
        json!({
            "message": "deployed",
            "artifact_url": result.url,
            "deployment_id": result.deployment_id,
            "version": version,
            "terminal": true,
        }),
    )
    .await?;

    Ok(())
}

/// Idempotent tail of the deploy phase for a build that already turned
/// `deployed`: stamp the version if it is missing and append the terminal
/// event if the ledger lacks one.
async fn finish_deployed(ctx: &WorkerContext, build: &models::Build) -> Result<(), WorkerError> {
    let version = match build.version_number {
        Some(version) => version,
        None => {
            let version =
                db::build::assign_version(&ctx.pg_pool, build.project_id, build.id).await?;
            let change_kind = if build.parent_build_id.is_some() {
                "iteration"
            } else {
                "initial"
            };
            db::build::set_version_enrichment(
                &ctx.pg_pool,
                build.id,
                Some(&format!("v{}", version)),
                Some(&build.prompt.chars().take(140).collect::<String>()),
                Some(change_kind),
            )
            .await?;
            version
        }
    };

    let events = db::event::read_since_full(&ctx.pg_pool, build.id, 0).await?;
    let closed = events.iter().any(|event| {
        event.phase == Phase::Deploy.as_str() && event.payload["terminal"] == json!(true)
    });
    if !closed {
        db::event::append(
            &ctx.pg_pool,
            build.id,
            None,
            Phase::Deploy,
            EventKind::Completed,
            json!({
                "message": "deployed",
                "artifact_url": build.artifact_url,
                "version": version,
                "terminal": true,
            }),
        )
        .await?;
    }

    Ok(())
}

fn project_slug(project_id: Uuid) -> String {
    format!("app-{}", project_id.simple())
}
