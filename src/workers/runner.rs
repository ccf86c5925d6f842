use crate::models::{self, EventKind, Phase, QUEUE_DEPLOY, QUEUE_PLAN, QUEUE_RECOVERY, QUEUE_TASK};
use crate::queue::{self, FailDisposition};
use crate::services::sanitize::sanitize_message;
use crate::workers::{self, WorkerContext, WorkerError};
use crate::{db, webhooks};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Role {
    Plan,
    Task,
    Deploy,
    Recovery,
    Webhook,
}

impl Role {
    pub fn queue(&self) -> &'static str {
        match self {
            Role::Plan => QUEUE_PLAN,
            Role::Task => QUEUE_TASK,
            Role::Deploy => QUEUE_DEPLOY,
            Role::Recovery => QUEUE_RECOVERY,
            Role::Webhook => unreachable!("webhook role has no job queue"),
        }
    }
}

/// Worker-pool entrypoint for one role: a fixed set of executors, each
/// looping lease -> execute -> ack|fail. No shared mutable state between
/// executors beyond the database itself.
pub async fn run(ctx: Arc<WorkerContext>, role: Role) -> anyhow::Result<()> {
    if role == Role::Webhook {
        return webhooks::dispatcher::run(ctx).await;
    }

    let executors = ctx.settings.queue.executors.max(1);
    tracing::info!(?role, executors, "starting worker pool");

    let mut handles = Vec::with_capacity(executors);
    for executor in 0..executors {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            executor_loop(ctx, role, executor).await;
        }));
    }

    for handle in handles {
        handle.await?;
    }
    Ok(())
}

async fn executor_loop(ctx: Arc<WorkerContext>, role: Role, executor: usize) {
    let queue_name = role.queue();
    let lease_duration = Duration::from_secs(ctx.settings.queue.lease_secs);
    let poll_interval = Duration::from_secs(ctx.settings.queue.poll_interval_secs);

    loop {
        let job = match queue::lease(&ctx.pg_pool, queue_name, lease_duration).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Err(err) => {
                tracing::error!(executor, "lease failed: {}", err);
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };

        tracing::info!(executor, job_id = %job.id, build_id = %job.build_id, queue = queue_name, attempt = job.attempts, "processing job");
        process(&ctx, role, &job).await;
    }
}

/// Every path from lease to ack/fail runs through here; an executor crash
/// mid-job leaves the lease to expire and the job to be redelivered.
async fn process(ctx: &WorkerContext, role: Role, job: &models::Job) {
    let result = match role {
        Role::Plan => workers::plan::execute(ctx, job).await,
        Role::Task => workers::task::execute(ctx, job).await,
        Role::Deploy => workers::deploy::execute(ctx, job).await,
        Role::Recovery => workers::recovery::execute(ctx, job).await,
        Role::Webhook => unreachable!(),
    };

    match result {
        Ok(()) => {
            if let Err(err) = queue::ack(&ctx.pg_pool, job.id).await {
                // the lease will expire and the job be redelivered; phase
                // logic is idempotent enough to survive the repeat
                tracing::error!(job_id = %job.id, "ack failed: {}", err);
            }
        }
        Err(WorkerError::Aborted) => {
            tracing::info!(job_id = %job.id, build_id = %job.build_id, "build already terminal, dropping job");
            if let Err(err) = queue::ack(&ctx.pg_pool, job.id).await {
                tracing::error!(job_id = %job.id, "ack failed: {}", err);
            }
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, build_id = %job.build_id, retryable = err.retryable(), "job failed: {}", err);
            handle_failure(ctx, role, job, err).await;
        }
    }
}

async fn handle_failure(ctx: &WorkerContext, role: Role, job: &models::Job, err: WorkerError) {
    let base = Duration::from_secs(ctx.settings.queue.backoff_base_secs);
    let cap = Duration::from_secs(ctx.settings.queue.backoff_cap_secs);

    let disposition =
        match queue::fail(&ctx.pg_pool, job, &err.to_string(), err.retryable(), base, cap).await {
            Ok(disposition) => disposition,
            Err(store_err) => {
                tracing::error!(job_id = %job.id, "fail bookkeeping failed: {}", store_err);
                return;
            }
        };

    match disposition {
        FailDisposition::Retried { run_after_secs } => {
            tracing::info!(job_id = %job.id, run_after_secs, "job re-queued with backoff");
        }
        FailDisposition::DeadLettered => {
            dead_letter_build(ctx, role, job, &err).await;
        }
    }
}

/// A dead-lettered deploy job gets one shot at scoped remediation before the
/// build is settled; everything else fails the build right away.
async fn dead_letter_build(ctx: &WorkerContext, role: Role, job: &models::Job, err: &WorkerError) {
    let already_recovered = job
        .payload
        .get("recovered")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if role == Role::Deploy && !already_recovered && !err.settles_build() {
        tracing::info!(build_id = %job.build_id, "scheduling error recovery for dead deploy job");
        let payload = json!({ "failed_job_id": job.id });
        if let Err(enqueue_err) = queue::enqueue(
            &ctx.pg_pool,
            QUEUE_RECOVERY,
            job.build_id,
            payload,
            ctx.settings.queue.max_attempts,
        )
        .await
        {
            tracing::error!(build_id = %job.build_id, "failed to enqueue recovery: {}", enqueue_err);
        } else {
            return;
        }
    }

    settle_build_failed(ctx, job, &err.to_string()).await;
}

pub(crate) async fn settle_build_failed(ctx: &WorkerContext, job: &models::Job, reason: &str) {
    let message = sanitize_message(reason);

    match db::build::mark_failed(&ctx.pg_pool, job.build_id, &message).await {
        Ok(true) => {
            let phase = match job.queue.as_str() {
                QUEUE_PLAN => Phase::Plan,
                QUEUE_TASK => Phase::Task,
                QUEUE_RECOVERY => Phase::Recovery,
                _ => Phase::Deploy,
            };
            if let Err(err) = db::event::append(
                &ctx.pg_pool,
                job.build_id,
                None,
                phase,
                EventKind::Failed,
                json!({ "message": message, "terminal": true }),
            )
            .await
            {
                tracing::error!(build_id = %job.build_id, "failed to append terminal event: {}", err);
            }
        }
        Ok(false) => {
            tracing::info!(build_id = %job.build_id, "build already terminal, no settle needed");
        }
        Err(err) => {
            tracing::error!(build_id = %job.build_id, "failed to mark build failed: {}", err);
        }
    }
}
