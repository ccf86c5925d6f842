use crate::models::{self, Job};
use rand::Rng;
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

pub async fn enqueue(
    pool: &PgPool,
    queue: &str,
    build_id: Uuid,
    payload: Value,
    max_attempts: i32,
) -> Result<Uuid, String> {
    let query_span = tracing::info_span!("Enqueueing job.");
    let job = Job::new(queue, build_id, payload, max_attempts);
    sqlx::query(
        r#"
        INSERT INTO job
            (id, queue, build_id, payload, status, attempts, max_attempts,
             run_after, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(job.id)
    .bind(&job.queue)
    .bind(job.build_id)
    .bind(&job.payload)
    .bind(&job.status)
    .bind(job.attempts)
    .bind(job.max_attempts)
    .bind(job.run_after)
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(move |_| job.id)
    .map_err(|err| {
        tracing::error!("Failed to enqueue job: {:?}", err);
        "Failed to insert".to_string()
    })
}

/// Claims at most one runnable job from the queue.
///
/// A job is runnable when it is pending and due, or when its lease expired —
/// lease expiry, not worker-crash detection, is what reclaims abandoned
/// work. SKIP LOCKED keeps concurrent workers off each other's rows, and the
/// single UPDATE makes claim + lease + attempt bump atomic. At-least-once:
/// a redelivered job arrives with attempts already counted.
pub async fn lease(
    pool: &PgPool,
    queue: &str,
    lease_duration: Duration,
) -> Result<Option<models::Job>, String> {
    let query_span = tracing::info_span!("Leasing job.");
    sqlx::query_as::<_, models::Job>(
        r#"
        UPDATE job
        SET status = 'leased',
            lease_expires_at = NOW() + make_interval(secs => $2),
            attempts = attempts + 1,
            updated_at = NOW()
        WHERE id = (
            SELECT id FROM job
            WHERE queue = $1
              AND (
                    (status = 'pending' AND run_after <= NOW())
                 OR (status = 'leased' AND lease_expires_at <= NOW())
              )
            ORDER BY run_after
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(queue)
    .bind(lease_duration.as_secs_f64())
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to lease job: {:?}", err);
        "Failed to lease".to_string()
    })
}

pub async fn ack(pool: &PgPool, job_id: Uuid) -> Result<(), String> {
    let query_span = tracing::info_span!("Acking job.");
    sqlx::query(
        r#"
        UPDATE job
        SET status = 'done', lease_expires_at = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'leased'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to ack job {}: {:?}", job_id, err);
        "Failed to update".to_string()
    })
}

pub enum FailDisposition {
    /// Re-queued with backoff; will be redelivered.
    Retried { run_after_secs: u64 },
    /// Attempts exhausted or error not retryable; parked for an operator.
    DeadLettered,
}

/// Failure path. Retryable errors go back to pending with jittered
/// exponential backoff until attempts run out; deterministic errors
/// dead-letter immediately.
pub async fn fail(
    pool: &PgPool,
    job: &models::Job,
    reason: &str,
    retryable: bool,
    backoff_base: Duration,
    backoff_cap: Duration,
) -> Result<FailDisposition, String> {
    if retryable && job.attempts < job.max_attempts {
        let delay = backoff_delay(job.attempts, backoff_base, backoff_cap);
        let query_span = tracing::info_span!("Re-queueing failed job.");
        sqlx::query(
            r#"
            UPDATE job
            SET status = 'pending', lease_expires_at = NULL,
                run_after = NOW() + make_interval(secs => $2),
                last_error = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(delay.as_secs_f64())
        .bind(reason)
        .execute(pool)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to re-queue job {}: {:?}", job.id, err);
            "Failed to update".to_string()
        })?;

        return Ok(FailDisposition::Retried {
            run_after_secs: delay.as_secs(),
        });
    }

    let query_span = tracing::info_span!("Dead-lettering job.");
    sqlx::query(
        r#"
        UPDATE job
        SET status = 'dead', lease_expires_at = NULL, last_error = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(reason)
    .execute(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to dead-letter job {}: {:?}", job.id, err);
        "Failed to update".to_string()
    })?;

    Ok(FailDisposition::DeadLettered)
}

/// Dead-letter queue, visible to operators.
pub async fn dead_jobs(pool: &PgPool) -> Result<Vec<models::Job>, String> {
    let query_span = tracing::info_span!("Listing dead jobs.");
    sqlx::query_as::<_, models::Job>(
        r#"
        SELECT * FROM job WHERE status = 'dead' ORDER BY updated_at DESC
        "#,
    )
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to list dead jobs: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn fetch(pool: &PgPool, job_id: Uuid) -> Result<Option<models::Job>, String> {
    let query_span = tracing::info_span!("Fetch job by id.");
    sqlx::query_as::<_, models::Job>(
        r#"
        SELECT * FROM job WHERE id = $1 LIMIT 1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch job: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// base * 2^(attempt-1), capped, with up to 25% random jitter on top.
pub fn backoff_delay(attempt: i32, base: Duration, cap: Duration) -> Duration {
    let attempt = attempt.max(1) as u32;
    let exp = base
        .checked_mul(2u32.saturating_pow(attempt - 1))
        .unwrap_or(cap)
        .min(cap);
    let jitter = rand::thread_rng().gen_range(0.0..0.25);
    exp.mul_f64(1.0 + jitter).min(cap.mul_f64(1.25))
}
