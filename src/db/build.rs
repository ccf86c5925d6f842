use crate::models::{self, BuildStatus};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<models::Build>, String> {
    let query_span = tracing::info_span!("Fetch build by id.");
    sqlx::query_as::<_, models::Build>(
        r#"
        SELECT * FROM build WHERE id = $1 LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch build, error: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// Looks for a recent build of the same prompt for the dedup window of the
/// idempotent create path. Redis covers most races; this covers a flushed
/// cache.
pub async fn fetch_recent_by_prompt(
    pool: &PgPool,
    project_id: Uuid,
    owner_id: &str,
    prompt_hash: &str,
    window_secs: i64,
) -> Result<Option<models::Build>, String> {
    let query_span = tracing::info_span!("Fetch recent build by prompt hash.");
    let cutoff = Utc::now() - Duration::seconds(window_secs);
    sqlx::query_as::<_, models::Build>(
        r#"
        SELECT * FROM build
        WHERE project_id = $1 AND owner_id = $2 AND prompt_hash = $3
              AND created_at >= $4
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(project_id)
    .bind(owner_id)
    .bind(prompt_hash)
    .bind(cutoff)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch build by prompt hash: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn insert(pool: &PgPool, build: models::Build) -> Result<models::Build, String> {
    let query_span = tracing::info_span!("Saving new build into the database");
    sqlx::query(
        r#"
        INSERT INTO build
            (id, project_id, owner_id, status, parent_build_id, prompt, prompt_hash,
             artifact_url, checksum, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(build.id)
    .bind(build.project_id)
    .bind(&build.owner_id)
    .bind(&build.status)
    .bind(build.parent_build_id)
    .bind(&build.prompt)
    .bind(&build.prompt_hash)
    .bind(&build.artifact_url)
    .bind(&build.checksum)
    .bind(build.created_at)
    .bind(build.updated_at)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(move |_| build)
    .map_err(|err| {
        tracing::error!("Failed to execute query: {:?}", err);
        "Failed to insert".to_string()
    })
}

/// Guarded forward transition. The WHERE clause carries the expected
/// predecessor, so a racing worker simply matches zero rows; the database
/// trigger backstops anything that slips through.
pub async fn transition(
    pool: &PgPool,
    id: Uuid,
    from: BuildStatus,
    to: BuildStatus,
) -> Result<bool, String> {
    if !from.can_transition(to) {
        return Err(format!("illegal transition {} -> {}", from, to));
    }

    let query_span = tracing::info_span!("Transitioning build status.");
    sqlx::query(
        r#"
        UPDATE build
        SET status = $3, updated_at = NOW()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|result| result.rows_affected() == 1)
    .map_err(|err| {
        tracing::error!("Failed to transition build {}: {:?}", id, err);
        "Failed to update".to_string()
    })
}

/// Terminal failure from any non-terminal state. Returns false when the
/// build already reached a terminal state (someone else settled it first).
pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> Result<bool, String> {
    let query_span = tracing::info_span!("Marking build failed.");
    sqlx::query(
        r#"
        UPDATE build
        SET status = 'failed', error = $2, updated_at = NOW()
        WHERE id = $1 AND status NOT IN ('deployed', 'failed')
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|result| result.rows_affected() == 1)
    .map_err(|err| {
        tracing::error!("Failed to mark build {} failed: {:?}", id, err);
        "Failed to update".to_string()
    })
}

pub async fn set_tasks_total(pool: &PgPool, id: Uuid, total: i32) -> Result<(), String> {
    let query_span = tracing::info_span!("Recording planned task count.");
    sqlx::query(
        r#"
        UPDATE build SET tasks_total = $2, updated_at = NOW() WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(total)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to set tasks_total: {:?}", err);
        "Failed to update".to_string()
    })
}

/// Atomic progress bump; the returned pair tells the caller whether it just
/// finished the last task and therefore owns the phase transition.
pub async fn increment_tasks_done(pool: &PgPool, id: Uuid) -> Result<(i32, i32), String> {
    let query_span = tracing::info_span!("Incrementing completed task count.");
    sqlx::query_as::<_, (i32, i32)>(
        r#"
        UPDATE build
        SET tasks_done = tasks_done + 1, updated_at = NOW()
        WHERE id = $1
        RETURNING tasks_done, tasks_total
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to increment tasks_done: {:?}", err);
        "Failed to update".to_string()
    })
}

pub async fn set_codegen_session(pool: &PgPool, id: Uuid, session: &str) -> Result<(), String> {
    let query_span = tracing::info_span!("Recording build codegen session.");
    sqlx::query(
        r#"
        UPDATE build SET codegen_session = $2, updated_at = NOW() WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(session)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to set codegen session: {:?}", err);
        "Failed to update".to_string()
    })
}

pub struct DeployOutcome {
    pub artifact_url: String,
    pub checksum: Option<String>,
    pub output_size_bytes: Option<i64>,
    pub install_ms: i64,
    pub build_ms: i64,
    pub deploy_ms: i64,
}

pub async fn record_deploy_outcome(
    pool: &PgPool,
    id: Uuid,
    outcome: &DeployOutcome,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Recording deploy outcome.");
    sqlx::query(
        r#"
        UPDATE build
        SET artifact_url = $2, checksum = $3, output_size_bytes = $4,
            install_ms = $5, build_ms = $6, deploy_ms = $7, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&outcome.artifact_url)
    .bind(&outcome.checksum)
    .bind(outcome.output_size_bytes)
    .bind(outcome.install_ms)
    .bind(outcome.build_ms)
    .bind(outcome.deploy_ms)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to record deploy outcome: {:?}", err);
        "Failed to update".to_string()
    })
}

/// Assigns the next version number for the project to this build.
///
/// One transaction: the project row is locked (per-project, never global),
/// an already-assigned build short-circuits to its existing number so a
/// retried call can never increment twice, otherwise max+1 over the
/// project's builds is written onto the build row.
pub async fn assign_version(pool: &PgPool, project_id: Uuid, build_id: Uuid) -> Result<i32, String> {
    let query_span = tracing::info_span!("Assigning version number.");

    async move {
        let mut tx = pool.begin().await.map_err(|err| {
            tracing::error!("Failed to begin transaction: {:?}", err);
            "Failed to begin transaction".to_string()
        })?;

        sqlx::query("SELECT id FROM project WHERE id = $1 FOR UPDATE")
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| {
                tracing::error!("Failed to lock project {}: {:?}", project_id, err);
                "Failed to lock project".to_string()
            })?;

        let existing: Option<(Option<i32>,)> =
            sqlx::query_as("SELECT version_number FROM build WHERE id = $1")
                .bind(build_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| {
                    tracing::error!("Failed to fetch build {}: {:?}", build_id, err);
                    "Failed to fetch build".to_string()
                })?;

        let existing = existing.ok_or_else(|| "build not found".to_string())?;
        if let (Some(number),) = existing {
            tx.rollback().await.ok();
            return Ok(number);
        }

        let (next,): (i32,) = sqlx::query_as(
            r#"
            SELECT COALESCE(MAX(version_number), 0) + 1
            FROM build WHERE project_id = $1
            "#,
        )
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            tracing::error!("Failed to compute next version: {:?}", err);
            "Failed to compute next version".to_string()
        })?;

        sqlx::query(
            r#"
            UPDATE build SET version_number = $2, updated_at = NOW() WHERE id = $1
            "#,
        )
        .bind(build_id)
        .bind(next)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            tracing::error!("Failed to stamp version: {:?}", err);
            "Failed to stamp version".to_string()
        })?;

        tx.commit().await.map_err(|err| {
            tracing::error!("Failed to commit version assignment: {:?}", err);
            "Failed to commit".to_string()
        })?;

        Ok(next)
    }
    .instrument(query_span)
    .await
}

/// Enrichment lands later and independently of version assignment; a single
/// atomic update, read paths tolerate the fields staying NULL forever.
pub async fn set_version_enrichment(
    pool: &PgPool,
    id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
    change_kind: Option<&str>,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Recording version enrichment.");
    sqlx::query(
        r#"
        UPDATE build
        SET version_name = $2, version_description = $3, change_kind = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(change_kind)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to record enrichment: {:?}", err);
        "Failed to update".to_string()
    })
}
