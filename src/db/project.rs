use crate::models;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

pub async fn fetch(pool: &PgPool, id: Uuid) -> Result<Option<models::Project>, String> {
    let query_span = tracing::info_span!("Fetch project by id.");
    sqlx::query_as::<_, models::Project>(
        r#"
        SELECT * FROM project WHERE id = $1 LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch project, error: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// Insert-if-absent. Two concurrent build requests for the same project
/// must end up with one project row, so the conflict is swallowed and the
/// surviving row is fetched back.
pub async fn upsert(pool: &PgPool, project: models::Project) -> Result<models::Project, String> {
    let query_span = tracing::info_span!("Upserting project.");
    sqlx::query(
        r#"
        INSERT INTO project (id, owner_id, name, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(project.id)
    .bind(&project.owner_id)
    .bind(&project.name)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to upsert project: {:?}", err);
        "Failed to insert".to_string()
    })?;

    fetch(pool, project.id)
        .await?
        .ok_or_else(|| "project vanished after upsert".to_string())
}

pub async fn set_codegen_session(
    pool: &PgPool,
    id: Uuid,
    session: &str,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Persisting codegen session token.");
    sqlx::query(
        r#"
        UPDATE project
        SET codegen_session = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(session)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to persist codegen session: {:?}", err);
        "Failed to update".to_string()
    })
}
