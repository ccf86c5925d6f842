use crate::models::{self, EventKind, Phase};
use serde_json::Value;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

/// Appends one event, assigning the next gap-free sequence number.
///
/// The bump of `build.last_event_id` is the per-build serialization point:
/// two workers appending concurrently serialize on that single row and can
/// never produce a duplicate or a gap.
pub async fn append(
    pool: &PgPool,
    build_id: Uuid,
    owner_id: Option<&str>,
    phase: Phase,
    kind: EventKind,
    payload: Value,
) -> Result<i64, String> {
    let query_span = tracing::info_span!("Appending build event.");

    async move {
        let mut tx = pool.begin().await.map_err(|err| {
            tracing::error!("Failed to begin transaction: {:?}", err);
            "Failed to begin transaction".to_string()
        })?;

        let (event_id,): (i64,) = sqlx::query_as(
            r#"
            UPDATE build
            SET last_event_id = last_event_id + 1
            WHERE id = $1
            RETURNING last_event_id
            "#,
        )
        .bind(build_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            tracing::error!("Failed to advance event sequence: {:?}", err);
            "Failed to advance event sequence".to_string()
        })?;

        sqlx::query(
            r#"
            INSERT INTO event (build_id, event_id, owner_id, phase, kind, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(build_id)
        .bind(event_id)
        .bind(owner_id)
        .bind(phase.as_str())
        .bind(kind.as_str())
        .bind(payload)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            tracing::error!("Failed to insert event: {:?}", err);
            "Failed to insert event".to_string()
        })?;

        tx.commit().await.map_err(|err| {
            tracing::error!("Failed to commit event append: {:?}", err);
            "Failed to commit".to_string()
        })?;

        Ok(event_id)
    }
    .instrument(query_span)
    .await
}

/// Ordered, gap-free suffix of a build's ledger past `after`.
///
/// The owner filter is the cross-tenant boundary: an event carrying an
/// owner is only visible to that owner, NULL-owner events to everyone
/// viewing the build.
pub async fn read_since(
    pool: &PgPool,
    build_id: Uuid,
    after: i64,
    viewer_id: &str,
) -> Result<Vec<models::Event>, String> {
    let query_span = tracing::info_span!("Reading build events.");
    sqlx::query_as::<_, models::Event>(
        r#"
        SELECT * FROM event
        WHERE build_id = $1 AND event_id > $2
              AND (owner_id IS NULL OR owner_id = $3)
        ORDER BY event_id ASC
        "#,
    )
    .bind(build_id)
    .bind(after)
    .bind(viewer_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to read events: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// Operator-only variant: no visibility filter, full payload detail.
pub async fn read_since_full(
    pool: &PgPool,
    build_id: Uuid,
    after: i64,
) -> Result<Vec<models::Event>, String> {
    let query_span = tracing::info_span!("Reading build events (operator).");
    sqlx::query_as::<_, models::Event>(
        r#"
        SELECT * FROM event
        WHERE build_id = $1 AND event_id > $2
        ORDER BY event_id ASC
        "#,
    )
    .bind(build_id)
    .bind(after)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to read events: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// Everything in a project the consumer has not acknowledged yet, given
/// one cursor per build (last delivered event id; builds without a cursor
/// start at 0). Builds of a project progress independently, so a single
/// project-wide watermark would skip events appended to an older build
/// after a newer one was acknowledged. Feeds the streaming gateway and
/// the webhook dispatcher.
pub async fn read_project_since(
    pool: &PgPool,
    project_id: Uuid,
    cursors: &[(Uuid, i64)],
    viewer_id: &str,
    limit: i64,
) -> Result<Vec<models::Event>, String> {
    let query_span = tracing::info_span!("Reading project events.");

    let cursor_builds: Vec<Uuid> = cursors.iter().map(|(build_id, _)| *build_id).collect();
    let cursor_events: Vec<i64> = cursors.iter().map(|(_, event_id)| *event_id).collect();

    sqlx::query_as::<_, models::Event>(
        r#"
        SELECT e.build_id, e.event_id, e.owner_id, e.phase, e.kind, e.payload, e.created_at
        FROM event e
        JOIN build b ON b.id = e.build_id
        LEFT JOIN unnest($2::uuid[], $3::bigint[]) AS c (build_id, last_event_id)
               ON c.build_id = e.build_id
        WHERE b.project_id = $1
              AND e.event_id > COALESCE(c.last_event_id, 0)
              AND (e.owner_id IS NULL OR e.owner_id = $4)
        ORDER BY e.created_at ASC, e.build_id ASC, e.event_id ASC
        LIMIT $5
        "#,
    )
    .bind(project_id)
    .bind(cursor_builds)
    .bind(cursor_events)
    .bind(viewer_id)
    .bind(limit)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to read project events: {:?}", err);
        "Could not fetch data".to_string()
    })
}
