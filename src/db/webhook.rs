use crate::models;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

pub async fn insert(
    pool: &PgPool,
    subscription: models::WebhookSubscription,
) -> Result<models::WebhookSubscription, String> {
    let query_span = tracing::info_span!("Saving webhook subscription.");
    sqlx::query(
        r#"
        INSERT INTO webhook_subscription
            (id, owner_id, project_id, url, secret, active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(subscription.id)
    .bind(&subscription.owner_id)
    .bind(subscription.project_id)
    .bind(&subscription.url)
    .bind(&subscription.secret)
    .bind(subscription.active)
    .bind(subscription.created_at)
    .bind(subscription.updated_at)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(move |_| subscription)
    .map_err(|err| {
        tracing::error!("Failed to insert webhook subscription: {:?}", err);
        "Failed to insert".to_string()
    })
}

pub async fn fetch_by_owner(
    pool: &PgPool,
    owner_id: &str,
) -> Result<Vec<models::WebhookSubscription>, String> {
    let query_span = tracing::info_span!("Fetch webhook subscriptions by owner.");
    sqlx::query_as::<_, models::WebhookSubscription>(
        r#"
        SELECT * FROM webhook_subscription WHERE owner_id = $1 ORDER BY created_at
        "#,
    )
    .bind(owner_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch webhook subscriptions: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn fetch_active(pool: &PgPool) -> Result<Vec<models::WebhookSubscription>, String> {
    let query_span = tracing::info_span!("Fetch active webhook subscriptions.");
    sqlx::query_as::<_, models::WebhookSubscription>(
        r#"
        SELECT * FROM webhook_subscription WHERE active ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch active subscriptions: {:?}", err);
        "Could not fetch data".to_string()
    })
}

pub async fn delete(pool: &PgPool, id: Uuid, owner_id: &str) -> Result<bool, String> {
    let query_span = tracing::info_span!("Delete webhook subscription.");
    sqlx::query(
        r#"
        DELETE FROM webhook_subscription WHERE id = $1 AND owner_id = $2
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|result| result.rows_affected() == 1)
    .map_err(|err| {
        tracing::error!("Failed to delete webhook subscription: {:?}", err);
        "Failed to delete".to_string()
    })
}

/// Per-build delivery cursors of one subscription: the last acknowledged
/// event id for every build the receiver has seen anything from.
pub async fn fetch_cursors(
    pool: &PgPool,
    subscription_id: Uuid,
) -> Result<Vec<(Uuid, i64)>, String> {
    let query_span = tracing::info_span!("Fetch webhook cursors.");
    sqlx::query_as::<_, (Uuid, i64)>(
        r#"
        SELECT build_id, last_event_id FROM webhook_cursor WHERE subscription_id = $1
        "#,
    )
    .bind(subscription_id)
    .fetch_all(pool)
    .instrument(query_span)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch webhook cursors: {:?}", err);
        "Could not fetch data".to_string()
    })
}

/// Advances one build's cursor. Only called after a 2xx acknowledgment; a
/// failed delivery run leaves it untouched so the next run resumes from
/// the right point.
pub async fn advance_cursor(
    pool: &PgPool,
    subscription_id: Uuid,
    build_id: Uuid,
    event_id: i64,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Advancing webhook cursor.");
    sqlx::query(
        r#"
        INSERT INTO webhook_cursor (subscription_id, build_id, last_event_id, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (subscription_id, build_id) DO UPDATE
        SET last_event_id = GREATEST(webhook_cursor.last_event_id, EXCLUDED.last_event_id),
            updated_at = NOW()
        "#,
    )
    .bind(subscription_id)
    .bind(build_id)
    .bind(event_id)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to advance webhook cursor: {:?}", err);
        "Failed to update".to_string()
    })
}

/// Rewinds delivery for replay-on-demand. With a build id the cursor of
/// that build is reset to `event_id`; without one every cursor is dropped
/// and the whole project history is redelivered. Receivers dedup on
/// `(build_id, event_id)`. Returns false when the subscription is not
/// owned by `owner_id`.
pub async fn rewind_cursors(
    pool: &PgPool,
    id: Uuid,
    owner_id: &str,
    build_id: Option<Uuid>,
    event_id: i64,
) -> Result<bool, String> {
    let query_span = tracing::info_span!("Rewinding webhook cursors.");

    async move {
        let owned: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM webhook_subscription WHERE id = $1 AND owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch webhook subscription: {:?}", err);
            "Could not fetch data".to_string()
        })?;

        if owned.is_none() {
            return Ok(false);
        }

        let result = match build_id {
            Some(build_id) => {
                sqlx::query(
                    r#"
                    INSERT INTO webhook_cursor
                        (subscription_id, build_id, last_event_id, updated_at)
                    VALUES ($1, $2, $3, NOW())
                    ON CONFLICT (subscription_id, build_id) DO UPDATE
                    SET last_event_id = EXCLUDED.last_event_id, updated_at = NOW()
                    "#,
                )
                .bind(id)
                .bind(build_id)
                .bind(event_id)
                .execute(pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    DELETE FROM webhook_cursor WHERE subscription_id = $1
                    "#,
                )
                .bind(id)
                .execute(pool)
                .await
            }
        };

        result.map(|_| true).map_err(|err| {
            tracing::error!("Failed to rewind webhook cursors: {:?}", err);
            "Failed to update".to_string()
        })
    }
    .instrument(query_span)
    .await
}

pub async fn log_delivery(
    pool: &PgPool,
    subscription_id: Uuid,
    build_id: Uuid,
    event_id: i64,
    attempt: i32,
    status_code: Option<i32>,
    ok: bool,
    error: Option<&str>,
) -> Result<(), String> {
    let query_span = tracing::info_span!("Logging webhook delivery attempt.");
    sqlx::query(
        r#"
        INSERT INTO webhook_delivery
            (id, subscription_id, build_id, event_id, attempt, status_code, ok, error, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(subscription_id)
    .bind(build_id)
    .bind(event_id)
    .bind(attempt)
    .bind(status_code)
    .bind(ok)
    .bind(error)
    .execute(pool)
    .instrument(query_span)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to log delivery attempt: {:?}", err);
        "Failed to insert".to_string()
    })
}
