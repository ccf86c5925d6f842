use crate::configuration::WebhookSettings;
use crate::db;
use crate::models::{Event, WebhookSubscription};
use crate::queue::backoff_delay;
use crate::workers::WorkerContext;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const BATCH_LIMIT: i64 = 100;

/// Outbound delivery loop. Per subscription, events past the per-build
/// cursors are posted in order; a cursor only advances on a 2xx, so an
/// exhausted retry run leaves it behind for replay. At-least-once:
/// receivers dedup on `(build_id, event_id)`.
pub async fn run(ctx: Arc<WorkerContext>) -> anyhow::Result<()> {
    let settings = ctx.settings.webhook.clone();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .build()?;

    tracing::info!(tick_secs = settings.tick_secs, "starting webhook dispatcher");

    loop {
        tokio::time::sleep(Duration::from_secs(settings.tick_secs)).await;

        let subscriptions = match db::webhook::fetch_active(&ctx.pg_pool).await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::error!("failed to list subscriptions: {}", err);
                continue;
            }
        };

        for subscription in subscriptions {
            if let Err(err) =
                deliver_pending(&ctx.pg_pool, &client, &subscription, &settings).await
            {
                tracing::warn!(subscription_id = %subscription.id, "delivery run stopped: {}", err);
            }
        }
    }
}

/// Delivers everything past the subscription's per-build cursors; stops at
/// the first event that exhausts its retries (ordering would break
/// otherwise).
pub async fn deliver_pending(
    pool: &PgPool,
    client: &reqwest::Client,
    subscription: &WebhookSubscription,
    settings: &WebhookSettings,
) -> Result<usize, String> {
    let cursors = db::webhook::fetch_cursors(pool, subscription.id).await?;
    let events = db::event::read_project_since(
        pool,
        subscription.project_id,
        &cursors,
        &subscription.owner_id,
        BATCH_LIMIT,
    )
    .await?;

    let mut delivered = 0;
    for event in &events {
        if !deliver_event(pool, client, subscription, event, settings).await? {
            break;
        }
        db::webhook::advance_cursor(pool, subscription.id, event.build_id, event.event_id)
            .await?;
        delivered += 1;
    }
    Ok(delivered)
}

/// One event, retried with capped backoff. Returns whether a 2xx landed.
async fn deliver_event(
    pool: &PgPool,
    client: &reqwest::Client,
    subscription: &WebhookSubscription,
    event: &Event,
    settings: &WebhookSettings,
) -> Result<bool, String> {
    let body = serde_json::to_vec(event).map_err(|err| err.to_string())?;
    let signature = sign_payload(&subscription.secret, &body);

    for attempt in 1..=settings.max_attempts {
        let result = client
            .post(&subscription.url)
            .header("content-type", "application/json")
            .header("x-sheen-signature", &signature)
            .body(body.clone())
            .send()
            .await;

        let (status_code, error) = match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    db::webhook::log_delivery(
                        pool,
                        subscription.id,
                        event.build_id,
                        event.event_id,
                        attempt as i32,
                        Some(status.as_u16() as i32),
                        true,
                        None,
                    )
                    .await?;
                    return Ok(true);
                }
                (Some(status.as_u16() as i32), status.to_string())
            }
            Err(err) => (None, err.to_string()),
        };

        tracing::warn!(
            subscription_id = %subscription.id,
            event_id = event.event_id,
            attempt,
            "webhook delivery failed: {}",
            error
        );
        db::webhook::log_delivery(
            pool,
            subscription.id,
            event.build_id,
            event.event_id,
            attempt as i32,
            status_code,
            false,
            Some(&error),
        )
        .await?;

        if attempt < settings.max_attempts {
            let delay = backoff_delay(
                attempt as i32,
                Duration::from_secs(settings.backoff_base_secs),
                Duration::from_secs(settings.backoff_cap_secs),
            );
            tokio::time::sleep(delay).await;
        }
    }

    Ok(false)
}

pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    format!("sha256={:x}", mac.finalize().into_bytes())
}
