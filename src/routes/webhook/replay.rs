use crate::db;
use crate::forms;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::{post, web, Responder, Result};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Rewinds a subscription's delivery cursors so the dispatcher re-delivers
/// past events: one build's cursor when `from_build_id` is given, the whole
/// project history otherwise. Receivers are expected to dedup on
/// `(build_id, event_id)`.
#[tracing::instrument(name = "Replay webhook deliveries.", skip(pg_pool))]
#[post("/{id}/replay")]
pub async fn add(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    form: web::Json<forms::webhook::ReplayForm>,
    pg_pool: web::Data<PgPool>,
) -> Result<impl Responder> {
    let (id,) = path.into_inner();
    let form = form.into_inner();

    if form.from_event_id < 0 {
        return Err(JsonResponse::<models::WebhookSubscription>::build()
            .bad_request("'from_event_id' must be non-negative"));
    }
    if form.from_build_id.is_none() && form.from_event_id != 0 {
        return Err(JsonResponse::<models::WebhookSubscription>::build()
            .bad_request("'from_event_id' needs a 'from_build_id' to anchor it"));
    }

    db::webhook::rewind_cursors(
        pg_pool.get_ref(),
        id,
        &caller.id,
        form.from_build_id,
        form.from_event_id,
    )
    .await
    .map_err(|err| {
        JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err)
    })
    .and_then(|rewound| {
        if rewound {
            Ok(JsonResponse::<models::WebhookSubscription>::build()
                .set_id(id)
                .ok("Replay scheduled"))
        } else {
            Err(JsonResponse::<models::WebhookSubscription>::build().not_found("not found"))
        }
    })
}
