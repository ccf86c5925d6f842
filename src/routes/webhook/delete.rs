use crate::db;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::{delete, web, Responder, Result};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

#[tracing::instrument(name = "Delete webhook subscription.", skip(pg_pool))]
#[delete("/{id}")]
pub async fn item(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    pg_pool: web::Data<PgPool>,
) -> Result<impl Responder> {
    let (id,) = path.into_inner();

    db::webhook::delete(pg_pool.get_ref(), id, &caller.id)
        .await
        .map_err(|err| {
            JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err)
        })
        .and_then(|deleted| {
            if deleted {
                Ok(JsonResponse::<models::WebhookSubscription>::build()
                    .set_id(id)
                    .ok("Deleted"))
            } else {
                Err(JsonResponse::<models::WebhookSubscription>::build().not_found("not found"))
            }
        })
}
