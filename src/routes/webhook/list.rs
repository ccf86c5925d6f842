use crate::db;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::{get, web, Responder, Result};
use sqlx::PgPool;
use std::sync::Arc;

#[tracing::instrument(name = "List webhook subscriptions.", skip(pg_pool))]
#[get("")]
pub async fn list(
    caller: web::ReqData<Arc<models::Caller>>,
    pg_pool: web::Data<PgPool>,
) -> Result<impl Responder> {
    db::webhook::fetch_by_owner(pg_pool.get_ref(), &caller.id)
        .await
        .map(|subscriptions| JsonResponse::build().set_list(subscriptions).ok("Ok"))
        .map_err(|err| {
            JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err)
        })
}
