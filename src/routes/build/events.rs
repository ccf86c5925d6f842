use crate::db;
use crate::forms;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::{get, web, Responder, Result};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Incremental poll over a build's ledger. The returned watermark is the
/// last event id in the page; feeding it back as `since` never skips and
/// never repeats an event.
#[tracing::instrument(name = "Poll build events.", skip(pg_pool))]
#[get("/{id}/events")]
pub async fn list(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    query: web::Query<forms::build::EventsQuery>,
    pg_pool: web::Data<PgPool>,
) -> Result<impl Responder> {
    let (build_id,) = path.into_inner();

    let since = query
        .effective_since()
        .map_err(|msg| JsonResponse::<forms::build::EventsPage>::build().bad_request(msg))?;

    build_visible(pg_pool.get_ref(), build_id).await?;

    let events = db::event::read_since(pg_pool.get_ref(), build_id, since, &caller.id)
        .await
        .map_err(|err| {
            JsonResponse::<forms::build::EventsPage>::build().internal_server_error(err)
        })?;

    let watermark = events.last().map(|event| event.event_id).unwrap_or(since);
    let page = forms::build::EventsPage { events, watermark };

    Ok(JsonResponse::build().set_id(build_id).set_item(page).ok("Ok"))
}

/// Any authenticated caller may watch a build; per-event owner scoping in
/// the read queries keeps task-level detail private to the build's owner.
pub(super) async fn build_visible(
    pool: &PgPool,
    build_id: Uuid,
) -> Result<models::Build, actix_web::Error> {
    db::build::fetch(pool, build_id)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))
        .and_then(|build| {
            build.ok_or_else(|| JsonResponse::<models::Build>::build().not_found("not found"))
        })
}
