use crate::configuration::Settings;
use crate::db;
use crate::forms;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::{get, post, web, Error, Responder, Result};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Any signed caller reaches the scope; only configured operators get
/// past this check.
fn ensure_operator(caller: &models::Caller, settings: &Settings) -> Result<(), Error> {
    if settings.admin_callers.iter().any(|allowed| allowed == &caller.id) {
        return Ok(());
    }
    Err(JsonResponse::<models::Build>::build().forbidden("Operator access required"))
}

/// Unfiltered ledger view for operators: every event regardless of owner
/// scoping, full payload detail.
#[tracing::instrument(name = "Admin: list build events.", skip(pg_pool, settings))]
#[get("/builds/{id}/events")]
pub async fn events(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    query: web::Query<forms::build::EventsQuery>,
    pg_pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
) -> Result<impl Responder> {
    ensure_operator(&caller, settings.get_ref())?;
    let (build_id,) = path.into_inner();
    let since = query
        .effective_since()
        .map_err(|msg| JsonResponse::<forms::build::EventsPage>::build().bad_request(msg))?;

    let events = db::event::read_since_full(pg_pool.get_ref(), build_id, since)
        .await
        .map_err(|err| {
            JsonResponse::<forms::build::EventsPage>::build().internal_server_error(err)
        })?;

    let watermark = events.last().map(|event| event.event_id).unwrap_or(since);
    let page = forms::build::EventsPage { events, watermark };

    Ok(JsonResponse::build().set_id(build_id).set_item(page).ok("Ok"))
}

/// Dead-letter queue listing. These jobs exhausted their attempts and wait
/// for manual triage.
#[tracing::instrument(name = "Admin: list dead jobs.", skip(pg_pool, settings))]
#[get("/jobs/dead")]
pub async fn dead_jobs(
    caller: web::ReqData<Arc<models::Caller>>,
    pg_pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
) -> Result<impl Responder> {
    ensure_operator(&caller, settings.get_ref())?;
    crate::queue::dead_jobs(pg_pool.get_ref())
        .await
        .map(|jobs| JsonResponse::build().set_list(jobs).ok("Ok"))
        .map_err(|err| JsonResponse::<models::Job>::build().internal_server_error(err))
}

/// Operator cancel: forces a non-terminal build into `failed` and records a
/// terminal event. Workers notice through their cancellation checkpoints.
#[tracing::instrument(name = "Admin: fail build.", skip(pg_pool, settings))]
#[post("/builds/{id}/fail")]
pub async fn fail(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    pg_pool: web::Data<PgPool>,
    settings: web::Data<Settings>,
) -> Result<impl Responder> {
    ensure_operator(&caller, settings.get_ref())?;
    let (build_id,) = path.into_inner();

    let build = db::build::fetch(pg_pool.get_ref(), build_id)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?
        .ok_or_else(|| JsonResponse::<models::Build>::build().not_found("not found"))?;

    let failed = db::build::mark_failed(pg_pool.get_ref(), build.id, "Cancelled by operator")
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    if !failed {
        return Err(
            JsonResponse::<models::Build>::build().conflict("Build is already terminal")
        );
    }

    db::event::append(
        pg_pool.get_ref(),
        build.id,
        None,
        models::Phase::Queue,
        models::EventKind::Failed,
        json!({ "message": "Cancelled by operator" }),
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    Ok(JsonResponse::<models::Build>::build().set_id(build.id).ok("Build failed"))
}
