use crate::db;
use crate::helpers::JsonResponse;
use crate::models::{self, BuildStatus};
use actix_web::{post, web, Responder, Result};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Rollback never resurrects a terminal build. It creates a fresh build
/// pointing back at the target through `parent_build_id` and replays the
/// target's prompt through the normal pipeline.
#[tracing::instrument(name = "Rollback build.", skip(pg_pool, settings))]
#[post("/{id}/rollback")]
pub async fn add(
    caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    pg_pool: web::Data<PgPool>,
    settings: web::Data<crate::configuration::Settings>,
) -> Result<impl Responder> {
    let (build_id,) = path.into_inner();

    let target = db::build::fetch(pg_pool.get_ref(), build_id)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?
        .ok_or_else(|| JsonResponse::<models::Build>::build().not_found("not found"))?;

    if target.owner_id != caller.id {
        return Err(JsonResponse::<models::Build>::build()
            .forbidden("Only the build owner may roll back"));
    }

    let status = target
        .status()
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;
    if status != BuildStatus::Deployed {
        return Err(JsonResponse::<models::Build>::build()
            .conflict("Only deployed builds can be rolled back to"));
    }

    let mut replay = models::Build::new(
        target.project_id,
        target.owner_id.clone(),
        target.prompt.clone(),
        target.prompt_hash.clone(),
    );
    replay.parent_build_id = Some(target.id);
    replay.artifact_url = target.artifact_url.clone();
    replay.checksum = target.checksum.clone();

    let replay = db::build::insert(pg_pool.get_ref(), replay)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    db::event::append(
        pg_pool.get_ref(),
        replay.id,
        None,
        models::Phase::Queue,
        models::EventKind::Started,
        json!({
            "message": "Rollback requested",
            "parent_build_id": target.id,
        }),
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    crate::queue::enqueue(
        pg_pool.get_ref(),
        models::QUEUE_PLAN,
        replay.id,
        json!({}),
        settings.queue.max_attempts,
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    Ok(JsonResponse::build().set_item(replay).created("Rollback accepted"))
}
