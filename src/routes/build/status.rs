use crate::forms;
use crate::helpers::JsonResponse;
use actix_web::{get, web, Responder, Result};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::models;

use super::events::build_visible;

/// Coarse status snapshot, derived from the build row alone. Clients that
/// only need a progress bar hit this instead of replaying the ledger.
#[tracing::instrument(name = "Get build status.", skip(pg_pool))]
#[get("/{id}/status")]
pub async fn item(
    _caller: web::ReqData<Arc<models::Caller>>,
    path: web::Path<(Uuid,)>,
    pg_pool: web::Data<PgPool>,
) -> Result<impl Responder> {
    let (build_id,) = path.into_inner();

    let build = build_visible(pg_pool.get_ref(), build_id).await?;

    let view = forms::build::StatusView::from_build(&build).map_err(|err| {
        JsonResponse::<forms::build::StatusView>::build().internal_server_error(err)
    })?;

    Ok(JsonResponse::build().set_id(build_id).set_item(view).ok("Ok"))
}
