use crate::db;
use crate::forms;
use crate::helpers::{JsonResponse, KvManager};
use crate::models;
use actix_web::Error;
use actix_web::{
    post, web,
    web::{Bytes, Data},
    Responder, Result,
};
use serde_json::json;
use serde_valid::Validate;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::str;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How long a prompt stays "the same request". A retry inside this window
/// returns the original build instead of starting a second one.
const DEDUP_WINDOW_SECS: u64 = 600;

/// A lost dedup claim is re-checked this many times while the winner's
/// insert is presumed in flight.
const LOST_CLAIM_RETRIES: u32 = 5;
const LOST_CLAIM_RETRY_DELAY: Duration = Duration::from_millis(100);

#[tracing::instrument(name = "Create build.", skip(body, pg_pool, kv, settings))]
#[post("")]
pub async fn add(
    body: Bytes,
    caller: web::ReqData<Arc<models::Caller>>,
    pg_pool: Data<PgPool>,
    kv: Data<KvManager>,
    settings: Data<crate::configuration::Settings>,
) -> Result<impl Responder> {
    let form = body_into_form(body).await?;

    if form.owner_id != caller.id {
        return Err(JsonResponse::<models::Build>::build()
            .forbidden("Cannot create builds on behalf of another user"));
    }

    let project = db::project::upsert(
        pg_pool.get_ref(),
        models::Project::new(
            form.project_id,
            form.owner_id.clone(),
            format!("project-{}", form.project_id),
        ),
    )
    .await
    .map_err(|err| JsonResponse::<models::Project>::build().internal_server_error(err))?;

    if project.owner_id != caller.id {
        return Err(JsonResponse::<models::Build>::build()
            .forbidden("Project belongs to another user"));
    }

    let prompt_hash = format!("{:x}", Sha256::digest(form.prompt.as_bytes()));

    let build = models::Build::new(
        form.project_id,
        form.owner_id.clone(),
        form.prompt.clone(),
        prompt_hash.clone(),
    );

    // Claim the dedup key before inserting. Losing the claim means an
    // identical request is already in flight; hand its build back.
    let dedup_key = format!("buildreq:{}:{}:{}", form.owner_id, form.project_id, prompt_hash);
    let claimed = kv
        .claim(
            &dedup_key,
            &build.id.to_string(),
            Duration::from_secs(DEDUP_WINDOW_SECS),
        )
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    if !claimed {
        // The claim holder may still be between claiming the key and
        // committing its insert; give the row a moment to land before
        // concluding the claim points at nothing.
        for attempt in 0..LOST_CLAIM_RETRIES {
            if let Some(existing) =
                existing_build(pg_pool.get_ref(), &kv, &dedup_key, &form).await?
            {
                return Ok(JsonResponse::build().set_item(existing).ok("Ok"));
            }
            if attempt + 1 < LOST_CLAIM_RETRIES {
                tokio::time::sleep(LOST_CLAIM_RETRY_DELAY).await;
            }
        }
        // The window expired with no row behind it; fall through and
        // create a fresh build.
    }

    let build = db::build::insert(pg_pool.get_ref(), build)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    db::event::append(
        pg_pool.get_ref(),
        build.id,
        None,
        models::Phase::Queue,
        models::EventKind::Started,
        json!({ "message": "Build request accepted" }),
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    crate::queue::enqueue(
        pg_pool.get_ref(),
        models::QUEUE_PLAN,
        build.id,
        json!({}),
        settings.queue.max_attempts,
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    Ok(JsonResponse::build().set_item(build).created("Build accepted"))
}

async fn existing_build(
    pool: &PgPool,
    kv: &KvManager,
    dedup_key: &str,
    form: &forms::build::CreateBuildForm,
) -> Result<Option<models::Build>, Error> {
    let cached = kv
        .get(dedup_key)
        .await
        .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;

    if let Some(id) = cached.and_then(|raw| Uuid::parse_str(&raw).ok()) {
        let found = db::build::fetch(pool, id)
            .await
            .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))?;
        if found.is_some() {
            return Ok(found);
        }
    }

    // Redis lost the mapping; the database still remembers the window.
    let prompt_hash = format!("{:x}", Sha256::digest(form.prompt.as_bytes()));
    db::build::fetch_recent_by_prompt(
        pool,
        form.project_id,
        &form.owner_id,
        &prompt_hash,
        DEDUP_WINDOW_SECS as i64,
    )
    .await
    .map_err(|err| JsonResponse::<models::Build>::build().internal_server_error(err))
}

async fn body_into_form(body: Bytes) -> Result<forms::build::CreateBuildForm, Error> {
    let body_str = str::from_utf8(&body).map_err(|err| {
        JsonResponse::<models::Build>::build().internal_server_error(err.to_string())
    })?;
    let deserializer = &mut serde_json::Deserializer::from_str(body_str);
    serde_path_to_error::deserialize(deserializer)
        .map_err(|err| {
            let msg = format!("{}:{:?}", err.path().to_string(), err);
            JsonResponse::<models::Build>::build().bad_request(msg)
        })
        .and_then(|form: forms::build::CreateBuildForm| {
            if let Err(errors) = form.validate() {
                let err_msg = format!("Invalid data received {:?}", errors.to_string());
                tracing::debug!(err_msg);
                return Err(JsonResponse::<models::Build>::build().form_error(errors.to_string()));
            }
            Ok(form)
        })
}
