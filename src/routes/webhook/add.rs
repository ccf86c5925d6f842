use crate::db;
use crate::forms;
use crate::helpers::JsonResponse;
use crate::models;
use actix_web::Error;
use actix_web::{
    post, web,
    web::{Bytes, Data},
    Responder, Result,
};
use serde_valid::Validate;
use sqlx::PgPool;
use std::str;
use std::sync::Arc;

#[tracing::instrument(name = "Add webhook subscription.", skip(body, pg_pool))]
#[post("")]
pub async fn add(
    body: Bytes,
    caller: web::ReqData<Arc<models::Caller>>,
    pg_pool: Data<PgPool>,
) -> Result<impl Responder> {
    let form = body_into_form(body).await?;

    // The subscription row references the project; an unknown id would
    // otherwise surface as a foreign-key 500.
    db::project::fetch(pg_pool.get_ref(), form.project_id)
        .await
        .map_err(|err| {
            JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err)
        })?
        .ok_or_else(|| {
            JsonResponse::<models::WebhookSubscription>::build().not_found("Unknown project")
        })?;

    let subscription = models::WebhookSubscription::new(
        caller.id.clone(),
        form.project_id,
        form.url,
        form.secret,
    );

    db::webhook::insert(pg_pool.get_ref(), subscription)
        .await
        .map(|subscription| JsonResponse::build().set_item(subscription).created("Ok"))
        .map_err(|err| {
            JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err)
        })
}

async fn body_into_form(body: Bytes) -> Result<forms::webhook::WebhookForm, Error> {
    let body_str = str::from_utf8(&body).map_err(|err| {
        JsonResponse::<models::WebhookSubscription>::build().internal_server_error(err.to_string())
    })?;
    let deserializer = &mut serde_json::Deserializer::from_str(body_str);
    serde_path_to_error::deserialize(deserializer)
        .map_err(|err| {
            let msg = format!("{}:{:?}", err.path().to_string(), err);
            JsonResponse::<models::WebhookSubscription>::build().bad_request(msg)
        })
        .and_then(|form: forms::webhook::WebhookForm| {
            if let Err(errors) = form.validate() {
                tracing::debug!("invalid webhook form: {}", errors);
                return Err(JsonResponse::<models::WebhookSubscription>::build()
                    .form_error(errors.to_string()));
            }
            Ok(form)
        })
}
