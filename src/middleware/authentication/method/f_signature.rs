use crate::configuration::Settings;
use crate::helpers::KvManager;
use crate::middleware::authentication::get_header;
use crate::middleware::authentication::signature::{compute_signature, timestamp_in_window};
use crate::models;
use actix_web::{dev::ServiceRequest, web, HttpMessage};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

const NONCE_TTL: Duration = Duration::from_secs(600);

async fn drain_body(req: &mut ServiceRequest) -> Result<web::BytesMut, String> {
    let mut body = web::BytesMut::new();
    let mut payload = req.take_payload();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|err| format!("can't read request body: {err}"))?;
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Shared-secret signature with timestamp + nonce anti-replay. On success
/// the caller identity lands in the request extensions; every failure is
/// rejected at the boundary and logged for audit.
#[tracing::instrument(name = "try authenticate via signature", skip(req))]
pub async fn try_signature(req: &mut ServiceRequest) -> Result<bool, String> {
    let caller = get_header::<String>(req, "x-sheen-caller")?;
    if caller.is_none() {
        return Ok(false);
    }
    let caller = caller.unwrap();

    let timestamp = get_header::<i64>(req, "x-sheen-timestamp")?
        .ok_or_else(|| "x-sheen-timestamp header is not set".to_string())?;
    let nonce = get_header::<String>(req, "x-sheen-nonce")?
        .ok_or_else(|| "x-sheen-nonce header is not set".to_string())?;
    let header_signature = get_header::<String>(req, "x-sheen-signature")?
        .ok_or_else(|| "x-sheen-signature header is not set".to_string())?;

    let now = chrono::Utc::now().timestamp();
    if !timestamp_in_window(timestamp, now) {
        tracing::warn!(caller = %caller, timestamp, "signature timestamp outside tolerance");
        return Err("request timestamp outside tolerance".to_string());
    }

    let kv = req
        .app_data::<web::Data<KvManager>>()
        .ok_or_else(|| "kv manager is not configured".to_string())?
        .get_ref()
        .clone();
    let fresh = kv
        .claim(&format!("nonce:{}", nonce), &caller, NONCE_TTL)
        .await?;
    if !fresh {
        tracing::warn!(caller = %caller, nonce = %nonce, "replayed nonce rejected");
        return Err("nonce already used".to_string());
    }

    let settings = req
        .app_data::<web::Data<Settings>>()
        .ok_or_else(|| "settings are not configured".to_string())?;
    let secret = settings.shared_secret.clone();

    let method = req.method().as_str().to_string();
    let path = req.path().to_string();

    let body = drain_body(req).await?;
    let expected = compute_signature(&secret, &caller, timestamp, &nonce, &method, &path, &body);

    // hand the body back to the handler
    let (_, mut payload) = actix_http::h1::Payload::create(true);
    payload.unread_data(body.into());
    req.set_payload(payload.into());

    if expected != header_signature {
        tracing::warn!(caller = %caller, "signature mismatch");
        return Err("signature is wrong".to_string());
    }

    let caller = models::Caller { id: caller };
    if req.extensions_mut().insert(Arc::new(caller)).is_some() {
        tracing::error!("caller already set on request");
        return Err("".to_string());
    }

    Ok(true)
}
