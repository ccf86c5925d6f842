use crate::configuration::Settings;
use crate::db;
use crate::helpers::{JsonResponse, KvManager};
use crate::models;
use crate::streaming::{StreamHub, StreamKey, StreamRole};
use actix_web::http::header;
use actix_web::{get, web, Error, HttpResponse, Result};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub project_id: Uuid,
    #[serde(rename = "userId")]
    pub owner_id: String,
}

/// Live project feed over SSE. The first connection for an
/// (owner, project) pair is told it is the leader; later ones are
/// followers and may relay from the leader client-side instead of
/// consuming their own upstream copy. Every connection still gets the
/// full feed here; the role is advisory.
#[tracing::instrument(name = "Open event stream.", skip(pg_pool, kv, hub, settings))]
#[get("")]
pub async fn subscribe(
    caller: web::ReqData<Arc<models::Caller>>,
    query: web::Query<StreamQuery>,
    pg_pool: web::Data<PgPool>,
    kv: web::Data<KvManager>,
    hub: web::Data<StreamHub>,
    settings: web::Data<Settings>,
) -> Result<HttpResponse, Error> {
    let query = query.into_inner();
    if query.owner_id != caller.id {
        return Err(JsonResponse::<models::Event>::build()
            .forbidden("Cannot stream on behalf of another user"));
    }

    let ceiling_key = format!("stream:{}:{}", query.owner_id, query.project_id);
    let ceiling_ttl = Duration::from_secs(settings.stream.idle_timeout_secs * 2);
    let count = kv
        .incr_with_ttl(&ceiling_key, ceiling_ttl)
        .await
        .map_err(|err| JsonResponse::<models::Event>::build().internal_server_error(err))?;

    if count > settings.stream.max_connections_per_key {
        let _ = kv.decr_floor_zero(&ceiling_key).await;
        // Needs a Retry-After header, which the json helper cannot carry.
        return Ok(HttpResponse::TooManyRequests()
            .insert_header((header::RETRY_AFTER, settings.stream.retry_after_secs.to_string()))
            .json(json!({
                "status": "Error",
                "message": "Too many live connections for this project",
                "code": 429,
            })));
    }

    let key = StreamKey {
        owner_id: query.owner_id.clone(),
        project_id: query.project_id,
    };
    let (conn_id, role) = hub.join(key.clone()).await;

    let guard = StreamGuard {
        hub: hub.clone(),
        kv: kv.clone(),
        key,
        conn_id,
        ceiling_key,
    };

    let poll = Duration::from_millis(settings.stream.poll_interval_ms);
    let idle = Duration::from_secs(settings.stream.idle_timeout_secs);
    let state = SseState {
        pg_pool: pg_pool.get_ref().clone(),
        project_id: query.project_id,
        viewer_id: query.owner_id,
        // no cursors yet: the feed starts with every event of every build
        // in the project, then tracks each build independently.
        cursors: HashMap::new(),
        role,
        conn_id,
        hello_sent: false,
        idle_deadline: Instant::now() + idle,
        poll,
        idle,
        _guard: guard,
    };

    let body = futures::stream::unfold(state, next_frame);

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body))
}

const PAGE_LIMIT: i64 = 256;

struct SseState {
    pg_pool: PgPool,
    project_id: Uuid,
    viewer_id: String,
    // per-build delivery cursor: last event id sent for each build, so a
    // burst on a newer build never hides later events of an older one
    cursors: HashMap<Uuid, i64>,
    role: StreamRole,
    conn_id: u64,
    hello_sent: bool,
    idle_deadline: Instant,
    poll: Duration,
    idle: Duration,
    _guard: StreamGuard,
}

async fn next_frame(
    mut st: SseState,
) -> Option<(Result<web::Bytes, std::convert::Infallible>, SseState)> {
    if !st.hello_sent {
        st.hello_sent = true;
        let frame = sse_frame(
            "hello",
            &json!({ "role": st.role, "connection_id": st.conn_id }),
        );
        return Some((Ok(frame), st));
    }

    loop {
        tokio::time::sleep(st.poll).await;

        if Instant::now() >= st.idle_deadline {
            // Idle reap: nothing flowed for the whole window.
            return None;
        }

        // Leader disconnects promote a follower; tell it.
        if let Some(role) = st.hub_role().await {
            if role != st.role {
                st.role = role;
                let frame = sse_frame("role", &json!({ "role": st.role }));
                return Some((Ok(frame), st));
            }
        }

        let cursors: Vec<(Uuid, i64)> = st
            .cursors
            .iter()
            .map(|(build_id, event_id)| (*build_id, *event_id))
            .collect();
        let events = match db::event::read_project_since(
            &st.pg_pool,
            st.project_id,
            &cursors,
            &st.viewer_id,
            PAGE_LIMIT,
        )
        .await
        {
            Ok(events) => events,
            Err(err) => {
                tracing::error!("stream poll failed, closing connection: {}", err);
                return None;
            }
        };

        if events.is_empty() {
            continue;
        }

        st.idle_deadline = Instant::now() + st.idle;

        let mut buf = String::new();
        for event in &events {
            st.cursors.insert(event.build_id, event.event_id);
            buf.push_str(&sse_event_frame(event));
        }
        return Some((Ok(web::Bytes::from(buf)), st));
    }
}

impl SseState {
    async fn hub_role(&self) -> Option<StreamRole> {
        self._guard.hub.role_of(&self._guard.key, self.conn_id).await
    }
}

fn sse_frame(event: &str, data: &serde_json::Value) -> web::Bytes {
    web::Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
}

fn sse_event_frame(event: &models::Event) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("id: {}\nevent: {}\ndata: {}\n\n", event.event_id, event.kind, data)
}

/// Ties connection-scoped bookkeeping to the response stream's lifetime.
/// Dropping the stream (client hang-up, idle reap) releases the hub slot
/// and the Redis ceiling count.
struct StreamGuard {
    hub: web::Data<StreamHub>,
    kv: web::Data<KvManager>,
    key: StreamKey,
    conn_id: u64,
    ceiling_key: String,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let kv = self.kv.clone();
        let key = self.key.clone();
        let conn_id = self.conn_id;
        let ceiling_key = self.ceiling_key.clone();
        tokio::spawn(async move {
            hub.leave(&key, conn_id).await;
            let _ = kv.decr_floor_zero(&ceiling_key).await;
        });
    }
}
