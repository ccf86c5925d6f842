mod common;

use serde_json::{json, Value};
use uuid::Uuid;

fn create_body(owner: &str, project_id: Uuid, prompt: &str) -> Value {
    json!({
        "userId": owner,
        "projectId": project_id,
        "prompt": prompt,
    })
}

#[tokio::test]
async fn unsigned_request_is_rejected() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let response = reqwest::Client::new()
        .post(format!("{}/builds", app.address))
        .json(&create_body("user1", Uuid::now_v7(), "a todo app"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn caller_cannot_create_for_another_user() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let response = app
        .post("alice", "/builds", create_body("bob", Uuid::now_v7(), "a todo app"))
        .await;

    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn create_build_accepts_and_enqueues() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let project_id = Uuid::now_v7();
    let response = app
        .post("user1", "/builds", create_body("user1", project_id, "a todo app"))
        .await;
    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("invalid json");
    assert_eq!(body["status"], "OK");
    let build_id: Uuid = serde_json::from_value(body["item"]["id"].clone()).unwrap();
    assert_eq!(body["item"]["status"], "queued");

    let build = sheen::db::build::fetch(&app.db_pool, build_id)
        .await
        .unwrap()
        .expect("build row missing");
    assert_eq!(build.project_id, project_id);

    // One queued event, one plan job.
    let events = sheen::db::event::read_since(&app.db_pool, build_id, 0, "user1")
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, 1);
    assert_eq!(events[0].phase, "queue");

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM job WHERE build_id = $1 AND queue = 'plan'")
            .bind(build_id)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn identical_prompt_within_window_returns_same_build() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let project_id = Uuid::now_v7();
    let body = create_body("user1", project_id, "a recipe book");

    let first = app.post("user1", "/builds", body.clone()).await;
    assert!(first.status().is_success());
    let first: Value = first.json().await.unwrap();

    let second = app.post("user1", "/builds", body).await;
    assert!(second.status().is_success());
    let second: Value = second.json().await.unwrap();

    assert_eq!(first["item"]["id"], second["item"]["id"]);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM build WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn events_endpoint_pages_with_watermark() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let project_id = Uuid::now_v7();
    let response = app
        .post("user1", "/builds", create_body("user1", project_id, "a blog"))
        .await;
    let created: Value = response.json().await.unwrap();
    let build_id: Uuid = serde_json::from_value(created["item"]["id"].clone()).unwrap();

    let page = app
        .get("user1", &format!("/builds/{}/events", build_id))
        .await;
    assert!(page.status().is_success());
    let page: Value = page.json().await.unwrap();
    let watermark = page["item"]["watermark"].as_i64().unwrap();
    assert_eq!(watermark, 1);

    // Re-polling from the watermark returns nothing new.
    let next = app
        .get(
            "user1",
            &format!("/builds/{}/events?since={}", build_id, watermark),
        )
        .await;
    let next: Value = next.json().await.unwrap();
    assert_eq!(next["item"]["events"].as_array().unwrap().len(), 0);
    assert_eq!(next["item"]["watermark"].as_i64().unwrap(), watermark);

    // Both bounds at once is ambiguous.
    let bad = app
        .get(
            "user1",
            &format!("/builds/{}/events?since=0&until=5", build_id),
        )
        .await;
    assert_eq!(bad.status().as_u16(), 400);
}

#[tokio::test]
async fn status_endpoint_reports_queued_progress() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let response = app
        .post("user1", "/builds", create_body("user1", Uuid::now_v7(), "a shop"))
        .await;
    let created: Value = response.json().await.unwrap();
    let build_id: Uuid = serde_json::from_value(created["item"]["id"].clone()).unwrap();

    let status = app
        .get("user1", &format!("/builds/{}/status", build_id))
        .await;
    assert!(status.status().is_success());
    let status: Value = status.json().await.unwrap();
    assert_eq!(status["item"]["status"], "queued");
    assert_eq!(status["item"]["finished"], false);
}

#[tokio::test]
async fn lost_dedup_claim_waits_for_the_winners_insert() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let configuration = sheen::configuration::get_configuration().unwrap();
    let kv = sheen::helpers::KvManager::try_new(configuration.redis.connection_string())
        .await
        .unwrap();

    let owner = "user1";
    let prompt = format!("a todo app {}", Uuid::new_v4());
    let project = sheen::db::project::upsert(
        &app.db_pool,
        sheen::models::Project::new(Uuid::now_v7(), owner.to_string(), "app".to_string()),
    )
    .await
    .unwrap();

    // Another request already claimed the window but has not committed its
    // row yet; it lands only a moment later.
    use sha2::Digest;
    let prompt_hash = format!("{:x}", sha2::Sha256::digest(prompt.as_bytes()));
    let winner = sheen::models::Build::new(
        project.id,
        owner.to_string(),
        prompt.clone(),
        prompt_hash.clone(),
    );
    let claimed = kv
        .claim(
            &format!("buildreq:{}:{}:{}", owner, project.id, prompt_hash),
            &winner.id.to_string(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();
    assert!(claimed);

    let pool = app.db_pool.clone();
    let in_flight = winner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        let _ = sheen::db::build::insert(&pool, in_flight).await;
    });

    let response = app
        .post(owner, "/builds", create_body(owner, project.id, &prompt))
        .await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    let returned: Uuid = serde_json::from_value(body["item"]["id"].clone()).unwrap();
    assert_eq!(returned, winner.id);

    // No second build was created for the same request.
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM build WHERE project_id = $1")
        .bind(project.id)
        .fetch_one(&app.db_pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}
