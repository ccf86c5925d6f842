mod common;

use sheen::db;
use sheen::models::{self, EventKind, Phase};
use serde_json::{json, Value};
use uuid::Uuid;

async fn seed_build(app: &common::TestApp, owner: &str) -> models::Build {
    let project = db::project::upsert(
        &app.db_pool,
        models::Project::new(Uuid::now_v7(), owner.to_string(), "app".to_string()),
    )
    .await
    .unwrap();
    db::build::insert(
        &app.db_pool,
        models::Build::new(
            project.id,
            owner.to_string(),
            "a todo app".to_string(),
            "hash".to_string(),
        ),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn admin_events_bypass_owner_scoping() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let build = seed_build(&app, "alice").await;

    db::event::append(&app.db_pool, build.id, None, Phase::Plan, EventKind::Started, json!({}))
        .await
        .unwrap();
    db::event::append(
        &app.db_pool,
        build.id,
        Some("alice"),
        Phase::Task,
        EventKind::Progress,
        json!({ "detail": "private" }),
    )
    .await
    .unwrap();

    let response = app
        .get("operator", &format!("/admin/builds/{}/events", build.id))
        .await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["item"]["events"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn operator_fail_settles_an_active_build() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let build = seed_build(&app, "alice").await;

    let response = app
        .post("operator", &format!("/admin/builds/{}/fail", build.id), json!({}))
        .await;
    assert!(response.status().is_success());

    let row = db::build::fetch(&app.db_pool, build.id).await.unwrap().unwrap();
    assert_eq!(row.status, "failed");

    // Failing twice conflicts; the build is already terminal.
    let again = app
        .post("operator", &format!("/admin/builds/{}/fail", build.id), json!({}))
        .await;
    assert_eq!(again.status().as_u16(), 409);

    let events = db::event::read_since_full(&app.db_pool, build.id, 0).await.unwrap();
    assert_eq!(events.last().unwrap().kind, "failed");
}

#[tokio::test]
async fn dead_letter_listing_surfaces_exhausted_jobs() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let build = seed_build(&app, "alice").await;

    sheen::queue::enqueue(&app.db_pool, models::QUEUE_PLAN, build.id, json!({}), 1)
        .await
        .unwrap();
    let job = sheen::queue::lease(&app.db_pool, models::QUEUE_PLAN, std::time::Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();
    sheen::queue::fail(
        &app.db_pool,
        &job,
        "tool crashed",
        true,
        std::time::Duration::from_secs(5),
        std::time::Duration::from_secs(300),
    )
    .await
    .unwrap();

    let response = app.get("operator", "/admin/jobs/dead").await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    let dead = body["list"].as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["last_error"], "tool crashed");
}

#[tokio::test]
async fn non_operators_are_refused() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let build = seed_build(&app, "alice").await;

    let listing = app.get("alice", "/admin/jobs/dead").await;
    assert_eq!(listing.status().as_u16(), 403);

    let events = app
        .get("alice", &format!("/admin/builds/{}/events", build.id))
        .await;
    assert_eq!(events.status().as_u16(), 403);

    let fail = app
        .post("alice", &format!("/admin/builds/{}/fail", build.id), json!({}))
        .await;
    assert_eq!(fail.status().as_u16(), 403);

    // The build is untouched by the refused cancel.
    let row = db::build::fetch(&app.db_pool, build.id).await.unwrap().unwrap();
    assert_eq!(row.status, "queued");
}
