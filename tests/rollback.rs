mod common;

use sheen::db;
use sheen::models::{self, BuildStatus};
use serde_json::{json, Value};
use uuid::Uuid;

async fn seed_deployed_build(app: &common::TestApp, owner: &str) -> models::Build {
    let project = db::project::upsert(
        &app.db_pool,
        models::Project::new(Uuid::now_v7(), owner.to_string(), "app".to_string()),
    )
    .await
    .unwrap();
    let build = db::build::insert(
        &app.db_pool,
        models::Build::new(
            project.id,
            owner.to_string(),
            "a todo app".to_string(),
            "hash".to_string(),
        ),
    )
    .await
    .unwrap();

    for (from, to) in [
        (BuildStatus::Queued, BuildStatus::Planning),
        (BuildStatus::Planning, BuildStatus::Executing),
        (BuildStatus::Executing, BuildStatus::Building),
        (BuildStatus::Building, BuildStatus::Deploying),
        (BuildStatus::Deploying, BuildStatus::Deployed),
    ] {
        assert!(db::build::transition(&app.db_pool, build.id, from, to).await.unwrap());
    }

    sqlx::query("UPDATE build SET artifact_url = 'https://app.example.test' WHERE id = $1")
        .bind(build.id)
        .execute(&app.db_pool)
        .await
        .unwrap();

    db::build::fetch(&app.db_pool, build.id).await.unwrap().unwrap()
}

#[tokio::test]
async fn rollback_creates_a_fresh_build_referencing_the_target() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let target = seed_deployed_build(&app, "user1").await;

    let response = app
        .post("user1", &format!("/builds/{}/rollback", target.id), json!({}))
        .await;
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();

    let replay_id: Uuid = serde_json::from_value(body["item"]["id"].clone()).unwrap();
    assert_ne!(replay_id, target.id);

    let replay = db::build::fetch(&app.db_pool, replay_id).await.unwrap().unwrap();
    assert_eq!(replay.status, "queued");
    assert_eq!(replay.parent_build_id, Some(target.id));
    assert_eq!(replay.artifact_url, target.artifact_url);

    // The target row is untouched.
    let target_after = db::build::fetch(&app.db_pool, target.id).await.unwrap().unwrap();
    assert_eq!(target_after.status, "deployed");

    let (jobs,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM job WHERE build_id = $1 AND queue = 'plan'")
            .bind(replay_id)
            .fetch_one(&app.db_pool)
            .await
            .unwrap();
    assert_eq!(jobs, 1);
}

#[tokio::test]
async fn only_deployed_builds_roll_back() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let project = db::project::upsert(
        &app.db_pool,
        models::Project::new(Uuid::now_v7(), "user1".to_string(), "app".to_string()),
    )
    .await
    .unwrap();
    let build = db::build::insert(
        &app.db_pool,
        models::Build::new(
            project.id,
            "user1".to_string(),
            "still running".to_string(),
            "hash".to_string(),
        ),
    )
    .await
    .unwrap();

    let response = app
        .post("user1", &format!("/builds/{}/rollback", build.id), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn rollback_is_owner_only() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let target = seed_deployed_build(&app, "user1").await;

    let response = app
        .post("user2", &format!("/builds/{}/rollback", target.id), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 403);
}
