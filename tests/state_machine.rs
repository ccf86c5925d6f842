mod common;

use sheen::db;
use sheen::models::{self, BuildStatus};
use sqlx::PgPool;
use uuid::Uuid;

async fn seed_build(pool: &PgPool) -> models::Build {
    let project = db::project::upsert(
        pool,
        models::Project::new(Uuid::now_v7(), "user1".to_string(), "app".to_string()),
    )
    .await
    .unwrap();
    db::build::insert(
        pool,
        models::Build::new(
            project.id,
            "user1".to_string(),
            "a todo app".to_string(),
            "hash".to_string(),
        ),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn guarded_transition_follows_the_pipeline() {
    let pool = match common::spawn_db().await {
        Some(pool) => pool,
        None => return,
    };
    let build = seed_build(&pool).await;

    assert!(db::build::transition(&pool, build.id, BuildStatus::Queued, BuildStatus::Planning)
        .await
        .unwrap());

    // Stale expectation matches zero rows.
    assert!(!db::build::transition(&pool, build.id, BuildStatus::Queued, BuildStatus::Planning)
        .await
        .unwrap());

    // Skipping a stage is rejected before touching the database.
    assert!(db::build::transition(&pool, build.id, BuildStatus::Planning, BuildStatus::Deploying)
        .await
        .is_err());
}

#[tokio::test]
async fn trigger_rejects_raw_illegal_updates() {
    let pool = match common::spawn_db().await {
        Some(pool) => pool,
        None => return,
    };
    let build = seed_build(&pool).await;

    // Bypass the application layer entirely; the trigger still holds.
    let result = sqlx::query("UPDATE build SET status = 'deployed' WHERE id = $1")
        .bind(build.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());

    let unchanged = db::build::fetch(&pool, build.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, "queued");
}

#[tokio::test]
async fn terminal_builds_are_immutable() {
    let pool = match common::spawn_db().await {
        Some(pool) => pool,
        None => return,
    };
    let build = seed_build(&pool).await;

    assert!(db::build::mark_failed(&pool, build.id, "boom").await.unwrap());
    // A second failure attempt is a no-op.
    assert!(!db::build::mark_failed(&pool, build.id, "boom again").await.unwrap());

    let row = db::build::fetch(&pool, build.id).await.unwrap().unwrap();
    assert_eq!(row.error.as_deref(), Some("boom"));

    // No way forward out of failed, even through the raw row.
    let result = sqlx::query("UPDATE build SET status = 'planning' WHERE id = $1")
        .bind(build.id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn any_active_stage_may_fail() {
    let pool = match common::spawn_db().await {
        Some(pool) => pool,
        None => return,
    };
    let build = seed_build(&pool).await;

    for (from, to) in [
        (BuildStatus::Queued, BuildStatus::Planning),
        (BuildStatus::Planning, BuildStatus::Executing),
        (BuildStatus::Executing, BuildStatus::Building),
    ] {
        assert!(db::build::transition(&pool, build.id, from, to).await.unwrap());
    }

    assert!(db::build::mark_failed(&pool, build.id, "compile error").await.unwrap());
}
