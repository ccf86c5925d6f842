mod common;

use serde_json::{json, Value};
use sheen::db;
use sheen::models;
use uuid::Uuid;

async fn seed_project(app: &common::TestApp, owner: &str) -> models::Project {
    db::project::upsert(
        &app.db_pool,
        models::Project::new(Uuid::now_v7(), owner.to_string(), "app".to_string()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn subscription_lifecycle() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };
    let project_id = seed_project(&app, "user1").await.id;

    let created = app
        .post(
            "user1",
            "/webhooks",
            json!({
                "project_id": project_id,
                "url": "https://hooks.example/sheen",
                "secret": "0123456789abcdef",
            }),
        )
        .await;
    assert!(created.status().is_success());
    let created: Value = created.json().await.unwrap();
    let id: Uuid = serde_json::from_value(created["item"]["id"].clone()).unwrap();
    // The secret never comes back.
    assert!(created["item"].get("secret").is_none());

    let listed = app.get("user1", "/webhooks").await;
    let listed: Value = listed.json().await.unwrap();
    assert_eq!(listed["list"].as_array().unwrap().len(), 1);

    // Another user sees nothing and cannot delete it.
    let other = app.get("user2", "/webhooks").await;
    let other: Value = other.json().await.unwrap();
    assert_eq!(other["list"].as_array().unwrap().len(), 0);

    let headers = app.sign("user2", "DELETE", &format!("/webhooks/{}", id), b"");
    let response = reqwest::Client::new()
        .delete(format!("{}/webhooks/{}", app.address, id))
        .header("x-sheen-caller", headers.caller)
        .header("x-sheen-timestamp", headers.timestamp.to_string())
        .header("x-sheen-nonce", headers.nonce)
        .header("x-sheen-signature", headers.signature)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let headers = app.sign("user1", "DELETE", &format!("/webhooks/{}", id), b"");
    let response = reqwest::Client::new()
        .delete(format!("{}/webhooks/{}", app.address, id))
        .header("x-sheen-caller", headers.caller)
        .header("x-sheen-timestamp", headers.timestamp.to_string())
        .header("x-sheen-nonce", headers.nonce)
        .header("x-sheen-signature", headers.signature)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn subscription_for_unknown_project_is_rejected() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let response = app
        .post(
            "user1",
            "/webhooks",
            json!({
                "project_id": Uuid::now_v7(),
                "url": "https://hooks.example/sheen",
                "secret": "0123456789abcdef",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn invalid_subscription_forms_are_rejected() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let bad_url = app
        .post(
            "user1",
            "/webhooks",
            json!({
                "project_id": Uuid::now_v7(),
                "url": "ftp://hooks.example",
                "secret": "0123456789abcdef",
            }),
        )
        .await;
    assert_eq!(bad_url.status().as_u16(), 400);

    let short_secret = app
        .post(
            "user1",
            "/webhooks",
            json!({
                "project_id": Uuid::now_v7(),
                "url": "https://hooks.example",
                "secret": "short",
            }),
        )
        .await;
    assert_eq!(short_secret.status().as_u16(), 400);
}

#[tokio::test]
async fn replay_rewinds_only_own_subscriptions() {
    let app = match common::spawn_app().await {
        Some(app) => app,
        None => return,
    };

    let project_id = seed_project(&app, "user1").await.id;
    let created = app
        .post(
            "user1",
            "/webhooks",
            json!({
                "project_id": project_id,
                "url": "https://hooks.example/sheen",
                "secret": "0123456789abcdef",
            }),
        )
        .await;
    let created: Value = created.json().await.unwrap();
    let id: Uuid = serde_json::from_value(created["item"]["id"].clone()).unwrap();

    let replay = app
        .post("user1", &format!("/webhooks/{}/replay", id), json!({ "from_event_id": 0 }))
        .await;
    assert!(replay.status().is_success());

    let foreign = app
        .post("user2", &format!("/webhooks/{}/replay", id), json!({ "from_event_id": 0 }))
        .await;
    assert_eq!(foreign.status().as_u16(), 404);
}
