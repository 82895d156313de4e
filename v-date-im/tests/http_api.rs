//! HTTP 接口集成测试 / HTTP surface integration tests

mod common;

use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;

use common::*;
use v_date_im::domain::{Allowances, Usage};
use v_date_im::router;
use v_date_im::service::webhook::sign;

macro_rules! app {
    ($server:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($server.clone()))
                .configure(router::configure),
        )
        .await
    };
}

fn bearer(user: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token(user)))
}

#[actix_rt::test]
async fn test_send_requires_a_valid_bearer() {
    let server = Arc::new(
        seeded_server(vec![
            subscription("s-a", "alice", messages(Some(1))),
            subscription("s-b", "bob", messages(None)),
        ])
        .await,
    );
    let app = app!(server);
    let body = json!({"peer_user_id": "bob", "body": "hi", "client_correlation_id": "c1"});

    let resp = test::call_service(&app, test::TestRequest::post().uri("/v1/message/send").set_json(&body).to_request()).await;
    assert_eq!(resp.status().as_u16(), 401);

    let req = test::TestRequest::post()
        .uri("/v1/message/send")
        .insert_header(("Authorization", "Bearer tok-expired"))
        .set_json(&body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["kind"], "authentication");
    assert!(err["message"].as_str().unwrap_or_default().contains("expired"));

    let req = test::TestRequest::post()
        .uri("/v1/message/send")
        .insert_header(bearer("alice"))
        .set_json(&body)
        .to_request();
    let receipt: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(receipt["status"], "sent");
    assert_eq!(receipt["remaining_quota"], 0);
    assert_eq!(receipt["room_id"], "alice#bob");

    // 额度用尽 → 402 / allowance used up → 402
    let req = test::TestRequest::post()
        .uri("/v1/message/send")
        .insert_header(bearer("alice"))
        .set_json(json!({"peer_user_id": "bob", "body": "again", "client_correlation_id": "c2"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 402);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["kind"], "quota_exceeded");

    // 空正文 → 422 / empty body → 422
    let req = test::TestRequest::post()
        .uri("/v1/message/send")
        .insert_header(bearer("bob"))
        .set_json(json!({"peer_user_id": "alice", "body": "  ", "client_correlation_id": "c3"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 422);
}

#[actix_rt::test]
async fn test_history_read_and_clear() {
    let server = Arc::new(
        seeded_server(vec![
            subscription("s-a", "alice", messages(None)),
            subscription("s-b", "bob", messages(None)),
        ])
        .await,
    );
    let app = app!(server);
    for (i, text) in ["one", "two"].iter().enumerate() {
        let req = test::TestRequest::post()
            .uri("/v1/message/send")
            .insert_header(bearer("alice"))
            .set_json(json!({"peer_user_id": "bob", "body": text, "client_correlation_id": format!("c{}", i)}))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
    }

    let req = test::TestRequest::get()
        .uri("/v1/message/history?peer=alice&limit=10")
        .insert_header(bearer("bob"))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    let items = history["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["body"], "one");
    assert_eq!(items[1]["status"], "sent");
    let first_id = items[0]["server_message_id"].clone();

    let req = test::TestRequest::post()
        .uri("/v1/message/read")
        .insert_header(bearer("bob"))
        .set_json(json!({"peer_user_id": "alice", "message_ids": [first_id]}))
        .to_request();
    let receipt: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(receipt["message_ids"].as_array().map(Vec::len), Some(1));

    let req = test::TestRequest::post()
        .uri("/v1/message/clear")
        .insert_header(bearer("bob"))
        .set_json(json!({"peer_user_id": "alice"}))
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());
    let req = test::TestRequest::get()
        .uri("/v1/message/history?peer=alice")
        .insert_header(bearer("bob"))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history["items"].as_array().map(Vec::len), Some(0));
    let req = test::TestRequest::get()
        .uri("/v1/message/history?peer=bob")
        .insert_header(bearer("alice"))
        .to_request();
    let history: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(history["items"][0]["status"], "read");
}

#[actix_rt::test]
async fn test_call_usage_overdraw_then_denial() {
    let mut sub = subscription(
        "s-a",
        "alice",
        Allowances {
            messages: None,
            audio_seconds: Some(60),
            video_seconds: Some(0),
        },
    );
    sub.usage = Usage {
        audio_seconds: 50,
        ..Usage::default()
    };
    let server = Arc::new(seeded_server(vec![sub]).await);
    let app = app!(server);

    let start = |call_type: &str| {
        test::TestRequest::post()
            .uri("/v1/usage/call/start")
            .insert_header(bearer("alice"))
            .set_json(json!({"call_type": call_type}))
            .to_request()
    };
    let granted: Value = test::call_and_read_body_json(&app, start("audio")).await;
    assert_eq!(granted["remaining_seconds"], 10);
    assert_eq!(test::call_service(&app, start("video")).await.status().as_u16(), 402);

    let req = test::TestRequest::post()
        .uri("/v1/usage/call/stop")
        .insert_header(bearer("alice"))
        .set_json(json!({"call_type": "audio", "elapsed_seconds": 20.7}))
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["debited_seconds"], 20);
    assert_eq!(report["used_seconds"], 70);

    assert_eq!(test::call_service(&app, start("audio")).await.status().as_u16(), 402);

    let req = test::TestRequest::get()
        .uri("/v1/usage/quota")
        .insert_header(bearer("alice"))
        .to_request();
    let quota: Value = test::call_and_read_body_json(&app, req).await;
    let audio = quota["resources"]
        .as_array()
        .and_then(|r| r.iter().find(|q| q["resource"] == "audio_seconds").cloned())
        .unwrap_or_default();
    assert_eq!(audio["used"], 70);
    assert_eq!(audio["remaining"], 0);
}

#[actix_rt::test]
async fn test_call_webhook_requires_signature_and_settles_each_participant() {
    let allowances = Allowances {
        messages: None,
        audio_seconds: Some(600),
        video_seconds: Some(600),
    };
    let server = Arc::new(
        seeded_server(vec![
            subscription("s-a", "alice", allowances.clone()),
            subscription("s-b", "bob", allowances),
        ])
        .await,
    );
    let app = app!(server);
    let body = json!({
        "call_id": "call-1",
        "call_type": "video",
        "participants": ["alice", "bob"],
        "duration_seconds": 42.9
    })
    .to_string();

    let req = test::TestRequest::post()
        .uri("/v1/calls/webhook")
        .insert_header(("X-Signature", "sha256=00"))
        .set_payload(body.clone())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 401);

    let signature = sign(WEBHOOK_SECRET, body.as_bytes()).expect("hmac accepts any key");
    let req = test::TestRequest::post()
        .uri("/v1/calls/webhook")
        .insert_header(("X-Signature", signature))
        .set_payload(body)
        .to_request();
    let settled: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(settled["participants"].as_array().map(Vec::len), Some(2));

    for id in ["s-a", "s-b"] {
        let sub = server
            .stores
            .subscriptions
            .find_by_id(id)
            .await
            .expect("store readable")
            .expect("seeded");
        assert_eq!(sub.usage.video_seconds, 42);
    }
}

#[actix_rt::test]
async fn test_internal_pushes_need_the_shared_token() {
    let server = Arc::new(seeded_server(vec![]).await);
    let app = app!(server);
    let sub = subscription("s-new", "erin", messages(Some(3)));

    let req = test::TestRequest::put()
        .uri("/v1/internal/subscription")
        .set_json(&sub)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 401);

    // 同长度但不同的令牌 / same length, different token
    let req = test::TestRequest::put()
        .uri("/v1/internal/subscription")
        .insert_header(("X-Internal-Token", "internal-secreT"))
        .set_json(&sub)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 401);

    let req = test::TestRequest::put()
        .uri("/v1/internal/subscription")
        .insert_header(("X-Internal-Token", INTERNAL_TOKEN))
        .set_json(&sub)
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());

    let req = test::TestRequest::put()
        .uri("/v1/internal/profile")
        .insert_header(("X-Internal-Token", INTERNAL_TOKEN))
        .set_json(json!({"user_id": "erin", "name": "Erin", "avatar": "https://cdn/e.png"}))
        .to_request();
    assert!(test::call_service(&app, req).await.status().is_success());
    let profile = server
        .stores
        .users
        .get_profile_snapshot("erin")
        .await
        .expect("store readable")
        .expect("stored");
    assert_eq!(profile.name, "Erin");

    let stored = server
        .stores
        .subscriptions
        .find_active_by_user("erin")
        .await
        .expect("store readable");
    assert_eq!(stored.map(|s| s.id), Some("s-new".to_string()));
}

#[actix_rt::test]
async fn test_schema_presence_and_health() {
    let server = Arc::new(seeded_server(vec![subscription("s-a", "alice", messages(None))]).await);
    let app = app!(server);

    let schema: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/v1/protocol/schema").to_request()).await;
    assert!(schema.get("client").is_some() && schema.get("server").is_some());

    let req = test::TestRequest::get()
        .uri("/v1/presence/online")
        .insert_header(bearer("alice"))
        .to_request();
    let online: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(online["total"], 0);

    let health: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/v1/health").to_request()).await;
    assert_eq!(health["healthy"], true);
    assert_eq!(health["details"]["storage_backend"], "memory");
    let live = test::call_service(&app, test::TestRequest::get().uri("/v1/health/live").to_request()).await;
    assert!(live.status().is_success());
    let ready = test::call_service(&app, test::TestRequest::get().uri("/v1/health/ready").to_request()).await;
    assert!(ready.status().is_success());
}
