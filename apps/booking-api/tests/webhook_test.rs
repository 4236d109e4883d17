mod common;

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, StatusCode};
use axum_test::TestServer;
use booking_api::auth::signature::SIGNATURE_HEADER;

async fn post_signed(server: &TestServer, path: &str, body: Vec<u8>) -> axum_test::TestResponse {
    let signature = common::sign(&body);
    server
        .post(path)
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), signature)
        .add_header(CONTENT_TYPE, "application/json")
        .bytes(Bytes::from(body))
        .await
}

// ---------------------------------------------------------------------------
// POST /api/v1/webhooks/payments
// ---------------------------------------------------------------------------

#[tokio::test]
async fn confirmation_creates_one_booking() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let resp = post_signed(
        &server,
        "/api/v1/webhooks/payments",
        common::checkout_event("sess_abc", None, "spot_1"),
    )
    .await;

    resp.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "created");
    assert_eq!(body["booking"]["totalPrice"], 30.0);
    assert_eq!(body["booking"]["hours"], 2.0);
    assert_eq!(body["booking"]["status"], "paid");
    assert_eq!(body["booking"]["sessionId"], "sess_abc");

    assert_eq!(state.store.booking_count().await, 1);
    let spot = server.get("/api/v1/spots/spot_1").await;
    spot.assert_status_ok();
    assert_eq!(spot.json::<serde_json::Value>()["available"], false);

    // Both collections hit the disk.
    let bookings = std::fs::read_to_string(state.config.data_dir.join("bookings.json")).unwrap();
    assert!(bookings.contains("sess_abc"));
}

#[tokio::test]
async fn redelivery_reports_already_exists() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();
    let event = common::checkout_event("sess_abc", None, "spot_1");

    let first = post_signed(&server, "/api/v1/webhooks/payments", event.clone()).await;
    first.assert_status(StatusCode::CREATED);
    let first_id = first.json::<serde_json::Value>()["booking"]["id"].clone();

    let second = post_signed(&server, "/api/v1/webhooks/payments", event).await;
    second.assert_status_ok();
    let body: serde_json::Value = second.json();
    assert_eq!(body["status"], "already exists");
    assert_eq!(body["booking"]["id"], first_id);

    assert_eq!(state.store.booking_count().await, 1);
}

#[tokio::test]
async fn missing_or_bad_signature_is_unauthorized() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();
    let event = common::checkout_event("sess_unsigned", None, "spot_1");

    let resp = server
        .post("/api/v1/webhooks/payments")
        .bytes(Bytes::from(event.clone()))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);

    let forged = booking_api::auth::signature::sign("not-the-secret", chrono::Utc::now().timestamp(), &event);
    let resp = server
        .post("/api/v1/webhooks/payments")
        .add_header(HeaderName::from_static(SIGNATURE_HEADER), forged)
        .bytes(Bytes::from(event))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(resp.json::<serde_json::Value>()["error"]["code"], "UNAUTHORIZED");

    assert_eq!(state.store.booking_count().await, 0);
}

#[tokio::test]
async fn invalid_metadata_returns_field_errors() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let body = serde_json::to_vec(&serde_json::json!({
        "id": "evt_bad",
        "type": "checkout.session.completed",
        "data": { "object": { "id": "sess_bad", "metadata": { "spotId": "spot_1", "price": "-4" } } }
    }))
    .unwrap();
    let resp = post_signed(&server, "/api/v1/webhooks/payments", body).await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    let fields: Vec<&str> = body["error"]["details"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|d| d["field"].as_str())
        .collect();
    assert!(fields.contains(&"userId"));
    assert!(fields.contains(&"price"));
    assert!(fields.contains(&"startTime"));

    assert_eq!(state.store.booking_count().await, 0);
}

#[tokio::test]
async fn unknown_spot_is_not_found() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let resp = post_signed(
        &server,
        "/api/v1/webhooks/payments",
        common::checkout_event("sess_nospot", None, "spot_missing"),
    )
    .await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(state.store.booking_count().await, 0);
}

#[tokio::test]
async fn refund_cancels_booking() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    post_signed(
        &server,
        "/api/v1/webhooks/payments",
        common::checkout_event("sess_r", Some("pi_r"), "spot_1"),
    )
    .await
    .assert_status(StatusCode::CREATED);

    let resp = post_signed(&server, "/api/v1/webhooks/payments", common::refund_event("pi_r")).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["booking"]["status"], "cancelled");

    let spot: serde_json::Value = server.get("/api/v1/spots/spot_1").await.json();
    assert_eq!(spot["available"], true);

    let again = post_signed(&server, "/api/v1/webhooks/payments", common::refund_event("pi_r")).await;
    assert_eq!(again.json::<serde_json::Value>()["status"], "already cancelled");
}

#[tokio::test]
async fn unrelated_event_types_are_ignored() {
    let (app, state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let body = serde_json::to_vec(&serde_json::json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    }))
    .unwrap();
    let resp = post_signed(&server, "/api/v1/webhooks/payments", body).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["status"], "ignored");
    assert_eq!(state.store.booking_count().await, 0);
}

// ---------------------------------------------------------------------------
// State pull
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bookings_are_readable_by_id_and_user() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let created: serde_json::Value = post_signed(
        &server,
        "/api/v1/webhooks/payments",
        common::checkout_event("sess_read", None, "spot_1"),
    )
    .await
    .json();
    let booking_id = created["booking"]["id"].as_str().unwrap();

    let resp = server.get(&format!("/api/v1/bookings/{booking_id}")).await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["spotId"], "spot_1");

    let list: Vec<serde_json::Value> = server.get("/api/v1/users/user_1/bookings").await.json();
    assert_eq!(list.len(), 1);

    server
        .get("/api/v1/bookings/bk_missing")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn state_survives_restart() {
    let state = common::test_state().await;
    let data_dir = state.config.data_dir.clone();
    let server = TestServer::new(booking_api::routes::router().with_state(state.clone())).unwrap();

    post_signed(
        &server,
        "/api/v1/webhooks/payments",
        common::checkout_event("sess_restart", None, "spot_1"),
    )
    .await
    .assert_status(StatusCode::CREATED);
    state.shutdown().await.unwrap();

    let gateway = std::sync::Arc::new(
        booking_api::db::gateway::FileGateway::open(&data_dir).await.unwrap(),
    );
    let reopened = booking_api::AppState::init(
        booking_api::config::Config::for_data_dir(common::SECRET, &data_dir),
        gateway,
    )
    .await
    .unwrap();
    assert_eq!(reopened.store.booking_count().await, 1);
    assert!(!reopened.store.spot("spot_1").await.unwrap().available);
}

// ---------------------------------------------------------------------------
// POST /api/v1/announcements
// ---------------------------------------------------------------------------

#[tokio::test]
async fn announcement_requires_title_and_message() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();

    let ok = post_signed(
        &server,
        "/api/v1/announcements",
        br#"{"title":"Maintenance","message":"Back at noon"}"#.to_vec(),
    )
    .await;
    ok.assert_status(StatusCode::ACCEPTED);

    let bad = post_signed(&server, "/api/v1/announcements", br#"{"title":"  "}"#.to_vec()).await;
    bad.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(bad.json::<serde_json::Value>()["error"]["details"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _state) = common::test_app().await;
    let server = TestServer::new(app).unwrap();
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["status"], "ok");
}
