#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde_json::{json, Value};

use booking_api::config::Config;
use booking_api::db::gateway::{Collection, FileGateway, PersistenceGateway};
use booking_api::AppState;
use parkspot_common::id::prefixed_ulid;

pub const SECRET: &str = "whsec_test_secret";

/// A fresh data directory seeded with two users and two spots.
///
/// `owner_1` owns `spot_1`; `owner_9` owns `spot_9`; `user_1` is the booker.
pub fn seeded_data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(prefixed_ulid("booking_api_test"));
    std::fs::create_dir_all(&dir).expect("create data dir");

    let users = json!([
        { "uid": "user_1", "displayName": "Ada", "email": "ada@example.com" },
        { "uid": "owner_1", "displayName": "Olive", "email": "olive@example.com" },
        { "uid": "owner_9", "displayName": "Nina", "email": "nina@example.com" },
    ]);
    let spots = json!([
        { "id": "spot_1", "owner": "owner_1", "available": true, "bookings": [], "title": "Downtown" },
        { "id": "spot_9", "owner": "owner_9", "available": true, "bookings": [], "title": "Harbour" },
    ]);
    write_collection(&dir, Collection::Users, &users);
    write_collection(&dir, Collection::Spots, &spots);
    dir
}

fn write_collection(dir: &std::path::Path, collection: Collection, records: &Value) {
    std::fs::write(dir.join(collection.file_name()), records.to_string()).expect("seed collection");
}

pub async fn test_state_with(configure: impl FnOnce(&mut Config)) -> AppState {
    let dir = seeded_data_dir();
    let mut config = Config::for_data_dir(SECRET, &dir);
    configure(&mut config);
    let gateway: Arc<dyn PersistenceGateway> =
        Arc::new(FileGateway::open(&dir).await.expect("open gateway"));
    AppState::init(config, gateway).await.expect("init state")
}

pub async fn test_state() -> AppState {
    test_state_with(|_| {}).await
}

pub async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    let app = booking_api::routes::router().with_state(state.clone());
    (app, state)
}

/// Signature header value for `body`, signed now with the test secret.
pub fn sign(body: &[u8]) -> String {
    booking_api::auth::signature::sign(SECRET, chrono::Utc::now().timestamp(), body)
}

/// A `checkout.session.completed` event for `user_1` booking `spot_id`.
pub fn checkout_event(session_id: &str, payment_id: Option<&str>, spot_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": prefixed_ulid("evt"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "payment_intent": payment_id,
            "metadata": {
                "spotId": spot_id,
                "userId": "user_1",
                "price": 30,
                "spotTitle": "Downtown",
                "startTime": "2024-01-15T10:00:00Z",
                "endTime": "2024-01-15T12:00:00Z",
                "hours": 2
            }
        }}
    }))
    .expect("encode event")
}

pub fn refund_event(payment_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": prefixed_ulid("evt"),
        "type": "charge.refunded",
        "data": { "object": { "id": prefixed_ulid("ch"), "payment_intent": payment_id, "metadata": {} } }
    }))
    .expect("encode event")
}

/// Poll `check` until it returns true or the deadline passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
