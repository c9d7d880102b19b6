mod helpers;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::Json;
use futures::StreamExt;
use guardian_common::broker::SignedVaaBroker;
use guardian_common::spy::{router, subscribe_signed_vaa, SpyState, SubscribeRequest};
use helpers::create_unsigned_vaa;
use std::sync::Arc;
use std::time::Duration;

fn test_state() -> SpyState {
    SpyState {
        broker: Arc::new(SignedVaaBroker::new()),
    }
}

#[tokio::test]
async fn test_subscribe_rejects_malformed_emitter() {
    let server = axum_test::TestServer::new(router(test_state())).unwrap();

    let response = server
        .post("/v1/signed_vaa/subscribe")
        .json(&serde_json::json!({
            "filters": [{ "chainId": 2, "emitterAddress": "not-hex" }]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "INVALID_FILTER");
}

#[tokio::test]
async fn test_subscribe_rejects_wrong_length_emitter() {
    let server = axum_test::TestServer::new(router(test_state())).unwrap();

    let response = server
        .post("/v1/signed_vaa/subscribe")
        .json(&serde_json::json!({
            "filters": [{ "chainId": 2, "emitterAddress": "aabbcc" }]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscribe_rejects_chain_id_overflow() {
    let server = axum_test::TestServer::new(router(test_state())).unwrap();

    let response = server
        .post("/v1/signed_vaa/subscribe")
        .json(&serde_json::json!({
            "filters": [{
                "chainId": 100000,
                "emitterAddress": hex::encode([0u8; 32]),
            }]
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_delivers_published_vaas_as_hex_lines() {
    let broker = Arc::new(SignedVaaBroker::new());
    let state = SpyState {
        broker: broker.clone(),
    };

    let response =
        subscribe_signed_vaa(State(state), Json(SubscribeRequest { filters: vec![] })).await;
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/x-ndjson"
    );
    assert_eq!(broker.subscriber_count().await, 1);

    let first = create_unsigned_vaa(0).serialize();
    assert_eq!(broker.publish(&first).await.unwrap(), 1);

    let mut frames = response.into_body().into_data_stream();
    let frame = frames.next().await.unwrap().unwrap();
    assert_eq!(
        std::str::from_utf8(&frame).unwrap(),
        format!("{}\n", hex::encode(&first))
    );

    // The stream keeps delivering for as long as the client reads.
    let mut second_vaa = create_unsigned_vaa(0);
    second_vaa.sequence = 43;
    let second = second_vaa.serialize();
    assert_eq!(broker.publish(&second).await.unwrap(), 1);

    let frame = frames.next().await.unwrap().unwrap();
    assert_eq!(
        std::str::from_utf8(&frame).unwrap(),
        format!("{}\n", hex::encode(&second))
    );
}

#[tokio::test]
async fn test_subscription_torn_down_when_stream_dropped() {
    let broker = Arc::new(SignedVaaBroker::new());
    let state = SpyState {
        broker: broker.clone(),
    };

    let response = subscribe_signed_vaa(State(state), Json(SubscribeRequest { filters: vec![] })).await;
    assert_eq!(broker.subscriber_count().await, 1);

    // Dropping the response drops the stream, which runs the unsubscribe
    // teardown.
    drop(response);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscriber_count().await, 0);
}

#[tokio::test]
async fn test_subscription_torn_down_when_dropped_off_runtime() {
    let broker = Arc::new(SignedVaaBroker::new());
    let state = SpyState {
        broker: broker.clone(),
    };

    let response =
        subscribe_signed_vaa(State(state), Json(SubscribeRequest { filters: vec![] })).await;
    assert_eq!(broker.subscriber_count().await, 1);

    // A connection body can be dropped on a thread with no runtime
    // context; teardown must still run instead of panicking.
    tokio::task::spawn_blocking(move || drop(response))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscriber_count().await, 0);
}
