//! HTTP surface tests.

mod common;

use common::{test_engine, tiny_engine, ReplicaHarness};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tessera::api::coordinator::{
    Coordinator, ReplicatedCoordinator, SizeLimits, StandaloneCoordinator,
};
use tessera::api::{router, AppState};
use tessera::core::config::WalConfig;
use tessera::storage::snapshot::MemorySnapshotter;
use tessera::storage::wal::Wal;
use tower::util::ServiceExt;

fn replicated_router(harness: &ReplicaHarness, limits: SizeLimits) -> Router {
    let coordinator = Coordinator::Replicated(ReplicatedCoordinator::new(
        limits,
        harness.raft.clone(),
        harness.futures.clone(),
        vec!["http://f:8080".to_string(), "http://l:8080".to_string()],
        Duration::from_secs(5),
    ));
    router(Arc::new(AppState { coordinator }))
}

fn roomy_limits() -> SizeLimits {
    SizeLimits {
        max_key_size: 1024,
        max_value_size: 1024,
    }
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn put_get_delete_cycle_on_leader() {
    let harness = ReplicaHarness::leader(test_engine());
    let app = replicated_router(&harness, roomy_limits());

    let response = app
        .clone()
        .oneshot(
            Request::put("/v1/testkey")
                .body(Body::from("testvalue"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::get("/v1/testkey").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "testvalue");

    let response = app
        .clone()
        .oneshot(Request::delete("/v1/testkey").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(Request::get("/v1/testkey").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversize_inputs_answer_bad_request() {
    let harness = ReplicaHarness::leader(tiny_engine());
    let app = replicated_router(
        &harness,
        SizeLimits {
            max_key_size: 10,
            max_value_size: 20,
        },
    );

    let response = app
        .clone()
        .oneshot(
            Request::put("/v1/thiskeyistoolarge")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("key too large"));

    let response = app
        .oneshot(
            Request::put("/v1/k")
                .body(Body::from("thisvalueistoolargetoomuch"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response).await.contains("value too large"));
}

#[tokio::test]
async fn follower_redirects_to_leader_address() {
    let harness = ReplicaHarness::follower(test_engine(), 1);
    let app = replicated_router(&harness, roomy_limits());

    let response = app
        .oneshot(Request::put("/v1/k").body(Body::from("v")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "http://l:8080/v1/k"
    );
}

#[tokio::test]
async fn follower_without_known_leader_is_unavailable() {
    let harness = ReplicaHarness::follower(test_engine(), -1);
    let app = replicated_router(&harness, roomy_limits());

    let response = app
        .oneshot(Request::put("/v1/k").body(Body::from("v")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "no leader available");
}

#[tokio::test]
async fn healthz_answers_ok() {
    let harness = ReplicaHarness::leader(test_engine());
    let app = replicated_router(&harness, roomy_limits());

    let response = app
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn standalone_mode_serves_the_same_contract() {
    let dir = tempfile::tempdir().unwrap();
    let engine = test_engine();
    let wal = Arc::new(
        Wal::open(
            WalConfig {
                log_file: dir.path().join("wal.log").display().to_string(),
                max_size_bytes: u64::MAX,
                fsync_interval_ms: 50,
                fsync_retries: 3,
                fsync_retry_ms: 10,
            },
            Arc::new(MemorySnapshotter::new()),
        )
        .unwrap(),
    );
    wal.recover(&engine).unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (writer, fsyncer) = wal.start(shutdown_rx).unwrap();

    let coordinator = Coordinator::Standalone(StandaloneCoordinator::new(
        roomy_limits(),
        Arc::clone(&engine),
        Arc::clone(&wal),
    ));
    let app = router(Arc::new(AppState { coordinator }));

    let response = app
        .clone()
        .oneshot(Request::put("/v1/k").body(Body::from("v")).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(Request::get("/v1/k").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "v");

    let response = app
        .clone()
        .oneshot(Request::delete("/v1/k").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(Request::get("/v1/k").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The write reached the log as well as the engine.
    wal.wait_writings().await;
    assert_eq!(wal.last_seq(), 2);

    shutdown_tx.send(true).unwrap();
    writer.await.unwrap();
    fsyncer.await.unwrap();
    wal.close();
}
