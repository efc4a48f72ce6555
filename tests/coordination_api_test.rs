//! 协调 API 往返测试：真实监听端口 + HTTP 客户端

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use vclient::coordination::{server, CoordinationClient, CoordinationClientExt, HttpCoordinationClient, RetryPolicy};
use vclient::state::{FileStateStore, InMemoryStateStore};
use vclient::VcError;

fn client(addr: SocketAddr) -> HttpCoordinationClient {
    HttpCoordinationClient::new(&format!("http://{addr}"), RetryPolicy::none(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_publish_get_delete_round_trip() {
    let shutdown = CancellationToken::new();
    let (addr, handle) = server::spawn(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(InMemoryStateStore::new()),
        shutdown.clone(),
    )
    .await
    .unwrap();
    let api = client(addr);
    let ct = CancellationToken::new();

    assert!(api.is_online(&ct).await);
    assert_eq!(api.try_get("DBReady", &ct).await.unwrap(), None);

    api.publish("DBReady", json!({"ready": true, "port": 5432}), &ct).await.unwrap();
    assert_eq!(
        api.try_get("dbready", &ct).await.unwrap(),
        Some(json!({"ready": true, "port": 5432}))
    );

    // 仅创建：同名键再次创建返回 409
    let err = api.create("DBReady", json!({}), &ct).await.unwrap_err();
    assert!(matches!(err, VcError::Api { status: Some(409), .. }));

    api.delete("DBReady", &ct).await.unwrap();
    api.delete("DBReady", &ct).await.unwrap();
    assert_eq!(api.try_get("DBReady", &ct).await.unwrap(), None);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_wait_for_sees_state_published_later() {
    let dir = tempfile::tempdir().unwrap();
    let shutdown = CancellationToken::new();
    let store = Arc::new(FileStateStore::open(dir.path()).await.unwrap());
    let (addr, _handle) = server::spawn("127.0.0.1:0".parse().unwrap(), store, shutdown.clone())
        .await
        .unwrap();

    let publisher = client(addr);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        publisher
            .publish("Phase", json!({"step": 2}), &CancellationToken::new())
            .await
            .unwrap();
    });

    let state = client(addr)
        .wait_for(
            "Phase",
            |s| s["step"] == 2,
            Duration::from_millis(20),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(state, json!({"step": 2}));
    shutdown.cancel();
}

#[tokio::test]
async fn test_wait_for_times_out() {
    let shutdown = CancellationToken::new();
    let (addr, _handle) = server::spawn(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(InMemoryStateStore::new()),
        shutdown.clone(),
    )
    .await
    .unwrap();

    let err = client(addr)
        .wait_for(
            "never",
            |_| true,
            Duration::from_millis(20),
            Duration::from_millis(150),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VcError::Timeout { .. }));
    shutdown.cancel();
}
