//! ConnectionManager and ActClient against a scripted peer

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::peer::{ok_responder, silent_responder, ScriptedPeer};
use common::{fast_connection, free_port, wait_until};
use marcalink_store::{
    ActClient, ConnectionConfig, ConnectionManager, ConnectionState, CorrelationMode, Envelope,
    StoreError,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_connect_open_and_log_traffic() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opened);
    manager.on_open(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect("127.0.0.1", &peer.port().to_string());
    assert!(wait_until(WAIT, || opened.load(Ordering::SeqCst) == 1).await);
    assert!(manager.is_open());
    assert_eq!(
        manager.address().unwrap(),
        format!("ws://127.0.0.1:{}", peer.port())
    );

    let client = ActClient::new(manager.clone());
    let response = client
        .request("storage_set", json!({"items": {"a": 1}}))
        .await
        .unwrap();
    assert!(response.is_ok());

    let log: Vec<String> = manager.operation_log().into_iter().map(|e| e.data).collect();
    assert!(log.iter().any(|line| line.starts_with("➡️") && line.contains("storage_set")));
    assert!(log.iter().any(|line| line.starts_with("⬅️") && line.contains("storage_set")));

    // Registering after the open fires right away
    let late = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&late);
    manager.on_open(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(late.load(Ordering::SeqCst), 1);

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_connect_while_open_is_noop() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let manager = ConnectionManager::new(ConnectionConfig::default());
    manager.connect("127.0.0.1", &peer.port().to_string());
    assert!(wait_until(WAIT, || manager.is_open()).await);

    manager.connect("127.0.0.1", "1");
    assert!(manager.is_open());
    assert_eq!(
        manager.address().unwrap(),
        format!("ws://127.0.0.1:{}", peer.port())
    );
    assert_eq!(peer.connections(), 1);

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_reconnects_after_peer_closes() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    let opened = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opened);
    manager.on_open(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    peer.kick();
    assert!(wait_until(WAIT, || opened.load(Ordering::SeqCst) == 2).await);
    assert!(manager.is_open());
    assert_eq!(peer.connections(), 2);
    assert_eq!(manager.next_backoff(), Duration::from_millis(20));

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_disconnect_cancels_reconnection() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    manager.disconnect();
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.send(&Envelope::new("storage_get", json!({}))));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(peer.connections(), 1);
    peer.stop();
}

#[tokio::test]
async fn test_backoff_doubles_to_cap_then_resets_on_open() {
    let port = free_port().await;
    let manager = ConnectionManager::new(fast_connection(port));
    manager.auto_connect();

    // 20 -> 40 -> 80 -> 160 (cap)
    assert!(wait_until(WAIT, || manager.next_backoff() == Duration::from_millis(160)).await);
    assert!(!manager.is_open());

    let peer = ScriptedPeer::start_on(port, ok_responder()).await;
    assert!(
        wait_until(WAIT, || manager.is_open()
            && manager.next_backoff() == Duration::from_millis(20))
        .await
    );

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_same_act_requests_share_one_response() {
    let counter = Arc::new(AtomicUsize::new(0));
    let responder = {
        let counter = Arc::clone(&counter);
        Arc::new(move |request: &Envelope| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Some(request.reply(json!({"status": "ok", "data": n})))
        })
    };
    let peer = ScriptedPeer::start(responder).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    let client = ActClient::new(manager.clone());
    let (first, second) = tokio::join!(
        client.request("load_paper", json!({"paperId": "p_1"})),
        client.request("load_paper", json!({"paperId": "p_2"})),
    );
    assert_eq!(first.unwrap().data, Some(json!(1)));
    assert_eq!(second.unwrap().data, Some(json!(1)));
    assert_eq!(client.in_flight("load_paper"), 0);

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_request_id_mode_resolves_each_caller() {
    let responder = Arc::new(|request: &Envelope| {
        let paper = request.payload["paperId"].clone();
        Some(request.reply(json!({"status": "ok", "data": paper})))
    });
    let peer = ScriptedPeer::start(responder).await;
    let config = ConnectionConfig {
        correlation: CorrelationMode::RequestId,
        ..fast_connection(peer.port())
    };
    let manager = ConnectionManager::new(config);
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    let client = ActClient::new(manager.clone());
    let (first, second) = tokio::join!(
        client.request("load_paper", json!({"paperId": "p_1"})),
        client.request("load_paper", json!({"paperId": "p_2"})),
    );
    assert_eq!(first.unwrap().data, Some(json!("p_1")));
    assert_eq!(second.unwrap().data, Some(json!("p_2")));
    assert!(peer.received().iter().all(|envelope| envelope.id.is_some()));

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_request_timeout_is_protocol_error() {
    let peer = ScriptedPeer::start(silent_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    let client = ActClient::new(manager.clone());
    let err = client
        .request_with_timeout(
            "storage_get",
            json!({"keys": []}),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Protocol(_)));
    assert_eq!(client.in_flight("storage_get"), 0);

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_clients_on_one_connection_share_waiters() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    let first = ActClient::new(manager.clone());
    let second = ActClient::new(manager.clone());
    let (a, b) = tokio::join!(
        first.request_with_timeout(
            "storage_set",
            json!({"items": {"a": 1}}),
            Some(Duration::from_secs(2)),
        ),
        second.request_with_timeout(
            "storage_set",
            json!({"items": {"b": 2}}),
            Some(Duration::from_secs(2)),
        ),
    );
    assert!(a.unwrap().is_ok());
    assert!(b.unwrap().is_ok());
    assert_eq!(first.in_flight("storage_set"), 0);
    assert_eq!(second.in_flight("storage_set"), 0);

    manager.disconnect();
    peer.stop();
}

#[tokio::test]
async fn test_close_fails_waiting_request() {
    let peer = ScriptedPeer::start(silent_responder()).await;
    let manager = ConnectionManager::new(fast_connection(peer.port()));
    manager.auto_connect();
    assert!(wait_until(WAIT, || manager.is_open()).await);

    let client = ActClient::new(manager.clone());
    let waiting = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .request_with_timeout("storage_set", json!({"items": {"a": 1}}), Some(WAIT))
                .await
        })
    };
    assert!(wait_until(WAIT, || client.in_flight("storage_set") == 1).await);

    let started = tokio::time::Instant::now();
    peer.kick();
    let err = waiting.await.unwrap().unwrap_err();
    assert!(err.is_transport());
    assert!(started.elapsed() < WAIT);
    assert_eq!(client.in_flight("storage_set"), 0);

    manager.disconnect();
    peer.stop();
}
