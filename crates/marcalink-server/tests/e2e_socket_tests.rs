//! End-to-end: the socket backend talking to a real marcalink server

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use marcalink_server::{serve_listener, AppState};
use marcalink_store::{
    BackendMode, ConnectionConfig, Envelope, Items, MarcalinkConfig, MemoryStore,
    PersistenceFacade, RemoteStoreBackend, StorageConfig,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(5);

async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn start_server_on(listener: TcpListener) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(AppState::new(dir.path()).unwrap());
    tokio::spawn(serve_listener(listener, state));
    dir
}

async fn start_server() -> (TempDir, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (start_server_on(listener).await, port)
}

fn socket_config(port: u16) -> MarcalinkConfig {
    MarcalinkConfig {
        storage: StorageConfig {
            mode: BackendMode::Socket,
            ..StorageConfig::default()
        },
        connection: ConnectionConfig {
            url: "ws://127.0.0.1".to_string(),
            port: port.to_string(),
            base_backoff_ms: 20,
            max_backoff_ms: 160,
            ..ConnectionConfig::default()
        },
        ..MarcalinkConfig::default()
    }
}

fn items(value: Value) -> Items {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_greeting_on_connect() {
    let (_dir, port) = start_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/", port))
        .await
        .unwrap();
    let first = socket.next().await.unwrap().unwrap();
    let greeting = Envelope::parse(first.to_text().unwrap()).unwrap();
    assert_eq!(greeting.act, "connected");
    assert_eq!(greeting.payload["status"], "ok");
}

#[tokio::test]
async fn test_project_and_paper_crud_over_socket() {
    let (dir, port) = start_server().await;
    let facade = PersistenceFacade::new(socket_config(port), Arc::new(MemoryStore::new()));
    let backend = facade.backend().await.unwrap();
    assert!(wait_until(WAIT, || backend.is_active()).await);

    assert!(facade.create_project("tcc-001").await.unwrap().is_ok());
    let duplicate = facade.create_project("tcc-001").await.unwrap();
    assert_eq!(duplicate.message_or_default(), "Project 'tcc-001' already exists.");

    let data = json!({"id": "tcc-001", "currentIterationId": "I2"});
    assert!(facade.save_project("tcc-001", data.clone()).await.unwrap().is_ok());
    assert_eq!(facade.load_project("tcc-001").await.unwrap().data, Some(data));
    assert_eq!(
        facade.list_projects().await.unwrap().data,
        Some(json!(["tcc-001"]))
    );

    facade
        .save_paper("tcc-001", "p_1", json!({"title": "A"}))
        .await
        .unwrap();
    assert!(dir.path().join("tcc-001/papers/p_1.json").is_file());
    let papers = facade.list_papers("tcc-001").await.unwrap();
    assert_eq!(papers.data, Some(json!([{"id": "p_1", "title": "A"}])));

    facade.set(items(json!({"k": "v"}))).await.unwrap();
    let stored = facade.get(&["k".to_string()]).await.unwrap();
    assert_eq!(stored.data, Some(json!({"k": "v"})));

    assert!(facade.archive_project("tcc-001").await.unwrap().is_ok());
    assert_eq!(facade.list_projects().await.unwrap().data, Some(json!([])));
    assert!(facade.delete_project("tcc-001").await.unwrap().is_ok());
    assert!(!dir.path().join("tcc-001").exists());

    facade.shutdown();
}

#[tokio::test]
async fn test_offline_write_reaches_server_once_it_starts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(port), local);
    let response = facade.set(items(json!({"a": 1}))).await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.message_or_default(), "Data saved as backup (offline).");

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let dir = start_server_on(listener).await;
    let config_file = dir.path().join("config.json");
    assert!(
        wait_until(WAIT, || {
            std::fs::read_to_string(&config_file)
                .ok()
                .and_then(|text| serde_json::from_str::<Value>(&text).ok())
                .map(|config| config["a"] == json!(1))
                .unwrap_or(false)
        })
        .await
    );

    facade.shutdown();
}
