//! Offline writes through the socket backend and their replay on reconnect

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::peer::{ok_responder, ScriptedPeer};
use common::{free_port, items, socket_config, wait_until};
use marcalink_store::backup::{BACKUP_FLAG_KEY, BACKUP_KEYS_KEY, BACKUP_TIMESTAMP_KEY};
use marcalink_store::{
    BackupKeyPolicy, Envelope, LocalStore, MemoryStore, PersistenceFacade, RemoteStoreBackend,
    ResyncOutcome,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn storage_sets(peer: &ScriptedPeer) -> Vec<Envelope> {
    peer.received()
        .into_iter()
        .filter(|envelope| envelope.act == "storage_set")
        .collect()
}

#[tokio::test]
async fn test_offline_set_is_replayed_and_sentinel_cleared() {
    let port = free_port().await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(port), local.clone());

    let response = facade.set(items(json!({"a": 1}))).await.unwrap();
    assert!(response.is_ok());

    let stored = local.get_all().unwrap();
    assert_eq!(stored[BACKUP_FLAG_KEY], json!(true));
    assert_eq!(stored[BACKUP_KEYS_KEY], json!(["a"]));
    assert_eq!(stored["a"], json!(1));

    let peer = ScriptedPeer::start_on(port, ok_responder()).await;
    assert!(
        wait_until(WAIT, || !local
            .get_all()
            .unwrap()
            .contains_key(BACKUP_FLAG_KEY))
        .await
    );

    let sets = storage_sets(&peer);
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].payload, json!({"items": {"a": 1}}));

    let stored = local.get_all().unwrap();
    assert!(!stored.contains_key(BACKUP_KEYS_KEY));
    assert!(!stored.contains_key(BACKUP_TIMESTAMP_KEY));

    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_rejected_replay_keeps_backup() {
    let port = free_port().await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(port), local.clone());
    facade.set(items(json!({"a": 1}))).await.unwrap();

    let responder = Arc::new(|request: &Envelope| {
        Some(request.reply(json!({"status": "error", "message": "disk full"})))
    });
    let peer = ScriptedPeer::start_on(port, responder).await;
    assert!(wait_until(WAIT, || !storage_sets(&peer).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(local.get_all().unwrap()[BACKUP_FLAG_KEY], json!(true));

    let backend = facade.backend().await.unwrap();
    assert!(backend.is_active());
    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_replay_cut_by_close_does_not_clear_later_backup() {
    let port = free_port().await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(port), local.clone());
    facade.set(items(json!({"a": 1}))).await.unwrap();

    // The first replay is never answered
    let sets_seen = Arc::new(AtomicUsize::new(0));
    let responder = {
        let sets_seen = Arc::clone(&sets_seen);
        Arc::new(move |request: &Envelope| {
            if request.act == "storage_set" && sets_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                return None;
            }
            Some(request.reply(json!({"status": "ok"})))
        })
    };
    let peer = ScriptedPeer::start_on(port, responder).await;
    assert!(wait_until(WAIT, || storage_sets(&peer).len() == 1).await);

    let connection = facade.connection().unwrap();
    connection.disconnect();
    let backend = facade.backend().await.unwrap();
    assert!(!backend.is_active());

    let response = facade.set(items(json!({"b": 2}))).await.unwrap();
    assert_eq!(
        response.message.as_deref(),
        Some("Data saved as backup (offline).")
    );
    let stored = local.get_all().unwrap();
    assert_eq!(stored[BACKUP_FLAG_KEY], json!(true));
    assert_eq!(stored[BACKUP_KEYS_KEY], json!(["b"]));

    connection.auto_connect();
    assert!(
        wait_until(WAIT, || !local
            .get_all()
            .unwrap()
            .contains_key(BACKUP_FLAG_KEY))
        .await
    );
    let payloads: Vec<_> = storage_sets(&peer).into_iter().map(|e| e.payload).collect();
    assert_eq!(
        payloads,
        vec![json!({"items": {"a": 1}}), json!({"items": {"b": 2}})]
    );

    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_online_set_goes_straight_to_authority() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(peer.port()), local.clone());

    let backend = facade.backend().await.unwrap();
    assert!(wait_until(WAIT, || backend.is_active()).await);

    let response = facade.set(items(json!({"b": 2}))).await.unwrap();
    assert!(response.is_ok());
    assert!(!local.get_all().unwrap().contains_key(BACKUP_FLAG_KEY));
    assert_eq!(storage_sets(&peer).len(), 1);

    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_accumulate_policy_replays_every_offline_write() {
    let port = free_port().await;
    let mut config = socket_config(port);
    config.backup.key_policy = BackupKeyPolicy::Accumulate;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(config, local.clone());

    facade.set(items(json!({"a": 1}))).await.unwrap();
    facade.set(items(json!({"b": 2}))).await.unwrap();
    assert_eq!(local.get_all().unwrap()[BACKUP_KEYS_KEY], json!(["a", "b"]));

    let peer = ScriptedPeer::start_on(port, ok_responder()).await;
    assert!(wait_until(WAIT, || !storage_sets(&peer).is_empty()).await);
    assert_eq!(
        storage_sets(&peer)[0].payload,
        json!({"items": {"a": 1, "b": 2}})
    );

    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_replace_policy_replays_latest_write_only() {
    let port = free_port().await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(port), local.clone());

    facade.set(items(json!({"a": 1}))).await.unwrap();
    facade.set(items(json!({"b": 2}))).await.unwrap();

    let peer = ScriptedPeer::start_on(port, ok_responder()).await;
    assert!(wait_until(WAIT, || !storage_sets(&peer).is_empty()).await);
    assert_eq!(storage_sets(&peer)[0].payload, json!({"items": {"b": 2}}));

    facade.shutdown();
    peer.stop();
}

#[tokio::test]
async fn test_manual_resync_without_backup() {
    let peer = ScriptedPeer::start(ok_responder()).await;
    let local = Arc::new(MemoryStore::new());
    let facade = PersistenceFacade::new(socket_config(peer.port()), local.clone());
    let backend = facade.backend().await.unwrap();
    assert!(wait_until(WAIT, || backend.is_active()).await);

    let connection = facade.connection().unwrap();
    let client = marcalink_store::ActClient::new(connection);
    let queue = marcalink_store::OfflineBackupQueue::new(
        local.clone(),
        client,
        facade.config().backup.clone(),
    );
    assert_eq!(queue.resync().await, ResyncOutcome::NothingToSync);

    queue.backup(items(json!({"c": 3}))).unwrap();
    assert_eq!(queue.resync().await, ResyncOutcome::Replayed(1));
    assert!(!queue.has_pending().unwrap());

    facade.shutdown();
    peer.stop();
}
