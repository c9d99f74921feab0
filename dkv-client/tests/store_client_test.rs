//! End-to-end scenarios over the in-memory channel transport: a real
//! client, the root data service, and store services backed by the
//! in-memory engine.

use dkv_client::{
    DeathRecipient, KvStoreClient, KvStoreObserver, PushRouter, SyncCallback,
};
use dkv_service::{KvStoreDataService, MemoryDelegate, PaginatorConfig, StoreDelegate};
use dkv_transport::channel::{channel_pair, ServiceHost};
use dkv_transport::{Endpoint, PushHandler};
use dkv_types::constant::{MAX_BATCH_SIZE, SWITCH_RAW_DATA_SIZE};
use dkv_types::{
    ChangeNotification, ControlCmd, DeviceInfo, Entry, Key, KvParam, SecurityLevel, Status,
    StoreOptions, SubscribeType, SyncMode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Fixture {
    client: KvStoreClient,
    host: Arc<ServiceHost>,
    delegate: Arc<MemoryDelegate>,
}

fn fixture() -> Fixture {
    let router = Arc::new(PushRouter::new());
    let push_handler: Arc<dyn PushHandler> = router.clone();
    let (endpoint, host) = channel_pair(push_handler);
    let delegate = Arc::new(MemoryDelegate::new());
    let factory_delegate = delegate.clone();
    let data_service = KvStoreDataService::new(
        host.clone(),
        "local-device",
        Box::new(move |_, _, _| Ok(factory_delegate.clone() as Arc<dyn StoreDelegate>)),
    )
    .with_devices(vec![DeviceInfo::new("dev-1", "alpha", "phone")])
    .with_paginator_config(PaginatorConfig {
        soft_limit: 64,
        buffer_size: 2,
    });
    host.register_root(Arc::new(data_service));
    let endpoint: Arc<dyn Endpoint> = endpoint;
    Fixture {
        client: KvStoreClient::new(endpoint, router),
        host,
        delegate,
    }
}

async fn open_store(fixture: &Fixture) -> dkv_client::SingleKvStore {
    let options = StoreOptions {
        security_level: SecurityLevel::S1,
        ..StoreOptions::default()
    };
    fixture
        .client
        .get_single_kv_store("test-app", "test-store", &options)
        .await
        .expect("store opens")
}

async fn expect_recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for push")
        .expect("push channel closed")
}

struct ChannelObserver(mpsc::UnboundedSender<ChangeNotification>);

impl KvStoreObserver for ChannelObserver {
    fn on_change(&self, change: &ChangeNotification) {
        let _ = self.0.send(change.clone());
    }
}

struct ChannelSyncCallback(mpsc::UnboundedSender<HashMap<String, Status>>);

impl SyncCallback for ChannelSyncCallback {
    fn sync_completed(&self, results: &HashMap<String, Status>) {
        let _ = self.0.send(results.clone());
    }
}

struct ChannelRecipient(mpsc::UnboundedSender<()>);

impl DeathRecipient for ChannelRecipient {
    fn on_remote_died(&self) {
        let _ = self.0.send(());
    }
}

#[tokio::test]
async fn put_get_delete_round_trip() {
    let fixture = fixture();
    let store = open_store(&fixture).await;

    store.put("color", "teal").await.unwrap();
    assert_eq!(store.get("color").await.unwrap().as_bytes(), b"teal");

    store.delete("color").await.unwrap();
    assert_eq!(store.get("color").await.unwrap_err(), Status::KeyNotFound);
}

#[tokio::test]
async fn key_is_trimmed_before_lookup() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store.put("  color ", "teal").await.unwrap();
    assert_eq!(store.get("color").await.unwrap().as_bytes(), b"teal");
}

#[tokio::test]
async fn invalid_arguments_fail_without_touching_transport() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    // Kill the connection; local validation must still answer.
    fixture.host.shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.put("  ", "v").await.unwrap_err(), Status::InvalidArgument);
    assert_eq!(
        store.put("k", vec![0u8; 4 * 1024 * 1024 + 1]).await.unwrap_err(),
        Status::InvalidArgument
    );
    let too_many: Vec<Entry> = (0..MAX_BATCH_SIZE + 1)
        .map(|i| Entry::new(format!("k{i}"), "v"))
        .collect();
    assert_eq!(store.put_batch(too_many).await.unwrap_err(), Status::InvalidArgument);
    // A valid call now hits the dead transport instead.
    assert_eq!(store.put("k", "v").await.unwrap_err(), Status::ServerUnavailable);
}

#[tokio::test]
async fn batch_put_then_get_entries_returns_sorted_prefix_matches() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store
        .put_batch(vec![
            Entry::new("fruit.banana", "1"),
            Entry::new("fruit.apple", "2"),
            Entry::new("veg.carrot", "3"),
        ])
        .await
        .unwrap();

    let entries = store.get_entries("fruit.").await.unwrap();
    let keys: Vec<&[u8]> = entries.iter().map(|e| e.key.as_bytes()).collect();
    assert_eq!(keys, vec![b"fruit.apple".as_slice(), b"fruit.banana".as_slice()]);
}

#[tokio::test]
async fn transaction_commit_applies_and_rollback_discards() {
    let fixture = fixture();
    let store = open_store(&fixture).await;

    store.start_transaction().await.unwrap();
    store.put("staged", "yes").await.unwrap();
    store.rollback().await.unwrap();
    assert_eq!(store.get("staged").await.unwrap_err(), Status::KeyNotFound);

    store.start_transaction().await.unwrap();
    store.put("staged", "yes").await.unwrap();
    store.commit().await.unwrap();
    assert_eq!(store.get("staged").await.unwrap().as_bytes(), b"yes");

    assert_eq!(store.commit().await.unwrap_err(), Status::IllegalState);
    assert_eq!(store.rollback().await.unwrap_err(), Status::IllegalState);
}

#[tokio::test]
async fn subscriber_sees_insert_update_and_delete() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn KvStoreObserver> = Arc::new(ChannelObserver(tx));
    store.subscribe(SubscribeType::All, &observer).await.unwrap();

    store.put("k", "one").await.unwrap();
    let change = expect_recv(&mut rx).await;
    assert_eq!(change.insert_entries(), &[Entry::new("k", "one")]);
    assert_eq!(change.device_id(), "local-device");

    store.put("k", "two").await.unwrap();
    let change = expect_recv(&mut rx).await;
    assert_eq!(change.update_entries(), &[Entry::new("k", "two")]);

    store.delete("k").await.unwrap();
    let change = expect_recv(&mut rx).await;
    assert_eq!(change.delete_entries(), &[Entry::new("k", "two")]);
}

#[tokio::test]
async fn committed_transaction_notifies_once() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn KvStoreObserver> = Arc::new(ChannelObserver(tx));
    store.subscribe(SubscribeType::All, &observer).await.unwrap();

    store.start_transaction().await.unwrap();
    store.put("a", "1").await.unwrap();
    store.put("b", "2").await.unwrap();
    store.commit().await.unwrap();

    let change = expect_recv(&mut rx).await;
    assert_eq!(change.insert_entries().len(), 2);
    // One batch, one notification.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn duplicate_subscribe_and_stray_unsubscribe_fail_locally() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn KvStoreObserver> = Arc::new(ChannelObserver(tx));

    store.subscribe(SubscribeType::All, &observer).await.unwrap();
    assert_eq!(
        store.subscribe(SubscribeType::All, &observer).await.unwrap_err(),
        Status::StoreAlreadySubscribe
    );

    store.unsubscribe(&observer).await.unwrap();
    assert_eq!(
        store.unsubscribe(&observer).await.unwrap_err(),
        Status::StoreNotSubscribe
    );

    // No notifications after unsubscribing.
    store.put("quiet", "v").await.unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn large_changeset_survives_the_raw_path() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer: Arc<dyn KvStoreObserver> = Arc::new(ChannelObserver(tx));
    store.subscribe(SubscribeType::All, &observer).await.unwrap();

    let big = vec![0xabu8; SWITCH_RAW_DATA_SIZE + 1024];
    store.put("big", big.clone()).await.unwrap();
    let change = expect_recv(&mut rx).await;
    assert_eq!(change.insert_entries(), &[Entry::new("big", big)]);
}

#[tokio::test]
async fn sync_outcome_arrives_at_registered_callback() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    fixture.delegate.fail_device("flaky");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback: Arc<dyn SyncCallback> = Arc::new(ChannelSyncCallback(tx));
    store.register_sync_callback(&callback).await.unwrap();

    let devices = vec!["steady".to_string(), "flaky".to_string()];
    store.sync(&devices, SyncMode::PushPull, 0).await.unwrap();

    let results = expect_recv(&mut rx).await;
    assert_eq!(results["steady"], Status::Success);
    assert_eq!(results["flaky"], Status::DbError);

    store.unregister_sync_callback().await.unwrap();
    assert_eq!(
        store.unregister_sync_callback().await.unwrap_err(),
        Status::StoreNotSubscribe
    );
}

#[tokio::test]
async fn sync_with_no_devices_is_rejected() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    assert_eq!(
        store.sync(&[], SyncMode::Push, 0).await.unwrap_err(),
        Status::InvalidArgument
    );
    assert_eq!(
        store
            .sync(&[String::new()], SyncMode::Push, 0)
            .await
            .unwrap_err(),
        Status::InvalidArgument
    );
}

#[tokio::test]
async fn death_watch_tells_every_watcher_once() {
    let fixture = fixture();
    let _store = open_store(&fixture).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let recipient: Arc<dyn DeathRecipient> = Arc::new(ChannelRecipient(tx));
    fixture.client.death_watch().add(recipient.clone());
    // Same watcher added twice is told twice.
    fixture.client.death_watch().add(recipient.clone());

    fixture.host.shutdown();
    expect_recv(&mut rx).await;
    expect_recv(&mut rx).await;

    // Late watcher learns immediately.
    let (late_tx, mut late_rx) = mpsc::unbounded_channel();
    let late: Arc<dyn DeathRecipient> = Arc::new(ChannelRecipient(late_tx));
    fixture.client.death_watch().add(late);
    expect_recv(&mut late_rx).await;
}

#[tokio::test]
async fn result_set_pages_completely_and_in_order() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    let entries: Vec<Entry> = (0..20)
        .map(|i| Entry::new(format!("page.{i:02}"), vec![b'x'; 20]))
        .collect();
    store.put_batch(entries.clone()).await.unwrap();

    // Manual paging: more than one page given the tiny soft limit.
    let prefix = Key::from("page.");
    let result_set = store.get_result_set(prefix.clone()).await.unwrap();
    let (first_page, next) = result_set.get_entries(&prefix, &Key::empty()).await.unwrap();
    assert!(first_page.len() < 20);
    assert!(!next.is_empty());
    store.close_result_set(&result_set).await.unwrap();

    // Aggregation drains every page exactly once.
    let all = store.get_entries_all("page.").await.unwrap();
    assert_eq!(all, entries);
}

#[tokio::test]
async fn result_set_is_isolated_from_later_writes() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store.put("stable", "before").await.unwrap();

    let result_set = store.get_result_set("").await.unwrap();
    store.put("stable", "after").await.unwrap();
    store.put("fresh", "new").await.unwrap();

    assert_eq!(
        result_set.get(&Key::from("stable")).await.unwrap().as_bytes(),
        b"before"
    );
    assert_eq!(
        result_set.get(&Key::from("fresh")).await.unwrap_err(),
        Status::KeyNotFound
    );
    store.close_result_set(&result_set).await.unwrap();
}

#[tokio::test]
async fn closed_result_set_stops_answering() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store.put("k", "v").await.unwrap();

    let result_set = store.get_result_set("").await.unwrap();
    store.close_result_set(&result_set).await.unwrap();

    // The handle is gone on the service side.
    assert_eq!(
        result_set.get(&Key::from("k")).await.unwrap_err(),
        Status::IpcError
    );
    // Closing it again is refused.
    assert_eq!(
        store.close_result_set(&result_set).await.unwrap_err(),
        Status::IllegalState
    );
}

#[tokio::test]
async fn query_operations_filter_by_engine_interpretation() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store
        .put_batch(vec![
            Entry::new("q.one", "1"),
            Entry::new("q.two", "2"),
            Entry::new("other", "3"),
        ])
        .await
        .unwrap();

    let entries = store.get_entries_with_query("q.").await.unwrap();
    assert_eq!(entries.len(), 2);

    let result_set = store.get_result_set_with_query("q.").await.unwrap();
    let (page, next) = result_set.get_entries(&Key::empty(), &Key::empty()).await.unwrap();
    assert_eq!(page.len(), 2);
    assert!(next.is_empty());
    store.close_result_set(&result_set).await.unwrap();
}

#[tokio::test]
async fn keys_page_and_snapshot_get_work_through_the_proxy() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store
        .put_batch(vec![Entry::new("ka", "1"), Entry::new("kb", "2")])
        .await
        .unwrap();

    let result_set = store.get_result_set("k").await.unwrap();
    let (keys, next) = result_set.get_keys(&Key::from("k"), &Key::empty()).await.unwrap();
    assert_eq!(keys, vec![Key::from("ka"), Key::from("kb")]);
    assert!(next.is_empty());
    store.close_result_set(&result_set).await.unwrap();
}

#[tokio::test]
async fn store_metadata_round_trips() {
    let fixture = fixture();
    let store = open_store(&fixture).await;

    assert_eq!(store.get_security_level().await.unwrap(), SecurityLevel::S1);

    let devices = fixture.client.get_device_list().await.unwrap();
    assert_eq!(devices, vec![DeviceInfo::new("dev-1", "alpha", "phone")]);

    store
        .control(ControlCmd::SetSyncParam, &KvParam::new(&b"delay=100"[..]))
        .await
        .unwrap();
    let param = store
        .control(ControlCmd::GetSyncParam, &KvParam::default())
        .await
        .unwrap();
    assert_eq!(param, Some(KvParam::new(&b"delay=100"[..])));

    store.set_capability_enabled(true).await.unwrap();
    store
        .set_capability_range(&["S1".to_string()], &["S2".to_string()])
        .await
        .unwrap();
    store.remove_device_data("dev-1").await.unwrap();
}

#[tokio::test]
async fn reopened_store_shares_state_and_close_invalidates_handle() {
    let fixture = fixture();
    let store = open_store(&fixture).await;
    store.put("shared", "v").await.unwrap();

    let again = open_store(&fixture).await;
    assert_eq!(again.get("shared").await.unwrap().as_bytes(), b"v");

    fixture
        .client
        .close_kv_store("test-app", "test-store")
        .await
        .unwrap();
    // Calls through a closed handle no longer reach a store service.
    assert_eq!(store.get("shared").await.unwrap_err(), Status::IpcError);
}
