mod common;

use common::fixtures::{music, new_station, MemoryDirectory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tuner_core::signal::FileSignal;
use tuner_core::station_sync::{StationDirectory, StationSync, SyncPolicy};

#[tokio::test]
async fn station_created_in_one_instance_appears_in_the_other() {
    let tmp = tempfile::tempdir().unwrap();
    let signal_path = tmp.path().join("stations.signal");
    let shared = Arc::new(MemoryDirectory::default());

    let signal_a = Arc::new(FileSignal::with_origin(signal_path.clone(), "tab-a".into()));
    let signal_b = FileSignal::with_origin(signal_path, "tab-b".into());
    let tab_a = StationSync::new(shared.clone(), SyncPolicy::default()).with_signal(signal_a);
    let tab_b = Arc::new(StationSync::new(shared.clone(), SyncPolicy::default()));

    // Both tabs have already seen 99.0 as empty.
    assert!(tab_a.resolve(99.0).await.unwrap().is_none());
    assert!(tab_b.resolve(99.0).await.unwrap().is_none());

    // Tab B invalidates whenever someone else touches the signal.
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let watcher = signal_b.watch(Duration::from_millis(10), cancel.clone(), move |_| {
        let _ = tx.try_send(());
    });
    // Let the watcher take its baseline reading first.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let created = shared
        .create_station(new_station(99.0, "Night Owls", vec![music("a")]))
        .await
        .unwrap();
    tab_a.force_refresh().await;
    tab_a.notify_updated().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("tab B should observe the signal")
        .unwrap();
    tab_b.force_refresh().await;

    assert_eq!(tab_a.resolve(99.0).await.unwrap().unwrap().id, created.id);
    assert_eq!(tab_b.resolve(99.0).await.unwrap().unwrap().id, created.id);
    assert_eq!(tab_b.last_sync(), 1);

    cancel.cancel();
    watcher.await.unwrap();
}
