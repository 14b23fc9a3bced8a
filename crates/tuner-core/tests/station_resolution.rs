mod common;

use common::fixtures::{music, station, MemoryDirectory};
use std::sync::Arc;
use std::time::Duration;
use tuner_core::station_sync::{StationSync, SyncPolicy};
use tuner_core::TunerError;

#[tokio::test(start_paused = true)]
async fn repeated_resolves_within_ttl_hit_the_directory_once() {
    let dir = Arc::new(MemoryDirectory::with(vec![station("st-1", 92.1, vec![music("a")])]));
    let sync = StationSync::new(dir.clone(), SyncPolicy::default());

    for tenths in [870u16, 921, 1013, 1080] {
        let mhz = tenths as f64 / 10.0;
        let first = sync.resolve(mhz).await.unwrap();
        for _ in 0..5 {
            assert_eq!(sync.resolve(mhz).await.unwrap(), first);
        }
    }
    assert_eq!(dir.lookups(), 4);
}

#[tokio::test(start_paused = true)]
async fn empty_frequency_is_cached_for_thirty_seconds() {
    let dir = Arc::new(MemoryDirectory::default());
    let sync = StationSync::new(dir.clone(), SyncPolicy::default());

    assert_eq!(sync.resolve(101.3).await.unwrap(), None);
    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(sync.resolve(101.3).await.unwrap(), None);
    assert_eq!(dir.lookups(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(sync.resolve(101.3).await.unwrap(), None);
    assert_eq!(dir.lookups(), 2);
}

#[tokio::test(start_paused = true)]
async fn found_station_is_cached_for_five_minutes() {
    let dir = Arc::new(MemoryDirectory::with(vec![station("st-1", 92.1, vec![music("a")])]));
    let sync = StationSync::new(dir.clone(), SyncPolicy::default());

    let found = sync.resolve(92.1).await.unwrap().unwrap();
    assert_eq!(found.id, "st-1");

    tokio::time::advance(Duration::from_secs(299)).await;
    sync.resolve(92.1).await.unwrap();
    assert_eq!(dir.lookups(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    sync.resolve(92.1).await.unwrap();
    assert_eq!(dir.lookups(), 2);
}

#[tokio::test]
async fn out_of_band_frequency_is_rejected_before_lookup() {
    let dir = Arc::new(MemoryDirectory::default());
    let sync = StationSync::new(dir.clone(), SyncPolicy::default());

    for bad in [86.9, 86.96, 108.04, 108.1, -1.0, f64::INFINITY] {
        assert!(matches!(sync.resolve(bad).await, Err(TunerError::InvalidFrequency(_))));
    }
    assert_eq!(dir.lookups(), 0);
}

#[tokio::test]
async fn cache_is_keyed_by_frequency_not_call_order() {
    let dir = Arc::new(MemoryDirectory::with(vec![
        station("st-1", 92.1, vec![music("a")]),
        station("st-2", 99.0, vec![music("b")]),
    ]));
    let sync = Arc::new(StationSync::new(dir, SyncPolicy::default()));

    let (a, b) = tokio::join!(sync.resolve(92.1), sync.resolve(99.0));
    assert_eq!(a.unwrap().unwrap().id, "st-1");
    assert_eq!(b.unwrap().unwrap().id, "st-2");
    assert_eq!(sync.resolve(92.1).await.unwrap().unwrap().id, "st-1");
}
