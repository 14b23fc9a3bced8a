mod common;

use common::fixtures::{message, music, station};
use tuner_core::failed::FailedTracks;
use tuner_core::playback::{PlaybackMachine, PlaybackStatus};
use tuner_core::selection::{candidates, next, TrackSelector};

#[test]
fn empty_message_is_filtered_and_sole_candidate_wraps_to_itself() {
    let st = station("st-1", 92.1, vec![message("msg-1", ""), music("music-1")]);
    let failed = FailedTracks::new();

    let pool: Vec<&str> = candidates(&st.playlist, &failed).iter().map(|i| i.id.as_str()).collect();
    assert_eq!(pool, vec!["music-1"]);
    assert_eq!(next(&st.playlist, &failed, None).unwrap().id, "music-1");
    assert_eq!(next(&st.playlist, &failed, Some("music-1")).unwrap().id, "music-1");
}

#[test]
fn failed_track_is_skipped_on_next() {
    let st = station("st-1", 92.1, vec![music("a"), music("b"), music("c")]);
    let mut failed = FailedTracks::new();
    let mut selector = TrackSelector::new();
    let mut playback = PlaybackMachine::new();

    let first = selector.next(&st.playlist, &failed).unwrap().clone();
    selector.select(first.clone());
    playback.begin_loading(first.id.clone()).unwrap();
    playback.started().unwrap();

    let b = selector.next(&st.playlist, &failed).unwrap().clone();
    assert_eq!(b.id, "b");
    playback.set_idle();
    selector.select(b.clone());
    playback.begin_loading(b.id.clone()).unwrap();

    // Playback of "b" fails.
    playback.fail("media error: 404");
    failed.add(b.id.clone());
    assert_eq!(playback.status(), PlaybackStatus::Error);

    // Playlist order is unchanged but "b" is gone from rotation; from the
    // failed id, next() restarts at the first candidate.
    assert_eq!(selector.next(&st.playlist, &failed).unwrap().id, "a");
    assert_eq!(next(&st.playlist, &failed, Some("a")).unwrap().id, "c");
    assert_eq!(st.playlist[1].id, "b");
}

#[test]
fn navigation_flags_follow_history_and_pool() {
    let st = station("st-1", 92.1, vec![music("a"), music("b")]);
    let mut failed = FailedTracks::new();
    let mut selector = TrackSelector::new();

    assert!(selector.can_go_forward(&st.playlist, &failed));
    assert!(!selector.can_go_back());

    selector.select(st.playlist[0].clone());
    selector.select(st.playlist[1].clone());
    assert!(selector.can_go_back());
    assert_eq!(selector.previous(&st.playlist, &failed).unwrap().id, "a");

    failed.add("a");
    failed.add("b");
    assert!(!selector.can_go_forward(&st.playlist, &failed));
    assert!(selector.previous(&st.playlist, &failed).is_none());

    failed.clear();
    assert!(selector.can_go_forward(&st.playlist, &failed));
}
