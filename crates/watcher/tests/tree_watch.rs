//! End-to-end tree watching against the real kernel device

#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use treewatch::{Event, EventMask, EventStream, PollTreeWatcher, WaitOutcome, WatchConfig, WatchError};

const PATIENCE: Duration = Duration::from_secs(5);

/// Collect events until `done` holds or the patience runs out
fn collect_until(
    watcher: &mut PollTreeWatcher<'_>,
    mut done: impl FnMut(&[Event]) -> bool,
) -> Vec<Event> {
    let deadline = Instant::now() + PATIENCE;
    let mut events = Vec::new();

    while !done(&events) {
        let left = deadline.saturating_duration_since(Instant::now());
        match watcher.wait(Some(left)).unwrap() {
            WaitOutcome::Ready => events.extend(watcher.read_events().unwrap()),
            WaitOutcome::TimedOut => break,
            WaitOutcome::Stopped => unreachable!("no stop descriptor"),
        }
    }

    events
}

fn saw(events: &[Event], path: &Path, mask: EventMask) -> bool {
    events
        .iter()
        .any(|e| e.full_path().as_deref() == Some(path) && e.mask.contains(mask))
}

fn open() -> PollTreeWatcher<'static> {
    PollTreeWatcher::open(&WatchConfig::default(), None).unwrap()
}

#[test]
fn test_events_inside_new_subdirectory_are_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut watcher = open();
    watcher.add_tree(root, EventMask::CREATE).unwrap();

    let sub = root.join("sub");
    fs::create_dir(&sub).unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &sub, EventMask::CREATE));
    assert!(saw(&events, &sub, EventMask::CREATE | EventMask::ISDIR));

    let file = sub.join("file.txt");
    fs::write(&file, b"hello").unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &file, EventMask::CREATE));
    assert!(saw(&events, &file, EventMask::CREATE));
    assert!(!events[0].is_dir());

    watcher.close().unwrap();
}

#[test]
fn test_initial_walk_covers_existing_tree() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    fs::create_dir_all(root.join("d/e")).unwrap();
    fs::write(root.join("a/readme"), b"x").unwrap();

    let mut watcher = open();
    watcher.add_tree(root, EventMask::CREATE | EventMask::DELETE).unwrap();

    let mut watched = watcher.watched_paths();
    watched.sort();
    let expected: Vec<PathBuf> = ["", "a", "a/b", "a/b/c", "d", "d/e"]
        .iter()
        .map(|rel| if rel.is_empty() { root.to_path_buf() } else { root.join(rel) })
        .collect();
    assert_eq!(watched, expected);

    let deep = root.join("a/b/c/deep.txt");
    fs::write(&deep, b"x").unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &deep, EventMask::CREATE));
    assert!(saw(&events, &deep, EventMask::CREATE));
}

#[test]
fn test_single_watch_inside_tree_keeps_following_new_directories() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir(root.join("sub")).unwrap();

    let mut watcher = open();
    watcher.add_tree(root, EventMask::ALL_EVENTS).unwrap();
    watcher.add_watch(root.join("sub"), EventMask::MODIFY).unwrap();

    let new = root.join("sub/new");
    fs::create_dir(&new).unwrap();

    // The creation itself is filtered out by the MODIFY-only request on sub
    let deadline = Instant::now() + PATIENCE;
    while watcher.handle_for(&new).is_none() && Instant::now() < deadline {
        if watcher.wait(Some(Duration::from_millis(100))).unwrap() == WaitOutcome::Ready {
            assert!(watcher.read_events().unwrap().is_empty());
        }
    }
    assert!(watcher.handle_for(&new).is_some());

    let file = new.join("file.txt");
    fs::write(&file, b"x").unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &file, EventMask::MODIFY));
    assert!(saw(&events, &file, EventMask::MODIFY));

    watcher.close().unwrap();
}

#[test]
fn test_unrequested_categories_are_not_reported() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let mut watcher = open();
    watcher.add_tree(root, EventMask::DELETE).unwrap();

    fs::create_dir(root.join("made")).unwrap();
    fs::write(root.join("victim"), b"x").unwrap();
    fs::remove_file(root.join("victim")).unwrap();

    let victim = root.join("victim");
    let events = collect_until(&mut watcher, |events| saw(events, &victim, EventMask::DELETE));
    assert!(events.iter().all(|e| e.mask.contains(EventMask::DELETE)));
    // Still followed even though CREATE was not requested
    assert!(watcher.handle_for(root.join("made")).is_some());
}

#[test]
fn test_remove_tree_stops_reporting_descendants() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("keep")).unwrap();
    fs::create_dir_all(root.join("drop/inner")).unwrap();

    let mut watcher = open();
    watcher.add_tree(root, EventMask::CREATE).unwrap();
    watcher.remove_tree(root.join("drop")).unwrap();
    assert!(watcher.handle_for(root.join("drop/inner")).is_none());

    fs::write(root.join("drop/inner/ghost"), b"x").unwrap();
    let kept = root.join("keep/file");
    fs::write(&kept, b"x").unwrap();

    let events = collect_until(&mut watcher, |events| saw(events, &kept, EventMask::CREATE));
    assert!(saw(&events, &kept, EventMask::CREATE));
    assert!(!events
        .iter()
        .any(|e| e.full_path().is_some_and(|p| p.starts_with(root.join("drop")))));
}

#[test]
fn test_moved_directory_is_tracked_under_new_name() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    fs::create_dir_all(root.join("old/inner")).unwrap();

    let mut watcher = open();
    watcher.add_tree(root, EventMask::CREATE | EventMask::MOVE).unwrap();

    fs::rename(root.join("old"), root.join("new")).unwrap();
    let new = root.join("new");
    let events = collect_until(&mut watcher, |events| saw(events, &new, EventMask::MOVED_TO));
    let from = events.iter().find(|e| e.mask.contains(EventMask::MOVED_FROM)).unwrap();
    let to = events.iter().find(|e| e.mask.contains(EventMask::MOVED_TO)).unwrap();
    assert_eq!(from.cookie, to.cookie);
    assert!(watcher.handle_for(root.join("old/inner")).is_none());

    let file = root.join("new/inner/file");
    fs::write(&file, b"x").unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &file, EventMask::CREATE));
    assert!(saw(&events, &file, EventMask::CREATE));
}

#[test]
fn test_deleting_root_tears_the_tree_down() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("root");
    fs::create_dir_all(root.join("sub")).unwrap();

    let mut watcher = open();
    watcher
        .add_tree(&root, EventMask::DELETE_SELF | EventMask::IGNORED)
        .unwrap();

    fs::remove_dir_all(&root).unwrap();
    let events = collect_until(&mut watcher, |events| saw(events, &root, EventMask::IGNORED));
    assert!(saw(&events, &root, EventMask::DELETE_SELF));

    assert!(watcher.roots().is_empty());
    assert!(watcher.watched_paths().is_empty());
}

#[test]
fn test_missing_root_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let mut watcher = open();

    assert!(matches!(
        watcher.add_tree(temp_dir.path().join("missing"), EventMask::CREATE),
        Err(WatchError::NotFound(_))
    ));
    assert!(watcher.roots().is_empty());
}

#[test]
fn test_closed_watcher_fails_fast() {
    let temp_dir = TempDir::new().unwrap();
    let mut watcher = open();
    watcher.close().unwrap();

    assert!(matches!(
        watcher.add_tree(temp_dir.path(), EventMask::CREATE),
        Err(WatchError::Closed)
    ));
    assert!(matches!(watcher.events().next(), Some(Err(WatchError::Closed))));
}
