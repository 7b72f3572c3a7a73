//! Integration tests for the scan → dedup → filter → dispatch flow.
//!
//! Validates:
//! - New messages matching the filter reach every handler exactly once
//! - Messages present at startup never dispatch
//! - Filtered-out messages stay seen, even after the filter widens
//! - Failing handlers do not starve the others
//! - Malformed files are skipped and retried on later cycles
//! - A blocking handler leaves other async tasks running on time

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use synapse_watch::models::{FilterCriteria, Message, Priority};
use synapse_watch::watcher::poll_loop::SCAN_FAILURE_ESCALATION;
use synapse_watch::AppError;

use super::test_helpers::{
    fast_watcher, received, record_into, start, stop, wait_cycles, wait_for, write_message,
};

/// Scenario A: two pre-existing files, one new addressed message.
#[tokio::test]
async fn new_addressed_message_dispatches_once_to_all_handlers() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_message(dir.path(), "m1", r#"{"from": "FORGE", "to": ["ATLAS"]}"#);
    write_message(dir.path(), "m2", r#"{"from": "CLIO", "to": ["ATLAS"]}"#);

    let watcher = fast_watcher(dir.path(), FilterCriteria::default().with_recipient("ATLAS"));
    let first = record_into(&watcher, "first");
    let second = record_into(&watcher, "second");
    let handle = start(&watcher).await;
    assert_eq!(watcher.seen_count(), 2, "startup snapshot seeds existing files");

    write_message(
        dir.path(),
        "m3",
        r#"{"from": "FORGE", "to": ["ATLAS"], "priority": "HIGH", "subject": "Build X"}"#,
    );
    wait_for(|| received(&second).len() == 1).await;
    wait_cycles(&watcher, 3).await;

    assert_eq!(received(&first), vec!["m3"]);
    assert_eq!(received(&second), vec!["m3"]);
    assert_eq!(watcher.stats().dispatched, 1);

    stop(&watcher, handle).await;
}

/// Scenario B: a filtered-out message stays seen when the filter widens.
#[tokio::test]
async fn filtered_message_is_seen_and_never_redispatched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(
        dir.path(),
        FilterCriteria::default().with_priority(Priority::Critical),
    );
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    write_message(dir.path(), "m1", r#"{"priority": "NORMAL", "subject": "fyi"}"#);
    wait_for(|| watcher.stats().filtered_out == 1).await;
    assert_eq!(watcher.seen_count(), 1);

    watcher.set_filter(FilterCriteria::default());
    wait_cycles(&watcher, 3).await;
    assert!(received(&log).is_empty(), "seen messages never dispatch");

    write_message(dir.path(), "m2", r#"{"priority": "NORMAL"}"#);
    wait_for(|| received(&log).len() == 1).await;
    assert_eq!(received(&log), vec!["m2"], "widened filter applies to new messages");

    stop(&watcher, handle).await;
}

#[tokio::test]
async fn persistent_file_dispatches_only_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    write_message(dir.path(), "m1", r#"{"subject": "hello"}"#);
    wait_for(|| received(&log).len() == 1).await;

    // Content drift under the same identity is still the same message.
    write_message(dir.path(), "m1", r#"{"subject": "hello again"}"#);
    wait_cycles(&watcher, 5).await;

    assert_eq!(received(&log), vec!["m1"]);
    stop(&watcher, handle).await;
}

#[tokio::test]
async fn preexisting_messages_never_dispatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    for id in ["a", "b", "c"] {
        write_message(dir.path(), id, r#"{"to": ["ATLAS"]}"#);
    }

    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;
    wait_cycles(&watcher, 5).await;

    assert!(received(&log).is_empty());
    assert_eq!(watcher.stats().dispatched, 0);
    stop(&watcher, handle).await;
}

#[tokio::test]
async fn failing_handler_does_not_starve_others() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let before = record_into(&watcher, "before");
    watcher
        .register_fn("broken", |_msg: &Message| {
            Err(AppError::Handler("always fails".into()))
        })
        .expect("register");
    watcher
        .register_fn("panics", |_msg: &Message| panic!("handler bug"))
        .expect("register");
    let after = record_into(&watcher, "after");
    let handle = start(&watcher).await;

    write_message(dir.path(), "m1", "{}");
    write_message(dir.path(), "m2", "{}");
    wait_for(|| received(&after).len() == 2).await;

    assert_eq!(received(&before), vec!["m1", "m2"]);
    assert_eq!(received(&after), vec!["m1", "m2"]);
    assert_eq!(watcher.stats().handler_failures, 4);

    write_message(dir.path(), "m3", "{}");
    wait_for(|| received(&after).len() == 3).await;

    stop(&watcher, handle).await;
}

#[tokio::test]
async fn malformed_files_are_skipped_and_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    for i in 0..10 {
        let content = if matches!(i, 2 | 5 | 8) {
            "{ partial".to_owned()
        } else {
            format!(r#"{{"subject": "message {i}"}}"#)
        };
        write_message(dir.path(), &format!("m{i}"), &content);
    }

    wait_for(|| received(&log).len() == 7).await;
    wait_for(|| watcher.stats().malformed >= 3).await;
    assert_eq!(watcher.seen_count(), 7, "malformed files are not marked seen");

    // The producer finishes writing; the next cycle picks the file up.
    write_message(dir.path(), "m5", r#"{"subject": "message 5"}"#);
    wait_for(|| received(&log).len() == 8).await;
    assert!(received(&log).contains(&"m5".to_owned()));

    stop(&watcher, handle).await;
}

#[tokio::test]
async fn non_message_files_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    std::fs::write(dir.path().join("README.txt"), "not a message").expect("write");
    std::fs::create_dir(dir.path().join("archive")).expect("mkdir");
    wait_cycles(&watcher, 3).await;

    assert!(received(&log).is_empty());
    assert_eq!(watcher.stats().malformed, 0);
    stop(&watcher, handle).await;
}

#[tokio::test]
async fn handlers_see_messages_in_discovery_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    write_message(dir.path(), "b", "{}");
    write_message(dir.path(), "a", "{}");
    wait_for(|| received(&log).len() == 2).await;
    write_message(dir.path(), "0", "{}");
    wait_for(|| received(&log).len() == 3).await;

    let got = received(&log);
    assert_eq!(got[2], "0", "later cycles dispatch after earlier ones");
    stop(&watcher, handle).await;
}

#[tokio::test]
async fn scan_failures_are_retried() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watched = dir.path().join("active");
    std::fs::create_dir(&watched).expect("mkdir");

    let watcher = fast_watcher(&watched, FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    std::fs::remove_dir(&watched).expect("remove watched dir");
    // Past the point where failures are logged as errors.
    wait_for(|| watcher.stats().scan_failures > SCAN_FAILURE_ESCALATION).await;

    std::fs::create_dir(&watched).expect("recreate");
    write_message(&watched, "m1", "{}");
    wait_for(|| received(&log).len() == 1).await;
    assert_eq!(received(&log), vec!["m1"]);

    stop(&watcher, handle).await;
}

#[tokio::test]
async fn deleted_malformed_file_is_no_longer_pending() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let log = record_into(&watcher, "recorder");
    let handle = start(&watcher).await;

    write_message(dir.path(), "half", r#"{"subject": "cut o"#);
    wait_for(|| watcher.stats().pending_malformed == 1).await;

    std::fs::remove_file(dir.path().join("half.json")).expect("remove");
    wait_for(|| watcher.stats().pending_malformed == 0).await;

    // A fresh file under the same identity is treated as new.
    write_message(dir.path(), "half", r#"{"subject": "complete"}"#);
    wait_for(|| received(&log) == vec!["half"]).await;
    assert_eq!(watcher.stats().pending_malformed, 0);

    stop(&watcher, handle).await;
}

#[tokio::test]
async fn blocking_handler_leaves_other_timers_on_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(dir.path(), FilterCriteria::default());
    let entered = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&entered);
    watcher
        .register_fn("slow", move |_: &Message| {
            flag.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(800));
            Ok(())
        })
        .expect("register");
    let handle = start(&watcher).await;

    write_message(dir.path(), "m1", r#"{"subject": "slow"}"#);
    wait_for(|| entered.load(Ordering::SeqCst)).await;

    // Runs on the same current-thread runtime as the poll loop.
    let began = Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let elapsed = began.elapsed();
    assert!(
        elapsed < Duration::from_millis(500),
        "timer took {elapsed:?} while a handler was blocked"
    );

    stop(&watcher, handle).await;
    assert_eq!(watcher.stats().dispatched, 1);
}

#[tokio::test]
async fn keyword_filter_applies_to_body() {
    let dir = tempfile::tempdir().expect("tempdir");
    let watcher = fast_watcher(
        dir.path(),
        FilterCriteria::default().with_keywords(["urgent"]),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    watcher
        .register_fn("counter", move |msg: &Message| {
            assert_eq!(msg.identity, "hit");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .expect("register");
    let handle = start(&watcher).await;

    write_message(dir.path(), "miss", r#"{"subject": "routine", "body": {"x": 1}}"#);
    write_message(dir.path(), "hit", r#"{"subject": "status", "body": {"note": "URGENT fix"}}"#);
    wait_for(|| count.load(Ordering::SeqCst) == 1).await;
    wait_for(|| watcher.stats().filtered_out == 1).await;

    stop(&watcher, handle).await;
}
