//! End-to-end scenarios driven through the engine facade
//!
//! Every scenario stays on the control host: both endpoints resolve to
//! the local alias set, so transfers run through the real scheduler,
//! strategy chain, subprocess supervision, and finalization against
//! temporary directories.

use fleetcp_engine::{TransferEvent, TransferRequest};
use fleetcp_tests::test_utils::{
    create_test_file, create_test_tree, local_config, local_engine, wait_for_complete,
};
use fleetcp_types::{FileItem, TerminalStatus, TransferIntent};
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_local_copy_completes_all_items() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let a = create_test_file(src.path(), "a.txt", b"first");
    let b = create_test_file(src.path(), "b.txt", b"second");
    let c = create_test_file(src.path(), "c.bin", &vec![7u8; 2048]);

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![
        FileItem::new(a.to_string_lossy().to_string(), false),
        FileItem::new(b.to_string_lossy().to_string(), false),
        FileItem::new(c.to_string_lossy().to_string(), false),
    ])
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Success);
    assert_eq!(done.completed, 3);
    assert_eq!(done.failed, 0);
    for name in ["a.txt", "b.txt", "c.bin"] {
        assert!(dest.path().join(name).is_file(), "{} missing", name);
    }
    // Copies leave the sources in place
    assert!(a.is_file() && b.is_file() && c.is_file());
    assert_eq!(engine.active_count(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_local_copy_of_directory_preserves_tree() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let tree = create_test_tree(src.path(), "payload");

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![FileItem::new(tree.to_string_lossy().to_string(), true)])
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Success);
    let copied = dest.path().join("payload");
    assert!(copied.join("alpha.txt").is_file());
    assert!(copied.join("beta.bin").is_file());
    assert!(copied.join("nested").join("gamma.txt").is_file());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_local_move_relocates_sources() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let a = create_test_file(src.path(), "one.txt", b"one");
    let b = create_test_file(src.path(), "two.txt", b"two");

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![
        FileItem::new(a.to_string_lossy().to_string(), false),
        FileItem::new(b.to_string_lossy().to_string(), false),
    ])
    .with_intent(TransferIntent::Move)
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Success);
    assert_eq!(done.completed, 2);
    assert!(dest.path().join("one.txt").is_file());
    assert!(dest.path().join("two.txt").is_file());
    assert!(!a.exists());
    assert!(!b.exists());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_move_into_own_directory_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let file = create_test_file(dir.path(), "stay.txt", b"already here");

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dir.path().to_string_lossy().to_string(),
    )
    .with_items(vec![FileItem::new(
        file.to_string_lossy().to_string(),
        false,
    )])
    .with_intent(TransferIntent::Move)
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Success);
    assert_eq!(done.completed, 1);
    assert!(file.is_file(), "no-op move must not delete the source");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_missing_source_yields_partial_success() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let real = create_test_file(src.path(), "real.txt", b"present");
    let missing = src.path().join("ghost.txt");

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![
        FileItem::new(real.to_string_lossy().to_string(), false),
        FileItem::new(missing.to_string_lossy().to_string(), false),
    ])
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::PartialSuccess);
    assert_eq!(done.completed, 1);
    assert_eq!(done.failed, 1);
    assert_eq!(done.completed + done.failed, 2);
    assert!(dest.path().join("real.txt").is_file());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_sequential_mode_runs_items_in_order() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let a = create_test_file(src.path(), "first.txt", b"1");
    let b = create_test_file(src.path(), "second.txt", b"2");

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![
        FileItem::new(a.to_string_lossy().to_string(), false),
        FileItem::new(b.to_string_lossy().to_string(), false),
    ])
    .with_parallel(false)
    .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Success);
    assert_eq!(done.completed, 2);
    assert!(dest.path().join("first.txt").is_file());
    assert!(dest.path().join("second.txt").is_file());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_terminates_inflight_transfer_without_completion() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    // A pipe with no writer blocks the copying process on open, holding
    // the transfer in flight until it is cancelled.
    let pipe = src.path().join("slow.pipe");
    let made = std::process::Command::new("mkfifo")
        .arg(&pipe)
        .status()
        .unwrap();
    assert!(made.success());

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![FileItem::new(
        pipe.to_string_lossy().to_string(),
        false,
    )])
    .with_client("tests");
    let id = engine.submit(request).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.active_count(), 1, "transfer should still be running");

    engine.cancel(id, false).await;
    assert!(engine.status(id).is_none());
    assert_eq!(engine.active_count(), 0);

    // A cancelled transfer must never emit a completion event
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(TransferEvent::Complete { id: done, .. })) if done == id => {
                panic!("cancelled transfer emitted a completion event");
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_finalize_invalidates_listing_cache() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let file = create_test_file(src.path(), "moving.txt", b"soon gone");
    let src_dir = src.path().to_string_lossy().to_string();

    let engine = local_engine(local_config());
    let mut events = engine.subscribe();

    // Prime the cache with the pre-move listing
    let before = engine
        .list_directory("localhost", Some(&src_dir), false, false)
        .await
        .unwrap();
    assert!(before.iter().any(|e| e.name == "moving.txt"));

    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![FileItem::new(
        file.to_string_lossy().to_string(),
        false,
    )])
    .with_intent(TransferIntent::Move)
    .with_client("tests");
    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;
    assert_eq!(done.status, TerminalStatus::Success);

    // A stale cache slot would still show the moved file here
    let after = engine
        .list_directory("localhost", Some(&src_dir), false, false)
        .await
        .unwrap();
    assert!(!after.iter().any(|e| e.name == "moving.txt"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_host_operations_roundtrip() {
    let root = TempDir::new().unwrap();
    let engine = local_engine(local_config());

    let workdir = root.path().join("workspace");
    let workdir_str = workdir.to_string_lossy().to_string();
    engine
        .create_dir("tests", "localhost", &workdir_str)
        .await
        .unwrap();
    assert!(workdir.is_dir());

    let file = create_test_file(&workdir, "draft.txt", b"draft");
    let listed = engine
        .list_directory("localhost", Some(&workdir_str), false, true)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "draft.txt");
    assert!(!listed[0].is_dir);

    let renamed = workdir.join("final.txt");
    engine
        .rename(
            "tests",
            "localhost",
            &file.to_string_lossy(),
            &renamed.to_string_lossy(),
        )
        .await
        .unwrap();
    assert!(!file.exists());
    assert!(renamed.is_file());

    engine
        .delete_paths(
            "tests",
            "localhost",
            &[renamed.to_string_lossy().to_string()],
        )
        .await
        .unwrap();
    assert!(!renamed.exists());

    let empty = engine
        .list_directory("localhost", Some(&workdir_str), false, false)
        .await
        .unwrap();
    assert!(empty.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_progress_events_are_emitted_for_known_sizes() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let payload = create_test_file(src.path(), "payload.bin", &vec![1u8; 64 * 1024]);

    let mut config = local_config();
    config.transfer.progress_interval_ms = 50;
    let engine = local_engine(config);
    let mut events = engine.subscribe();

    let item = FileItem::new(payload.to_string_lossy().to_string(), false).with_size(64 * 1024);
    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![item])
    .with_client("tests");
    let id = engine.submit(request).unwrap();

    let mut saw_progress = false;
    let completion = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(TransferEvent::Progress { id: event_id, .. }) if event_id == id => {
                    saw_progress = true;
                }
                Ok(TransferEvent::Complete {
                    id: event_id,
                    status,
                    ..
                }) if event_id == id => return status,
                Ok(_) => {}
                Err(err) => panic!("event stream failed: {}", err),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(completion, TerminalStatus::Success);
    assert!(saw_progress, "no progress events before completion");
    assert_eq!(engine.bytes_transferred(id), 0, "gone after finalize");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_audit_log_records_completed_transfers() {
    let src = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let state = TempDir::new().unwrap();
    let file = create_test_file(src.path(), "tracked.txt", b"tracked");

    let mut config = local_config();
    config.audit.enabled = true;
    config.audit.log_path = state.path().join("audit.jsonl");
    let engine = local_engine(config);
    let mut events = engine.subscribe();

    let request = TransferRequest::new(
        "localhost",
        "localhost",
        dest.path().to_string_lossy().to_string(),
    )
    .with_items(vec![FileItem::new(
        file.to_string_lossy().to_string(),
        false,
    )])
    .with_client("198.51.100.77");
    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;
    assert_eq!(done.status, TerminalStatus::Success);

    // The audit record is appended after the terminal event fires
    let audit_path = state.path().join("audit.jsonl");
    let mut contents = String::new();
    for _ in 0..40 {
        contents = std::fs::read_to_string(&audit_path).unwrap_or_default();
        if !contents.trim().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let line = contents.lines().next().expect("no audit record written");
    let record: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(record["action"], "transfer");
    assert_eq!(record["client"], "198.51.100.77");
    assert_eq!(record["status"], "success");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_remembered_paths_survive_reload() {
    let state = TempDir::new().unwrap();
    let mut config = local_config();
    config.audit.remembered_paths_path = state.path().join("paths.json");

    let engine = local_engine(config.clone());
    engine
        .remember_path("198.51.100.77", "left", "/srv/exports")
        .unwrap();
    assert_eq!(
        engine.last_path("198.51.100.77", "left").as_deref(),
        Some("/srv/exports")
    );
    engine.shutdown().await;

    // A fresh engine reloads the persisted store
    let reloaded = local_engine(config);
    assert_eq!(
        reloaded.last_path("198.51.100.77", "left").as_deref(),
        Some("/srv/exports")
    );
    assert_eq!(reloaded.last_path("198.51.100.77", "right"), None);
    reloaded.shutdown().await;
}

#[tokio::test]
async fn test_unknown_host_fails_during_resolution() {
    let engine = local_engine(local_config());
    let mut events = engine.subscribe();
    let request = TransferRequest::new("localhost", "no-such-host", "/backup")
        .with_items(vec![FileItem::new("/srv/data/a.bin", false)])
        .with_client("tests");

    let id = engine.submit(request).unwrap();
    let done = wait_for_complete(&mut events, id).await;

    assert_eq!(done.status, TerminalStatus::Error);
    assert_eq!(done.completed, 0);
    assert_eq!(engine.active_count(), 0);
    engine.shutdown().await;
}
