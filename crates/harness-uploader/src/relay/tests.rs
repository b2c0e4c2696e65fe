use super::*;
use crate::multiplexer::UploadMultiplexer;
use crate::source::PRIORITY_LOW;
use harness_core::testing::{eventually, TestPlatform};
use harness_core::ParameterStore;
use tempfile::TempDir;

struct TestContext {
    test: TestPlatform,
    relay: FileRelay,
    dir: TempDir,
}

async fn create_test_context() -> TestContext {
    let dir = TempDir::new().unwrap();
    let test = TestPlatform::new();
    let relay = FileRelay::new(dir.path(), test.platform.clone()).await;
    TestContext { test, relay, dir }
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_enqueue_accepts_regular_files_only() {
    let ctx = create_test_context().await;
    let file = write(&ctx.dir, "a.log", "hello");

    assert!(ctx.relay.enqueue(&file).await.unwrap());
    assert!(!ctx.relay.enqueue(&file).await.unwrap());

    let missing = ctx.relay.enqueue(ctx.dir.path().join("missing.log")).await;
    assert!(matches!(missing, Err(UploadError::Rejected { .. })));
    let directory = ctx.relay.enqueue(ctx.dir.path()).await;
    assert!(matches!(directory, Err(UploadError::Rejected { .. })));

    assert_eq!(ctx.relay.pending().await, vec![file]);
    let status = ctx.relay.task().status();
    assert_eq!(status.files_available, 1);
    assert_eq!(status.bytes_available, 5);
}

#[tokio::test]
async fn test_pending_list_survives_restart() {
    let ctx = create_test_context().await;
    let first = write(&ctx.dir, "a.log", "one");
    let second = write(&ctx.dir, "b.log", "two");
    ctx.relay.enqueue(&first).await.unwrap();
    ctx.relay.enqueue(&second).await.unwrap();

    let stored = ctx.test.store.load(RELAY_PATHS_KEY).await.unwrap().unwrap();
    let stored: Vec<PathBuf> = serde_json::from_str(&stored).unwrap();
    assert_eq!(stored, vec![first.clone(), second.clone()]);

    let recovered = FileRelay::new(ctx.dir.path(), ctx.test.platform.clone()).await;
    assert_eq!(recovered.pending().await, vec![first, second]);
}

#[tokio::test]
async fn test_corrupt_pending_list_starts_empty() {
    let test = TestPlatform::new();
    test.store.save(RELAY_PATHS_KEY, "not json").await.unwrap();

    let relay = FileRelay::new("/tmp", test.platform.clone()).await;
    assert!(relay.pending().await.is_empty());
}

#[tokio::test]
async fn test_check_prunes_vanished_files() {
    let ctx = create_test_context().await;
    let kept = write(&ctx.dir, "kept.log", "12345678");
    let gone = write(&ctx.dir, "gone.log", "1234");
    ctx.relay.enqueue(&kept).await.unwrap();
    ctx.relay.enqueue(&gone).await.unwrap();
    std::fs::remove_file(&gone).unwrap();

    ctx.relay.start().await;
    ctx.relay.task().wait_idle().await;

    assert_eq!(ctx.relay.pending().await, vec![kept]);
    let status = ctx.relay.task().status();
    assert_eq!(status.files_available, 1);
    assert_eq!(status.bytes_available, 8);

    ctx.relay.stop().await;
}

#[tokio::test]
async fn test_destination_relative_to_root() {
    let ctx = create_test_context().await;
    let nested = write(&ctx.dir, "app/traces/t1.bin", "x");
    let outside_dir = TempDir::new().unwrap();
    let outside = write(&outside_dir, "other.bin", "y");
    ctx.relay.enqueue(&nested).await.unwrap();
    ctx.relay.enqueue(&outside).await.unwrap();

    let first = ctx.relay.next().await.unwrap();
    assert_eq!(first.destination_name, "app/traces/t1.bin");
    assert_eq!(first.owner_namespace, None);
    assert_eq!(first.length, 1);

    let behavior = ctx.relay.task().behavior();
    assert_eq!(behavior.destination_name(&outside), "other.bin");
}

#[tokio::test]
async fn test_next_skips_vanished_files() {
    let ctx = create_test_context().await;
    let gone = write(&ctx.dir, "gone.log", "1");
    let kept = write(&ctx.dir, "kept.log", "2");
    ctx.relay.enqueue(&gone).await.unwrap();
    ctx.relay.enqueue(&kept).await.unwrap();
    std::fs::remove_file(&gone).unwrap();

    let next = ctx.relay.next().await.unwrap();
    assert_eq!(next.source_path, kept);
    assert_eq!(ctx.relay.pending().await, vec![kept]);
}

#[tokio::test]
async fn test_completion_removes_and_announces() {
    let ctx = create_test_context().await;
    let mut events = ctx.test.platform.bus.subscribe();
    let file = write(&ctx.dir, "a.log", "abc");
    ctx.relay.enqueue(&file).await.unwrap();

    let upload = ctx.relay.next().await.unwrap();
    ctx.relay.complete(&upload, false).await;
    assert!(ctx.relay.has_next().await);

    ctx.relay.complete(&upload, true).await;
    assert!(!ctx.relay.has_next().await);
    assert_eq!(ctx.relay.task().status().files_available, 0);

    let event = events.recv().await.unwrap();
    assert_eq!(event, PlatformEvent::UploadCompleted { path: file });

    let stored = ctx.test.store.load(RELAY_PATHS_KEY).await.unwrap().unwrap();
    assert_eq!(stored, "[]");
}

#[tokio::test]
async fn test_relay_drains_through_multiplexer() {
    let ctx = create_test_context().await;
    let first = write(&ctx.dir, "logs/a.log", "first");
    let second = write(&ctx.dir, "logs/b.log", "second");
    ctx.relay.enqueue(&first).await.unwrap();
    ctx.relay.enqueue(&second).await.unwrap();

    let mux = UploadMultiplexer::new(ctx.test.platform.clone());
    assert!(mux.register_source(ctx.relay.as_source(), PRIORITY_LOW));
    ctx.relay.start().await;
    mux.start().await;

    assert!(eventually(|| ctx.test.transport.uploads().len() == 2).await);
    let uploads = ctx.test.transport.uploads();
    assert!(uploads[0].ends_with("/1.0/device-1/file_relay/logs/a.log"));
    assert!(uploads[1].ends_with("/1.0/device-1/file_relay/logs/b.log"));
    assert!(eventually(|| ctx.relay.task().status().files_available == 0).await);
    assert!(ctx.relay.pending().await.is_empty());

    mux.stop().await;
    ctx.relay.stop().await;
}

#[tokio::test]
async fn test_submitted_file_survives_running_relay() {
    let ctx = create_test_context().await;
    let queued = write(&ctx.dir, "queued.log", "one");
    ctx.relay.enqueue(&queued).await.unwrap();
    ctx.relay.start().await;
    ctx.relay.task().wait_idle().await;

    // A second relay over the same store and root, like a one-shot `send`
    let sender = FileRelay::new(ctx.dir.path(), ctx.test.platform.clone()).await;
    let sent = write(&ctx.dir, "sent.log", "two");
    let note = sender.submit(&sent).await.unwrap();
    assert!(note.starts_with(ctx.dir.path().join(INBOX_DIR)));
    assert_eq!(sender.pending().await, vec![queued.clone()]);

    // Any refresh of the running relay rewrites the stored list
    ctx.relay.task().state_document().await.unwrap();
    assert_eq!(ctx.relay.pending().await, vec![queued.clone(), sent.clone()]);
    assert!(!note.exists());
    assert_eq!(ctx.relay.task().status().files_available, 2);

    let recovered = FileRelay::new(ctx.dir.path(), ctx.test.platform.clone()).await;
    assert_eq!(recovered.pending().await, vec![queued, sent]);

    ctx.relay.stop().await;
}

#[tokio::test]
async fn test_submit_keeps_order_and_rejects_missing_files() {
    let ctx = create_test_context().await;
    let first = write(&ctx.dir, "first.log", "1");
    let second = write(&ctx.dir, "second.log", "2");
    FileRelay::submit_to(ctx.dir.path(), &first).await.unwrap();
    FileRelay::submit_to(ctx.dir.path(), &second).await.unwrap();
    FileRelay::submit_to(ctx.dir.path(), &first).await.unwrap();

    let missing = FileRelay::submit_to(ctx.dir.path(), ctx.dir.path().join("missing.log")).await;
    assert!(matches!(missing, Err(UploadError::Rejected { .. })));

    ctx.relay.prepare().await;
    assert_eq!(ctx.relay.pending().await, vec![first, second]);
    let inbox = std::fs::read_dir(ctx.dir.path().join(INBOX_DIR)).unwrap();
    assert_eq!(inbox.count(), 0);
}
