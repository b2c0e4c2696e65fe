use super::*;
use harness_core::testing::TestPlatform;
use mockall::mock;
use serde_json::json;
use std::sync::Mutex as StdMutex;
use tempfile::TempDir;

const PRIMARY: &str = "http://primary.test/manifest";
const FALLBACK: &str = "http://fallback.test/manifest";

struct RecordingReceiver {
    name: String,
    state: Option<Value>,
    updates: StdMutex<Vec<Value>>,
}

impl RecordingReceiver {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Some(json!({ "reporter": name })),
            updates: StdMutex::new(Vec::new()),
        })
    }

    fn silent(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: None,
            updates: StdMutex::new(Vec::new()),
        })
    }

    fn updates(&self) -> Vec<Value> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestReceiver for RecordingReceiver {
    fn receiver_name(&self) -> String {
        self.name.clone()
    }

    async fn get_state(&self) -> harness_core::Result<Option<Value>> {
        Ok(self.state.clone())
    }

    async fn parameters_updated(&self, document: &Value) -> bool {
        self.updates.lock().unwrap().push(document.clone());
        true
    }
}

mock! {
    pub Receiver {}

    #[async_trait]
    impl ManifestReceiver for Receiver {
        fn receiver_name(&self) -> String;
        async fn get_state(&self) -> harness_core::Result<Option<Value>>;
        async fn parameters_updated(&self, document: &Value) -> bool;
    }
}

struct TestContext {
    test: TestPlatform,
    sync: ManifestSynchronizer,
    dir: TempDir,
}

fn settings(dir: &TempDir) -> ManifestSettings {
    ManifestSettings::new(dir.path())
        .with_manifest_url(PRIMARY)
        .with_fallback_url(FALLBACK)
        .with_fallback_threshold(2)
        .with_compression(false)
}

async fn create_test_context() -> TestContext {
    let dir = TempDir::new().unwrap();
    let test = TestPlatform::new();
    let sync = ManifestSynchronizer::new(settings(&dir), test.platform.clone())
        .await
        .unwrap();
    TestContext { test, sync, dir }
}

fn manifest(entries: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({ "manifest": entries })).unwrap()
}

async fn cycle(sync: &ManifestSynchronizer) {
    assert!(sync.task().schedule_check());
    assert!(sync.task().wait_idle().await);
}

async fn start(sync: &ManifestSynchronizer) {
    sync.start().await;
    assert!(sync.task().wait_idle().await);
}

#[tokio::test]
async fn test_first_download_distributes_to_every_receiver() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    let beta = RecordingReceiver::new("beta");
    assert!(ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await);
    assert!(ctx.sync.receive_manifest_updates(beta.clone(), "beta").await);

    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 1 }, "beta": { "level": 2 } })),
    );
    start(&ctx.sync).await;

    assert_eq!(alpha.updates(), vec![json!({ "level": 1 })]);
    assert_eq!(beta.updates(), vec![json!({ "level": 2 })]);
    assert_eq!(
        ctx.test.transport.exchange_urls(),
        vec![format!("{}/1.0/device-1", PRIMARY)]
    );

    let status = ctx.sync.task().status();
    assert_ne!(status.new_manifest, DateTime::<Utc>::default());
    assert_eq!(status.receivers["alpha"].receiver_name, "alpha");
    assert_ne!(status.receivers["alpha"].update_time, DateTime::<Utc>::default());

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_unchanged_manifest_is_not_redistributed() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test
        .transport
        .serve(PRIMARY, manifest(json!({ "alpha": { "level": 1 } })));

    start(&ctx.sync).await;
    cycle(&ctx.sync).await;
    cycle(&ctx.sync).await;

    assert_eq!(alpha.updates().len(), 1);
    assert_eq!(ctx.test.transport.exchanges().len(), 3);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_only_changed_entries_are_handed_over() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    let beta = RecordingReceiver::new("beta");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.sync.receive_manifest_updates(beta.clone(), "beta").await;

    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 1 }, "beta": { "level": 2 } })),
    );
    start(&ctx.sync).await;

    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 5 }, "beta": { "level": 2 } })),
    );
    cycle(&ctx.sync).await;

    assert_eq!(alpha.updates(), vec![json!({ "level": 1 }), json!({ "level": 5 })]);
    assert_eq!(beta.updates().len(), 1);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_compare_nodes_off_forces_every_entry() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 1 }, "other": 1 })),
    );
    start(&ctx.sync).await;

    ctx.sync
        .task()
        .update_parameters(ManifestParameters {
            check_interval_secs: 1800,
            manifest_url: PRIMARY.to_string(),
            compare_files: true,
            compare_nodes: false,
        })
        .await;
    ctx.sync.task().wait_idle().await;
    // Unchanged download, so nothing is distributed yet
    assert_eq!(alpha.updates().len(), 1);

    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 1 }, "other": 2 })),
    );
    cycle(&ctx.sync).await;

    assert_eq!(alpha.updates().len(), 2);
    assert_eq!(alpha.updates()[1], json!({ "level": 1 }));

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_compare_files_off_distributes_from_cache_when_offline() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test
        .transport
        .serve(PRIMARY, manifest(json!({ "alpha": { "level": 1 } })));
    start(&ctx.sync).await;

    ctx.sync
        .task()
        .update_parameters(ManifestParameters {
            check_interval_secs: 1800,
            manifest_url: PRIMARY.to_string(),
            compare_files: false,
            compare_nodes: false,
        })
        .await;
    ctx.sync.task().wait_idle().await;
    assert_eq!(alpha.updates().len(), 2);

    ctx.test.device.set_connected(false);
    let exchanges = ctx.test.transport.exchanges().len();
    cycle(&ctx.sync).await;

    assert_eq!(ctx.test.transport.exchanges().len(), exchanges);
    assert_eq!(alpha.updates().len(), 3);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_offline_skips_exchange_and_distribution() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test
        .transport
        .serve(PRIMARY, manifest(json!({ "alpha": { "level": 1 } })));
    ctx.test.device.set_connected(false);

    start(&ctx.sync).await;

    assert!(ctx.test.transport.exchanges().is_empty());
    assert!(alpha.updates().is_empty());
    assert_eq!(ctx.sync.fallback_count().await, 0);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_missing_entry_is_skipped() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    let gamma = RecordingReceiver::new("gamma");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.sync.receive_manifest_updates(gamma.clone(), "gamma").await;
    ctx.test
        .transport
        .serve(PRIMARY, manifest(json!({ "alpha": { "level": 1 } })));

    start(&ctx.sync).await;

    assert_eq!(alpha.updates().len(), 1);
    assert!(gamma.updates().is_empty());

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_status_document_merges_receiver_states() {
    let ctx = create_test_context().await;
    ctx.sync
        .receive_manifest_updates(RecordingReceiver::new("alpha"), "alpha")
        .await;
    ctx.sync
        .receive_manifest_updates(RecordingReceiver::silent("beta"), "beta")
        .await;
    ctx.test.transport.serve(PRIMARY, manifest(json!({})));

    start(&ctx.sync).await;

    let exchanges = ctx.test.transport.exchanges();
    let body: Value = serde_json::from_slice(exchanges[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["alpha"], json!({ "reporter": "alpha" }));
    assert!(body.get("beta").is_none());
    assert_ne!(
        ctx.sync.task().status().state_collected,
        DateTime::<Utc>::default()
    );

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_stale_status_document_removed_without_receivers() {
    let ctx = create_test_context().await;
    let client = ctx.dir.path().join(crate::cache::CLIENT_FILE);
    std::fs::write(&client, br#"{"old":true}"#).unwrap();
    ctx.test.transport.serve(PRIMARY, manifest(json!({})));

    start(&ctx.sync).await;

    assert!(!client.exists());
    assert!(ctx.test.transport.exchanges()[0].body.is_none());

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_fallback_tried_after_threshold_and_reset_by_primary() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    let body = manifest(json!({ "alpha": { "level": 1 } }));
    ctx.test.transport.fail(PRIMARY);
    ctx.test.transport.serve(FALLBACK, body.clone());

    start(&ctx.sync).await;
    cycle(&ctx.sync).await;
    assert_eq!(ctx.sync.fallback_count().await, 2);
    assert!(alpha.updates().is_empty());
    assert!(ctx
        .test
        .transport
        .exchange_urls()
        .iter()
        .all(|url| url.starts_with(PRIMARY)));

    cycle(&ctx.sync).await;
    let urls = ctx.test.transport.exchange_urls();
    assert_eq!(urls.len(), 4);
    assert!(urls[2].starts_with(PRIMARY));
    assert!(urls[3].starts_with(FALLBACK));
    assert_eq!(ctx.sync.fallback_count().await, 3);
    assert_eq!(alpha.updates().len(), 1);

    ctx.test.transport.serve(PRIMARY, body);
    cycle(&ctx.sync).await;
    assert_eq!(ctx.sync.fallback_count().await, 0);
    assert_eq!(ctx.test.transport.exchange_urls().len(), 5);
    assert_eq!(alpha.updates().len(), 1);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_empty_download_counts_as_failure() {
    let ctx = create_test_context().await;
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test.transport.serve(PRIMARY, Vec::new());

    start(&ctx.sync).await;

    assert_eq!(ctx.sync.fallback_count().await, 1);
    assert!(alpha.updates().is_empty());
    assert!(!ctx.dir.path().join(crate::cache::SERVER_FILE).exists());

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_duplicate_and_unknown_keys() {
    let ctx = create_test_context().await;
    assert!(
        ctx.sync
            .receive_manifest_updates(RecordingReceiver::new("alpha"), "alpha")
            .await
    );
    assert!(
        !ctx.sync
            .receive_manifest_updates(RecordingReceiver::new("other"), "alpha")
            .await
    );
    assert_eq!(ctx.sync.receiver_keys().await, vec!["alpha".to_string()]);

    assert!(!ctx.sync.discard_manifest_updates("missing").await);
    assert!(ctx.sync.discard_manifest_updates("alpha").await);
    assert!(ctx.sync.receiver_keys().await.is_empty());
    assert!(ctx.sync.task().status().receivers.is_empty());
}

#[tokio::test]
async fn test_late_registration_gets_cached_entry() {
    let ctx = create_test_context().await;
    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "alpha": { "level": 1 }, "gamma": { "level": 3 } })),
    );
    let alpha = RecordingReceiver::new("alpha");
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    start(&ctx.sync).await;

    let gamma = RecordingReceiver::new("gamma");
    assert!(ctx.sync.receive_manifest_updates(gamma.clone(), "gamma").await);
    ctx.sync.task().wait_idle().await;

    assert_eq!(gamma.updates(), vec![json!({ "level": 3 })]);
    assert_eq!(alpha.updates().len(), 1);
    assert_eq!(ctx.test.transport.exchanges().len(), 1);

    ctx.sync.stop().await;
}

#[tokio::test]
async fn test_cached_manifest_survives_restart() {
    let dir = TempDir::new().unwrap();
    let body = manifest(json!({ "alpha": { "level": 1 } }));

    let first = TestPlatform::new();
    first.transport.serve(PRIMARY, body.clone());
    let sync = ManifestSynchronizer::new(settings(&dir), first.platform.clone())
        .await
        .unwrap();
    start(&sync).await;
    sync.stop().await;

    let second = TestPlatform::new();
    second.transport.serve(PRIMARY, body);
    let sync = ManifestSynchronizer::new(settings(&dir), second.platform.clone())
        .await
        .unwrap();
    start(&sync).await;

    let status = sync.task().status();
    assert_ne!(status.downloaded_manifest, DateTime::<Utc>::default());
    assert_eq!(status.new_manifest, DateTime::<Utc>::default());

    sync.stop().await;
}

#[tokio::test]
async fn test_synchronizer_configures_itself() {
    let ctx = create_test_context().await;
    ctx.sync
        .receive_manifest_updates(ctx.sync.as_receiver(), MANIFEST_TASK_NAME)
        .await;
    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "manifest": { "check_interval_secs": 600, "manifest_url": PRIMARY } })),
    );

    start(&ctx.sync).await;
    ctx.sync.task().wait_idle().await;

    let parameters = ctx.sync.task().parameters();
    assert_eq!(parameters.check_interval_secs, 600);
    assert!(parameters.compare_files);

    let body: Value =
        serde_json::from_slice(ctx.test.transport.exchanges()[0].body.as_ref().unwrap()).unwrap();
    assert_eq!(body["manifest"]["version_name"], "1.0");

    ctx.sync.stop().await;
    ctx.sync.discard_manifest_updates(MANIFEST_TASK_NAME).await;
}

#[tokio::test]
async fn test_rejected_entry_is_not_fatal() {
    let ctx = create_test_context().await;
    let mut strict = MockReceiver::new();
    strict.expect_receiver_name().return_const("strict".to_string());
    strict.expect_get_state().returning(|| Ok(None));
    strict
        .expect_parameters_updated()
        .withf(|document| document["level"] == 3)
        .times(1)
        .returning(|_| false);
    let alpha = RecordingReceiver::new("alpha");

    ctx.sync.receive_manifest_updates(Arc::new(strict), "strict").await;
    ctx.sync.receive_manifest_updates(alpha.clone(), "alpha").await;
    ctx.test.transport.serve(
        PRIMARY,
        manifest(json!({ "strict": { "level": 3 }, "alpha": { "level": 1 } })),
    );

    start(&ctx.sync).await;
    cycle(&ctx.sync).await;

    assert_eq!(alpha.updates().len(), 1);
    ctx.sync.stop().await;
    ctx.sync.discard_manifest_updates("strict").await;
}
