use livecat::background::{SnapshotRecord, SnapshotSink};
use livecat::{
    ArtifactBuilder, Bootstrap, Deployment, InMemoryTables, LiveCatalog, LivecatConfig,
    LivecatError,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

#[derive(Default)]
struct RecordingSink {
    written: Mutex<Vec<(PathBuf, SnapshotRecord)>>,
}

impl SnapshotSink for RecordingSink {
    fn write(&self, path: &Path, record: &SnapshotRecord) -> Result<(), LivecatError> {
        self.written.lock().push((path.to_path_buf(), record.clone()));
        Ok(())
    }
}

fn bootstrap() -> Bootstrap {
    Bootstrap {
        artifact: Some(
            ArtifactBuilder::new()
                .ddl("CREATE TABLE T (A INTEGER NOT NULL, PRIMARY KEY (A));")
                .build(),
        ),
        deployment: Deployment::default(),
    }
}

const SNAPSHOTS_ON: &[u8] =
    br#"{"snapshot":{"enabled":true,"path":"snaps","prefix":"hourly","frequency":"1s","retain":2}}"#;

#[tokio::test]
async fn snapshot_schedule_follows_the_committed_deployment() {
    let dir = tempdir().expect("temp");
    let live = LiveCatalog::open_with_bootstrap(LivecatConfig::default(), dir.path(), bootstrap())
        .expect("open");
    let admin = live.connect_admin(None, None).expect("admin");
    assert!(!live.snapshot_scheduler().is_running());

    let outcome = live
        .update_application_catalog(admin, None, Some(SNAPSHOTS_ON))
        .await
        .expect("enable");
    assert!(outcome.description.contains("DEPLOYMENT snapshot schedule changed"));
    assert!(live.snapshot_scheduler().is_running());

    tokio::time::sleep(Duration::from_millis(1_400)).await;
    let settings = live.current_catalog().deployment.snapshot.clone();
    let snap_dir = live.snapshot_scheduler().directory(&settings);
    assert_eq!(snap_dir, dir.path().join("snaps"));
    let files: Vec<String> = std::fs::read_dir(&snap_dir)
        .expect("snapshot dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    assert!(!files.is_empty());
    assert!(files.iter().all(|f| f.starts_with("hourly-1-") && f.ends_with(".snap")));

    live.update_application_catalog(admin, None, Some(b"{}"))
        .await
        .expect("disable");
    assert!(!live.snapshot_scheduler().is_running());
    assert!(snap_dir.exists());
}

#[tokio::test]
async fn snapshots_record_the_generation_they_were_taken_under() {
    let dir = tempdir().expect("temp");
    let sink = Arc::new(RecordingSink::default());
    let live = LiveCatalog::open_with_sink(
        LivecatConfig::default(),
        dir.path(),
        bootstrap(),
        Arc::new(InMemoryTables::new()),
        Arc::clone(&sink) as Arc<dyn SnapshotSink>,
    )
    .expect("open");
    let admin = live.connect_admin(None, None).expect("admin");
    live.update_application_catalog(admin, None, Some(SNAPSHOTS_ON))
        .await
        .expect("enable");

    let settings = live.current_catalog().deployment.snapshot.clone();
    let path = live
        .snapshot_scheduler()
        .snapshot_now(&settings)
        .expect("manual snapshot");
    assert!(path.starts_with(dir.path().join("snaps")));
    let written = sink.written.lock().clone();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].1.generation, 1);
    assert_eq!(written[0].1.catalog_hash, live.current_catalog().catalog_hash);
}

#[tokio::test]
async fn disabled_sink_never_starts_a_schedule() {
    let dir = tempdir().expect("temp");
    let config = LivecatConfig {
        snapshot_sink_enabled: false,
        ..LivecatConfig::default()
    };
    let live = LiveCatalog::open_with_bootstrap(config, dir.path(), bootstrap()).expect("open");
    let admin = live.connect_admin(None, None).expect("admin");
    live.update_application_catalog(admin, None, Some(SNAPSHOTS_ON))
        .await
        .expect("enable");
    assert!(!live.snapshot_scheduler().is_running());
}

#[tokio::test]
async fn invalid_snapshot_frequency_is_refused_at_parse() {
    let dir = tempdir().expect("temp");
    let live = LiveCatalog::open_with_bootstrap(LivecatConfig::default(), dir.path(), bootstrap())
        .expect("open");
    let admin = live.connect_admin(None, None).expect("admin");
    let err = live
        .update_application_catalog(
            admin,
            None,
            Some(br#"{"snapshot":{"enabled":true,"frequency":"often"}}"#),
        )
        .await
        .expect_err("bad frequency");
    assert!(err.to_string().contains("invalid snapshot frequency"));
    assert_eq!(live.catalog_generation(), 0);
}

#[tokio::test]
async fn runtime_settings_are_broadcast_on_commit() {
    let dir = tempdir().expect("temp");
    let live = LiveCatalog::open_with_bootstrap(LivecatConfig::default(), dir.path(), bootstrap())
        .expect("open");
    let admin = live.connect_admin(None, None).expect("admin");
    let mut timeout = live.settings().subscribe_query_timeout();
    let mut elastic = live.settings().subscribe_elastic();
    let heartbeat = live.settings().subscribe_heartbeat();
    assert_eq!(*timeout.borrow(), Duration::ZERO);

    live.update_application_catalog(
        admin,
        None,
        Some(br#"{"query_timeout_ms":250,"elastic":{"duration_ms":75,"throughput_mb":4}}"#),
    )
    .await
    .expect("update");

    assert!(timeout.has_changed().expect("sender alive"));
    assert_eq!(*timeout.borrow_and_update(), Duration::from_millis(250));
    assert!(elastic.has_changed().expect("sender alive"));
    let throttle = *elastic.borrow_and_update();
    assert_eq!(throttle.duration, Duration::from_millis(75));
    assert_eq!(throttle.throughput_mb, 4);
    assert!(!heartbeat.has_changed().expect("sender alive"));
}
