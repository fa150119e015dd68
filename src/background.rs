use crate::catalog::deployment::{Deployment, SnapshotSettings};
use crate::catalog::diff::DeploymentDelta;
use crate::error::LivecatError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SNAPSHOT_SUFFIX: &str = ".snap";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub generation: u64,
    pub catalog_hash: String,
    pub taken_at_micros: u64,
}

/// Snapshot file I/O boundary.
pub trait SnapshotSink: Send + Sync {
    fn write(&self, path: &Path, record: &SnapshotRecord) -> Result<(), LivecatError>;
}

/// Writes a JSON description of the snapshotted generation.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSnapshotSink;

impl SnapshotSink for FileSnapshotSink {
    fn write(&self, path: &Path, record: &SnapshotRecord) -> Result<(), LivecatError> {
        let dir = path
            .parent()
            .ok_or_else(|| LivecatError::Validation(format!("invalid snapshot path {}", path.display())))?;
        fs::create_dir_all(dir)?;
        let bytes = serde_json::to_vec(record).map_err(|e| LivecatError::Encode(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LivecatError::Io(e.error))?;
        Ok(())
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

struct Running {
    settings: SnapshotSettings,
    task: JoinHandle<()>,
}

#[derive(Clone)]
struct SnapshotContext {
    sink: Arc<dyn SnapshotSink>,
    base_dir: PathBuf,
    target: Arc<Mutex<(u64, String)>>,
}

impl SnapshotContext {
    fn directory(&self, settings: &SnapshotSettings) -> PathBuf {
        let path = Path::new(&settings.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn take(&self, settings: &SnapshotSettings) -> Result<PathBuf, LivecatError> {
        let (generation, catalog_hash) = self.target.lock().clone();
        let record = SnapshotRecord {
            generation,
            catalog_hash,
            taken_at_micros: now_micros(),
        };
        let dir = self.directory(settings);
        let path = dir.join(format!(
            "{}-{}-{}{SNAPSHOT_SUFFIX}",
            settings.prefix, record.generation, record.taken_at_micros
        ));
        self.sink.write(&path, &record)?;
        prune(&dir, &settings.prefix, settings.retain as usize)?;
        Ok(path)
    }
}

/// Keeps the newest `retain` snapshot files with `prefix`.
fn prune(dir: &Path, prefix: &str, retain: usize) -> Result<(), LivecatError> {
    if !dir.exists() {
        return Ok(());
    }
    let mut taken: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(micros) = snapshot_micros(&name, prefix) {
            taken.push((micros, entry.path()));
        }
    }
    taken.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in taken.into_iter().skip(retain) {
        debug!(path = %path.display(), "pruning snapshot");
        fs::remove_file(path)?;
    }
    Ok(())
}

/// `{prefix}-{generation}-{micros}.snap` -> micros.
fn snapshot_micros(name: &str, prefix: &str) -> Option<u64> {
    let rest = name
        .strip_prefix(prefix)?
        .strip_prefix('-')?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    let (generation, micros) = rest.split_once('-')?;
    generation.parse::<u64>().ok()?;
    micros.parse().ok()
}

/// Periodic snapshot task driven by the deployment's snapshot settings.
pub struct SnapshotScheduler {
    context: SnapshotContext,
    sink_enabled: bool,
    running: Mutex<Option<Running>>,
}

impl SnapshotScheduler {
    pub fn new(sink: Arc<dyn SnapshotSink>, base_dir: &Path, sink_enabled: bool) -> Self {
        Self {
            context: SnapshotContext {
                sink,
                base_dir: base_dir.to_path_buf(),
                target: Arc::new(Mutex::new((0, String::new()))),
            },
            sink_enabled,
            running: Mutex::new(None),
        }
    }

    /// Generation recorded by snapshots taken from now on.
    pub fn set_target(&self, generation: u64, catalog_hash: &str) {
        *self.context.target.lock() = (generation, catalog_hash.to_string());
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Restarts the task for `settings`. Unchanged settings leave a running
    /// task alone; disabled settings stop it and keep existing files.
    pub fn reconfigure(&self, settings: &SnapshotSettings) -> Result<(), LivecatError> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| r.settings == *settings) {
            return Ok(());
        }
        if let Some(previous) = running.take() {
            previous.task.abort();
            info!(prefix = %previous.settings.prefix, "snapshot schedule stopped");
        }
        if !settings.enabled {
            return Ok(());
        }
        if !self.sink_enabled {
            debug!("snapshot sink disabled; schedule not started");
            return Ok(());
        }
        let period = settings.interval()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            LivecatError::InvalidConfig {
                message: "snapshot scheduling requires a tokio runtime".into(),
            }
        })?;
        let context = self.context.clone();
        let task_settings = settings.clone();
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let context = context.clone();
                let settings = task_settings.clone();
                match tokio::task::spawn_blocking(move || context.take(&settings)).await {
                    Ok(Ok(path)) => debug!(path = %path.display(), "snapshot written"),
                    Ok(Err(e)) => warn!(error = %e, "scheduled snapshot failed"),
                    Err(e) => warn!(error = %e, "scheduled snapshot task failed"),
                }
            }
        });
        info!(
            path = %settings.path,
            prefix = %settings.prefix,
            frequency = %settings.frequency,
            retain = settings.retain,
            "snapshot schedule started"
        );
        *running = Some(Running {
            settings: settings.clone(),
            task,
        });
        Ok(())
    }

    /// Takes one snapshot immediately with `settings`' naming and retention.
    pub fn snapshot_now(&self, settings: &SnapshotSettings) -> Result<PathBuf, LivecatError> {
        self.context.take(settings)
    }

    pub fn directory(&self, settings: &SnapshotSettings) -> PathBuf {
        self.context.directory(settings)
    }

    pub fn stop(&self) {
        if let Some(previous) = self.running.lock().take() {
            previous.task.abort();
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElasticThrottle {
    pub duration: Duration,
    pub throughput_mb: u64,
}

/// Broadcasts enforcement settings to external subscribers; receivers always
/// see the settings of the latest committed generation.
pub struct SettingsBroadcast {
    query_timeout: watch::Sender<Duration>,
    elastic: watch::Sender<ElasticThrottle>,
    heartbeat: watch::Sender<Duration>,
}

impl SettingsBroadcast {
    pub fn new(deployment: &Deployment) -> Self {
        let (query_timeout, _) = watch::channel(Duration::from_millis(deployment.query_timeout_ms));
        let (elastic, _) = watch::channel(throttle(deployment));
        let (heartbeat, _) = watch::channel(Duration::from_secs(deployment.heartbeat_timeout_secs));
        Self {
            query_timeout,
            elastic,
            heartbeat,
        }
    }

    pub fn apply(&self, deployment: &Deployment, delta: &DeploymentDelta) {
        if delta.query_timeout {
            self.query_timeout
                .send_replace(Duration::from_millis(deployment.query_timeout_ms));
            info!(query_timeout_ms = deployment.query_timeout_ms, "query timeout changed");
        }
        if delta.elastic {
            self.elastic.send_replace(throttle(deployment));
            info!(
                duration_ms = deployment.elastic.duration_ms,
                throughput_mb = deployment.elastic.throughput_mb,
                "elastic throttle changed"
            );
        }
        if delta.heartbeat {
            self.heartbeat
                .send_replace(Duration::from_secs(deployment.heartbeat_timeout_secs));
            info!(
                heartbeat_timeout_secs = deployment.heartbeat_timeout_secs,
                "heartbeat timeout changed"
            );
        }
    }

    /// Zero means no timeout.
    pub fn query_timeout(&self) -> Duration {
        *self.query_timeout.borrow()
    }

    pub fn subscribe_query_timeout(&self) -> watch::Receiver<Duration> {
        self.query_timeout.subscribe()
    }

    pub fn subscribe_elastic(&self) -> watch::Receiver<ElasticThrottle> {
        self.elastic.subscribe()
    }

    pub fn subscribe_heartbeat(&self) -> watch::Receiver<Duration> {
        self.heartbeat.subscribe()
    }
}

fn throttle(deployment: &Deployment) -> ElasticThrottle {
    ElasticThrottle {
        duration: Duration::from_millis(deployment.elastic.duration_ms),
        throughput_mb: deployment.elastic.throughput_mb,
    }
}

#[cfg(test)]
mod tests {
    use super::{FileSnapshotSink, SettingsBroadcast, SnapshotScheduler, snapshot_micros};
    use crate::catalog::deployment::{Deployment, SnapshotSettings};
    use crate::catalog::diff::DeploymentDelta;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn settings(prefix: &str, frequency: &str, retain: u32) -> SnapshotSettings {
        SnapshotSettings {
            enabled: true,
            path: "snaps".into(),
            prefix: prefix.into(),
            frequency: frequency.into(),
            retain,
        }
    }

    fn snapshot_names(dir: &std::path::Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|n| n.ends_with(".snap"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn snapshot_names_parse() {
        assert_eq!(snapshot_micros("auto-3-1700.snap", "auto"), Some(1700));
        assert_eq!(snapshot_micros("other-3-1700.snap", "auto"), None);
        assert_eq!(snapshot_micros("auto-x-1700.snap", "auto"), None);
    }

    #[test]
    fn manual_snapshots_are_pruned_to_retain() {
        let dir = tempdir().expect("temp");
        let scheduler = SnapshotScheduler::new(Arc::new(FileSnapshotSink), dir.path(), true);
        scheduler.set_target(4, "abc");
        let s = settings("auto", "1h", 2);
        for _ in 0..4 {
            scheduler.snapshot_now(&s).expect("snapshot");
            std::thread::sleep(Duration::from_millis(2));
        }
        let names = snapshot_names(&dir.path().join("snaps"));
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| n.starts_with("auto-4-")));
    }

    #[tokio::test]
    async fn schedule_writes_and_disabling_keeps_files() {
        let dir = tempdir().expect("temp");
        let scheduler = SnapshotScheduler::new(Arc::new(FileSnapshotSink), dir.path(), true);
        let s = settings("sched", "1s", 5);
        scheduler.reconfigure(&s).expect("start");
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(1_400)).await;
        let written = snapshot_names(&dir.path().join("snaps"));
        assert!(!written.is_empty());

        scheduler
            .reconfigure(&SnapshotSettings {
                enabled: false,
                ..s.clone()
            })
            .expect("stop");
        assert!(!scheduler.is_running());
        assert_eq!(snapshot_names(&dir.path().join("snaps")), written);
    }

    #[tokio::test]
    async fn unchanged_settings_keep_task() {
        let dir = tempdir().expect("temp");
        let scheduler = SnapshotScheduler::new(Arc::new(FileSnapshotSink), dir.path(), false);
        scheduler.reconfigure(&settings("a", "1h", 1)).expect("sink disabled");
        assert!(!scheduler.is_running());

        let scheduler = SnapshotScheduler::new(Arc::new(FileSnapshotSink), dir.path(), true);
        scheduler.reconfigure(&settings("a", "1h", 1)).expect("start");
        scheduler.reconfigure(&settings("a", "1h", 1)).expect("same");
        assert!(scheduler.is_running());
    }

    #[test]
    fn broadcast_sends_only_changed_settings() {
        let mut deployment = Deployment::default();
        let broadcast = SettingsBroadcast::new(&deployment);
        let mut timeout_rx = broadcast.subscribe_query_timeout();
        let mut heartbeat_rx = broadcast.subscribe_heartbeat();
        deployment.query_timeout_ms = 250;
        deployment.heartbeat_timeout_secs = 30;
        broadcast.apply(
            &deployment,
            &DeploymentDelta {
                query_timeout: true,
                ..DeploymentDelta::default()
            },
        );
        assert!(timeout_rx.has_changed().expect("open"));
        assert_eq!(*timeout_rx.borrow_and_update(), Duration::from_millis(250));
        assert!(!heartbeat_rx.has_changed().expect("open"));
        assert_eq!(broadcast.query_timeout(), Duration::from_millis(250));
        assert_eq!(
            broadcast.subscribe_elastic().borrow().throughput_mb,
            2
        );
    }
}
