use crate::artifact::Jarfile;
use crate::background::{SettingsBroadcast, SnapshotScheduler};
use crate::blocker::{BlockerKind, BlockerRegistry};
use crate::catalog::Catalog;
use crate::catalog::deployment::{Deployment, SchemaMode};
use crate::catalog::diff::CatalogDiff;
use crate::classes::ClassPattern;
use crate::error::LivecatError;
use crate::session::{Caller, SessionManager};
use crate::stats::ProcedureStats;
use crate::store::{CatalogStore, PendingUpdate};
use crate::validator::UpdateValidator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const UPDATE_IN_PROGRESS: &str =
    "Invalid catalog update. Can't write a new catalog when another one is in progress";

const BLOCKER_OWNER: &str = "catalog-update";

/// What a caller asked to change.
#[derive(Debug, Clone)]
pub enum UpdateRequest {
    /// Whole artifact and/or deployment. `None` keeps the current one.
    Catalog {
        jar: Option<Jarfile>,
        deployment: Option<Deployment>,
    },
    /// Deletes classes matching `delete`, then loads the classes in `jar`.
    Classes {
        jar: Option<Jarfile>,
        delete: Vec<ClassPattern>,
    },
    /// DDL statements applied on top of the current schema.
    Ddl { sql: String },
}

impl UpdateRequest {
    fn label(&self) -> &'static str {
        match self {
            UpdateRequest::Catalog { .. } => "update_application_catalog",
            UpdateRequest::Classes { .. } => "update_classes",
            UpdateRequest::Ddl { .. } => "adhoc_ddl",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub generation: u64,
    pub description: String,
    pub already_applied: bool,
    pub evicted: Vec<u32>,
    pub sessions_invalidated: usize,
    /// False when the previous generation still had calls running after the
    /// configured drain wait.
    pub drained: bool,
}

#[derive(Debug, Default)]
pub struct UpdateMetrics {
    submitted: AtomicU64,
    committed: AtomicU64,
    rejected_admission: AtomicU64,
    rejected_validation: AtomicU64,
    failed_commit: AtomicU64,
    total_commit_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateMetricsSnapshot {
    pub submitted: u64,
    pub committed: u64,
    pub rejected_admission: u64,
    pub rejected_validation: u64,
    pub failed_commit: u64,
    pub avg_commit_micros: u64,
}

impl UpdateMetrics {
    fn record_failure(&self, err: &LivecatError) {
        use crate::error::ErrorClass;
        let counter = match err.class() {
            ErrorClass::Admission => &self.rejected_admission,
            ErrorClass::Validation => &self.rejected_validation,
            ErrorClass::Commit | ErrorClass::Application => &self.failed_commit,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UpdateMetricsSnapshot {
        let committed = self.committed.load(Ordering::Relaxed);
        UpdateMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            committed,
            rejected_admission: self.rejected_admission.load(Ordering::Relaxed),
            rejected_validation: self.rejected_validation.load(Ordering::Relaxed),
            failed_commit: self.failed_commit.load(Ordering::Relaxed),
            avg_commit_micros: self
                .total_commit_micros
                .load(Ordering::Relaxed)
                .checked_div(committed)
                .unwrap_or(0),
        }
    }
}

/// Everything a commit has to touch once it succeeds.
pub struct PostCommit {
    pub stats: Arc<ProcedureStats>,
    pub sessions: Arc<SessionManager>,
    pub snapshots: Arc<SnapshotScheduler>,
    pub settings: Arc<SettingsBroadcast>,
}

/// Serializes catalog updates: admission, compile, diff, validate, commit and
/// the post-commit side effects, in that order.
pub struct UpdateCoordinator {
    store: Arc<CatalogStore>,
    blockers: Arc<BlockerRegistry>,
    validator: UpdateValidator,
    post_commit: PostCommit,
    paused: Arc<AtomicBool>,
    drain_wait: Duration,
    in_progress: tokio::sync::Mutex<()>,
    metrics: UpdateMetrics,
}

impl UpdateCoordinator {
    pub fn new(
        store: Arc<CatalogStore>,
        blockers: Arc<BlockerRegistry>,
        validator: UpdateValidator,
        post_commit: PostCommit,
        paused: Arc<AtomicBool>,
        drain_wait: Duration,
    ) -> Self {
        Self {
            store,
            blockers,
            validator,
            post_commit,
            paused,
            drain_wait,
            in_progress: tokio::sync::Mutex::new(()),
            metrics: UpdateMetrics::default(),
        }
    }

    pub fn metrics(&self) -> UpdateMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn submit(
        &self,
        caller: &Caller,
        request: UpdateRequest,
    ) -> Result<UpdateOutcome, LivecatError> {
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        let label = request.label();
        let result = self.submit_inner(caller, request).await;
        if let Err(err) = &result {
            self.metrics.record_failure(err);
            warn!(
                request = label,
                code = err.code_str(),
                class = %err.class(),
                error = %err,
                "catalog update rejected"
            );
        }
        result
    }

    async fn submit_inner(
        &self,
        caller: &Caller,
        request: UpdateRequest,
    ) -> Result<UpdateOutcome, LivecatError> {
        if !caller.grant.can_run_sysproc() {
            return Err(LivecatError::PermissionDenied(format!(
                "User {} does not have sysproc permission",
                caller.user.as_deref().unwrap_or("anonymous")
            )));
        }
        let serial = self
            .in_progress
            .try_lock()
            .map_err(|_| LivecatError::Conflict(UPDATE_IN_PROGRESS.into()))?;
        self.check_blockers()?;
        if self.paused.load(Ordering::Acquire) && !caller.admin {
            return Err(LivecatError::Paused);
        }

        let current = self.store.current();
        let candidate = build_candidate(&current, request)?;
        let diff = CatalogDiff::compute(&current, &candidate);
        let retained = self.store.retained_footprint();
        let report = self.validator.validate(&candidate, &diff, retained)?;
        let description = diff.description();
        info!(
            from_generation = current.generation,
            statements_planned = report.statements_planned,
            required_bytes = report.required_bytes,
            changes = %description,
            "catalog update admitted"
        );

        let started = Instant::now();
        let blocker = self
            .blockers
            .guard(BlockerKind::CatalogUpdate, BLOCKER_OWNER)
            .map_err(|err| self.blocker_error().unwrap_or(err))?;
        let security_changed = diff.has_security_change();
        let deployment_delta = diff.deployment.clone();
        let receipt = self
            .store
            .propose_and_commit(PendingUpdate {
                expected_generation: current.generation,
                catalog: candidate,
                diff,
            })
            .await?;

        let committed = self.store.current();
        let mut outcome = UpdateOutcome {
            generation: receipt.generation,
            description,
            already_applied: receipt.already_applied,
            evicted: receipt.evicted,
            sessions_invalidated: 0,
            drained: true,
        };
        if receipt.already_applied {
            return Ok(outcome);
        }

        let post = &self.post_commit;
        post.stats.reset(receipt.generation);
        post.settings.apply(&committed.deployment, &deployment_delta);
        post.snapshots
            .set_target(committed.generation, &committed.catalog_hash);
        if let Err(err) = post.snapshots.reconfigure(&committed.deployment.snapshot) {
            warn!(error = %err, "snapshot schedule not reconfigured");
        }
        if security_changed {
            outcome.sessions_invalidated = post.sessions.revalidate(&committed);
        }
        drop(blocker);
        drop(serial);
        if !self.drain_wait.is_zero() {
            outcome.drained = self
                .store
                .wait_drained(receipt.generation, self.drain_wait)
                .await;
        }

        let elapsed = started.elapsed().as_micros() as u64;
        self.metrics.committed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .total_commit_micros
            .fetch_add(elapsed, Ordering::Relaxed);
        info!(
            generation = receipt.generation,
            evicted = ?outcome.evicted,
            sessions_invalidated = outcome.sessions_invalidated,
            commit_micros = elapsed,
            "catalog update committed"
        );
        Ok(outcome)
    }

    fn blocker_error(&self) -> Option<LivecatError> {
        self.blockers
            .first_held()
            .map(|info| LivecatError::RejectedByBlocker {
                blocker: info.kind.as_str().to_string(),
                owner: info.owner,
            })
    }

    fn check_blockers(&self) -> Result<(), LivecatError> {
        match self.blocker_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Compiles the shadow catalog a request describes. The active catalog is
/// only read.
fn build_candidate(current: &Catalog, request: UpdateRequest) -> Result<Catalog, LivecatError> {
    let mode = current.deployment.schema_mode;
    match request {
        UpdateRequest::Catalog { jar, deployment } => {
            let deployment = deployment.unwrap_or_else(|| current.deployment.as_ref().clone());
            match jar {
                Some(_) if mode == SchemaMode::Ddl => Err(LivecatError::SchemaModeMismatch(
                    "Use of @UpdateApplicationCatalog is forbidden while the schema mode is ddl; \
                     use ad hoc DDL or @UpdateClasses instead"
                        .into(),
                )),
                Some(jar) => jar.compile(deployment),
                None => Catalog::compile(&current.canonical_ddl(), current.classes.clone(), deployment),
            }
        }
        UpdateRequest::Classes { jar, delete } => {
            let mut classes = current.classes.clone();
            let removed = classes.remove(&delete);
            if !removed.is_empty() {
                info!(removed = ?removed, "classes deleted");
            }
            if let Some(jar) = jar {
                classes.add(&jar.class_entries())?;
            }
            Catalog::compile(
                &current.canonical_ddl(),
                classes,
                current.deployment.as_ref().clone(),
            )
        }
        UpdateRequest::Ddl { sql } => {
            if mode == SchemaMode::Catalog {
                return Err(LivecatError::SchemaModeMismatch(
                    "Ad hoc DDL is forbidden while the schema mode is catalog; \
                     use @UpdateApplicationCatalog instead"
                        .into(),
                ));
            }
            let script = format!("{}\n{sql}", current.canonical_ddl());
            Catalog::compile(
                &script,
                current.classes.clone(),
                current.deployment.as_ref().clone(),
            )
        }
    }
}
