pub mod artifact;
pub mod background;
pub mod blocker;
pub mod catalog;
pub mod classes;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod drain;
pub mod error;
#[cfg(test)]
mod lib_tests;
pub mod manifest;
pub mod permission;
pub mod planner;
pub mod response;
pub mod session;
pub mod sql;
pub mod stats;
pub mod store;
pub mod sysproc;
pub mod validator;

pub use crate::artifact::{ArtifactBuilder, Jarfile};
pub use crate::blocker::{BlockerInfo, BlockerKind, BlockerRegistry, BlockerToken};
pub use crate::catalog::Catalog;
pub use crate::catalog::deployment::Deployment;
pub use crate::catalog::types::Value;
pub use crate::classes::{ClassFile, StatementDecl};
pub use crate::cluster::{InMemoryTables, LocalNode, ProcedureHandler, TableStats};
pub use crate::config::{LivecatConfig, RecoveryMode};
pub use crate::coordinator::{UpdateMetricsSnapshot, UpdateOutcome, UpdateRequest};
pub use crate::error::{ErrorClass, LivecatError};
pub use crate::response::{CallResult, ClientResponse, ProcedureFailure, ResponseStatus, ResultTable};
pub use crate::session::Session;
pub use crate::stats::ProcedureStatsRow;

use crate::background::{FileSnapshotSink, SettingsBroadcast, SnapshotScheduler, SnapshotSink};
use crate::catalog::ddl::is_ddl;
use crate::catalog::schema::ProcedureSource;
use crate::classes::{ClassRegistry, parse_patterns};
use crate::cluster::{ClusterMember, ProcedureCall};
use crate::config::validate_config;
use crate::coordinator::{PostCommit, UpdateCoordinator};
use crate::drain::AdmissionTicket;
use crate::manifest::load_committed;
use crate::permission::Permission;
use crate::planner::{PlannedStatement, SchemaPlanner, StatementKind, StatementPlanner};
use crate::session::{Caller, SessionManager};
use crate::sql::split_statements;
use crate::stats::ProcedureStats;
use crate::store::CatalogStore;
use crate::sysproc::SysProc;
use crate::validator::UpdateValidator;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Creates a directory with restrictive permissions (0o700 on Unix); the
/// committed catalog carries password hashes.
fn create_private_dir_all(path: &Path) -> Result<(), LivecatError> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;
        use std::os::unix::fs::PermissionsExt;

        DirBuilder::new().recursive(true).mode(0o700).create(path)?;
        let metadata = fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(LivecatError::Validation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }
        let mut perms = metadata.permissions();
        if perms.mode() & 0o777 != 0o700 {
            perms.set_mode(0o700);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Storage boundary used by a live catalog: row counts for schema-change
/// checks plus the execution engine.
pub trait Storage: TableStats + ProcedureHandler {}

impl<T: TableStats + ProcedureHandler> Storage for T {}

/// A catalog artifact and deployment to start from when the directory has
/// never recorded a commit.
#[derive(Debug, Clone, Default)]
pub struct Bootstrap {
    pub artifact: Option<Jarfile>,
    pub deployment: Deployment,
}

/// A cluster's live catalog: the active generation on every in-process
/// member, the update surface that replaces it, and the call surface that
/// runs against it.
pub struct LiveCatalog {
    config: LivecatConfig,
    dir: PathBuf,
    store: Arc<CatalogStore>,
    nodes: Vec<Arc<LocalNode>>,
    coordinator: UpdateCoordinator,
    blockers: Arc<BlockerRegistry>,
    sessions: Arc<SessionManager>,
    stats: Arc<ProcedureStats>,
    settings: Arc<SettingsBroadcast>,
    snapshots: Arc<SnapshotScheduler>,
    planner: Arc<dyn StatementPlanner>,
    storage: Arc<dyn Storage>,
    paused: Arc<AtomicBool>,
}

impl LiveCatalog {
    /// Opens `dir` with in-memory storage, resuming from the last committed
    /// generation or starting from an empty catalog.
    pub fn open(config: LivecatConfig, dir: &Path) -> Result<Self, LivecatError> {
        Self::open_with(config, dir, Bootstrap::default(), Arc::new(InMemoryTables::new()))
    }

    /// Like [`LiveCatalog::open`], but a fresh directory starts from
    /// `bootstrap` instead of an empty catalog.
    pub fn open_with_bootstrap(
        config: LivecatConfig,
        dir: &Path,
        bootstrap: Bootstrap,
    ) -> Result<Self, LivecatError> {
        Self::open_with(config, dir, bootstrap, Arc::new(InMemoryTables::new()))
    }

    pub fn open_with<S: Storage + 'static>(
        config: LivecatConfig,
        dir: &Path,
        bootstrap: Bootstrap,
        storage: Arc<S>,
    ) -> Result<Self, LivecatError> {
        Self::open_with_sink(config, dir, bootstrap, storage, Arc::new(FileSnapshotSink))
    }

    pub fn open_with_sink<S: Storage + 'static>(
        config: LivecatConfig,
        dir: &Path,
        bootstrap: Bootstrap,
        storage: Arc<S>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, LivecatError> {
        validate_config(&config)?;
        info!(
            node_count = config.node_count,
            max_catalog_memory_bytes = config.max_catalog_memory_bytes,
            commit_vote_timeout_ms = config.commit_vote_timeout_ms,
            commit_retry_attempts = config.commit_retry_attempts,
            drain_wait_ms = config.drain_wait_ms,
            default_blocker_lease_ms = config.default_blocker_lease_ms,
            manifest_hmac_enabled = config.manifest_hmac_key.is_some(),
            recovery_mode = ?config.recovery_mode,
            snapshot_sink_enabled = config.snapshot_sink_enabled,
            "livecat config"
        );
        create_private_dir_all(dir)?;

        let committed = load_committed(dir, config.hmac_key(), config.strict_recovery())?;
        let (catalog, last_manifest) = match committed {
            Some(committed) => {
                let deployment = Deployment::parse(&committed.deployment)?;
                let catalog = Jarfile::decode(&committed.artifact, config.max_catalog_memory_bytes)?
                    .compile(deployment)?
                    .with_generation(committed.manifest.generation);
                if committed.reconstructed {
                    // Rewritten below as a fresh manifest for this generation.
                    warn!(
                        generation = catalog.generation,
                        "manifest unreadable; resuming from newest generation files"
                    );
                    (catalog, None)
                } else if catalog.catalog_hash != committed.manifest.catalog_hash
                    || catalog.deployment_hash != committed.manifest.deployment_hash
                {
                    return Err(LivecatError::IntegrityError {
                        message: format!(
                            "catalog generation {} does not match its recorded hashes",
                            committed.manifest.generation
                        ),
                    });
                } else {
                    info!(generation = catalog.generation, "resumed committed catalog");
                    (catalog, Some(committed.manifest))
                }
            }
            None => {
                let catalog = match &bootstrap.artifact {
                    Some(jar) => jar.compile(bootstrap.deployment.clone())?,
                    None => Catalog::compile("", ClassRegistry::new(), bootstrap.deployment.clone())?,
                };
                (catalog, None)
            }
        };

        let stats_source: Arc<dyn TableStats> = storage.clone();
        let nodes: Vec<Arc<LocalNode>> = (0..config.node_count)
            .map(|id| {
                Arc::new(LocalNode::new(
                    id as u32,
                    catalog.clone(),
                    Arc::clone(&stats_source),
                ))
            })
            .collect();
        let members: Vec<Arc<dyn ClusterMember>> = nodes
            .iter()
            .map(|node| Arc::clone(node) as Arc<dyn ClusterMember>)
            .collect();
        let fresh = last_manifest.is_none();
        let store = Arc::new(CatalogStore::new(
            dir,
            config.clone(),
            Arc::new(catalog.clone()),
            nodes.clone(),
            members,
            last_manifest,
        ));
        if fresh {
            let manifest = store.record_bootstrap(&catalog)?;
            info!(
                generation = manifest.generation,
                catalog_hash = %manifest.catalog_hash,
                "catalog manifest recorded"
            );
        }

        let blockers = Arc::new(BlockerRegistry::new(Duration::from_millis(
            config.default_blocker_lease_ms,
        )));
        let sessions = Arc::new(SessionManager::new());
        let stats = Arc::new(ProcedureStats::new(catalog.generation));
        let settings = Arc::new(SettingsBroadcast::new(&catalog.deployment));
        let snapshots = Arc::new(SnapshotScheduler::new(
            sink,
            dir,
            config.snapshot_sink_enabled,
        ));
        snapshots.set_target(catalog.generation, &catalog.catalog_hash);
        snapshots.reconfigure(&catalog.deployment.snapshot)?;
        let planner: Arc<dyn StatementPlanner> = Arc::new(SchemaPlanner);
        let paused = Arc::new(AtomicBool::new(false));
        let coordinator = UpdateCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&blockers),
            UpdateValidator::new(Arc::clone(&planner), config.max_catalog_memory_bytes),
            PostCommit {
                stats: Arc::clone(&stats),
                sessions: Arc::clone(&sessions),
                snapshots: Arc::clone(&snapshots),
                settings: Arc::clone(&settings),
            },
            Arc::clone(&paused),
            Duration::from_millis(config.drain_wait_ms),
        );

        Ok(Self {
            config,
            dir: dir.to_path_buf(),
            store,
            nodes,
            coordinator,
            blockers,
            sessions,
            stats,
            settings,
            snapshots,
            planner,
            storage: storage as Arc<dyn Storage>,
            paused,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &LivecatConfig {
        &self.config
    }

    // ---- sessions -------------------------------------------------------

    pub fn connect(&self, user: Option<&str>, password: Option<&str>) -> Result<Session, LivecatError> {
        self.sessions
            .connect(&self.store.current(), user, password, false)
    }

    /// Session on the administrative port; keeps full access while paused.
    pub fn connect_admin(
        &self,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Session, LivecatError> {
        self.sessions
            .connect(&self.store.current(), user, password, true)
    }

    pub fn disconnect(&self, session: Session) {
        self.sessions.disconnect(session);
    }

    // ---- update surface -------------------------------------------------

    /// Replaces the catalog artifact and/or deployment. `None` keeps the
    /// current one; both `None` is a no-op update.
    pub async fn update_application_catalog(
        &self,
        session: Session,
        catalog: Option<&[u8]>,
        deployment: Option<&[u8]>,
    ) -> Result<UpdateOutcome, LivecatError> {
        let caller = self.sessions.caller(session)?;
        let jar = self.decode_artifact(catalog)?;
        let deployment = deployment.map(Deployment::parse).transpose()?;
        self.coordinator
            .submit(&caller, UpdateRequest::Catalog { jar, deployment })
            .await
    }

    /// Reads the artifact from disk; a missing or unreadable file fails with
    /// "Database catalog not found" before anything else happens.
    pub async fn update_application_catalog_from_path(
        &self,
        session: Session,
        catalog_path: &Path,
        deployment: Option<&[u8]>,
    ) -> Result<UpdateOutcome, LivecatError> {
        let caller = self.sessions.caller(session)?;
        let jar = Jarfile::read_path(catalog_path, self.config.max_catalog_memory_bytes)?;
        let deployment = deployment.map(Deployment::parse).transpose()?;
        self.coordinator
            .submit(
                &caller,
                UpdateRequest::Catalog {
                    jar: Some(jar),
                    deployment,
                },
            )
            .await
    }

    /// Deletes classes matching the comma-separated glob list, then loads the
    /// classes of `jar`.
    pub async fn update_classes(
        &self,
        session: Session,
        jar: Option<&[u8]>,
        delete: Option<&str>,
    ) -> Result<UpdateOutcome, LivecatError> {
        let caller = self.sessions.caller(session)?;
        let jar = self.decode_artifact(jar)?;
        let delete = delete.map(parse_patterns).unwrap_or_default();
        self.coordinator
            .submit(&caller, UpdateRequest::Classes { jar, delete })
            .await
    }

    /// Empty bytes mean "no archive", the same as `None`.
    fn decode_artifact(&self, bytes: Option<&[u8]>) -> Result<Option<Jarfile>, LivecatError> {
        bytes
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| Jarfile::decode(bytes, self.config.max_catalog_memory_bytes))
            .transpose()
    }

    pub fn update_metrics(&self) -> UpdateMetricsSnapshot {
        self.coordinator.metrics()
    }

    // ---- call surface ---------------------------------------------------

    /// Runs a user procedure or, for `@`-prefixed names, a system procedure.
    pub async fn call(&self, session: Session, name: &str, params: Vec<Value>) -> CallResult {
        if name.starts_with('@') {
            return self.call_sysproc(session, name, params).await;
        }
        self.call_procedure(session, name, params).await
    }

    /// Runs a user procedure under the generation active when it is admitted.
    pub async fn call_procedure(
        &self,
        session: Session,
        name: &str,
        params: Vec<Value>,
    ) -> CallResult {
        let started = Instant::now();
        let ticket = self.store.serving_node()?.admit()?;
        let generation = ticket.generation();
        let result = self.run_procedure(session, ticket, name, params).await;
        match &result {
            Ok(_) => self.stats.record(generation, name, started.elapsed(), true),
            Err(
                LivecatError::ProcedureFailed { .. }
                | LivecatError::QueryTimeout { .. }
                | LivecatError::PlanFailure { .. },
            ) => self.stats.record(generation, name, started.elapsed(), false),
            Err(_) => {}
        }
        let table = result?;
        Ok(ClientResponse::success(generation, vec![table]))
    }

    async fn run_procedure(
        &self,
        session: Session,
        ticket: AdmissionTicket,
        name: &str,
        params: Vec<Value>,
    ) -> Result<ResultTable, LivecatError> {
        let caller = self.sessions.caller(session)?;
        let catalog = Arc::clone(ticket.catalog());
        let resolved = catalog
            .resolve_procedure(name)
            .ok_or_else(|| LivecatError::ProcedureNotFound {
                name: name.to_string(),
            })?;
        let def = &resolved.def;
        let permitted = if resolved.is_default {
            caller.grant.has(Permission::DefaultProc) || caller.grant.has(Permission::AllProc)
        } else {
            caller.grant.can_invoke(&def.allowed_roles)
        };
        if !permitted {
            return Err(LivecatError::PermissionDenied(format!(
                "User {} does not have permission to invoke {name}",
                caller.user.as_deref().unwrap_or("anonymous")
            )));
        }
        if !def.read_only && self.is_paused() && !caller.admin {
            return Err(LivecatError::Paused);
        }

        let plans = match &def.source {
            ProcedureSource::Statement { sql } => {
                let plan = self.plan(&catalog, name, "sql", sql)?;
                if plan.param_count != params.len() {
                    return Err(LivecatError::ParameterError(format!(
                        "PROCEDURE {name} EXPECTS {} PARAMS, BUT RECEIVED {}",
                        plan.param_count,
                        params.len()
                    )));
                }
                vec![plan]
            }
            ProcedureSource::Class { class_name } => {
                let class = catalog.classes.get(class_name).ok_or_else(|| {
                    LivecatError::ClassLoad {
                        class_name: class_name.clone(),
                        reason: format!("Cannot load class for procedure: {name}"),
                    }
                })?;
                class
                    .file
                    .statements()
                    .iter()
                    .map(|stmt| self.plan(&catalog, name, &stmt.name, &stmt.sql))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        let call = ProcedureCall {
            procedure: name.to_string(),
            generation: catalog.generation,
            read_only: def.read_only,
            plans,
            params,
        };
        self.execute(ticket, call).await
    }

    fn plan(
        &self,
        catalog: &Catalog,
        procedure: &str,
        statement: &str,
        sql: &str,
    ) -> Result<PlannedStatement, LivecatError> {
        self.planner
            .plan(catalog, sql)
            .map_err(|reason| LivecatError::PlanFailure {
                procedure: procedure.to_string(),
                statement: statement.to_string(),
                reason,
            })
    }

    /// Hands an admitted call to the execution boundary under the admitted
    /// generation's query timeout. The ticket moves with the work, so the
    /// generation stays pinned until the engine returns even if the caller
    /// has already been told it timed out.
    async fn execute(
        &self,
        ticket: AdmissionTicket,
        call: ProcedureCall,
    ) -> Result<ResultTable, LivecatError> {
        let timeout_ms = ticket.catalog().deployment.query_timeout_ms;
        let procedure = call.procedure.clone();
        let storage = Arc::clone(&self.storage);
        let task = tokio::task::spawn_blocking(move || {
            let _ticket = ticket;
            storage.execute(&call)
        });
        let joined = if timeout_ms == 0 {
            task.await
        } else {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(procedure = %procedure, timeout_ms, "call exceeded query timeout");
                    return Err(LivecatError::QueryTimeout {
                        procedure,
                        timeout_ms,
                    });
                }
            }
        };
        match joined {
            Ok(Ok(table)) => Ok(table),
            Ok(Err(reason)) => Err(LivecatError::ProcedureFailed { procedure, reason }),
            Err(join) => Err(LivecatError::ProcedureFailed {
                procedure,
                reason: join.to_string(),
            }),
        }
    }

    async fn call_sysproc(&self, session: Session, name: &str, params: Vec<Value>) -> CallResult {
        let kind = SysProc::parse(name).ok_or_else(|| LivecatError::ProcedureNotFound {
            name: name.to_string(),
        })?;
        let generation = self.catalog_generation();
        let tables = match kind {
            SysProc::UpdateApplicationCatalog => {
                let args = sysproc::parse_update_application_catalog(&params)?;
                let outcome = self
                    .update_application_catalog(
                        session,
                        args.catalog.as_deref(),
                        args.deployment.as_deref(),
                    )
                    .await?;
                return Ok(ClientResponse::success(
                    outcome.generation,
                    vec![ResultTable::status_ok()],
                ));
            }
            SysProc::UpdateClasses => {
                let args = sysproc::parse_update_classes(&params)?;
                let caller = self.sessions.caller(session)?;
                let jar = self.decode_artifact(args.jar.as_deref())?;
                let outcome = self
                    .coordinator
                    .submit(
                        &caller,
                        UpdateRequest::Classes {
                            jar,
                            delete: args.delete,
                        },
                    )
                    .await?;
                return Ok(ClientResponse::success(
                    outcome.generation,
                    vec![ResultTable::status_ok()],
                ));
            }
            SysProc::AdHoc => {
                let sql = sysproc::parse_sql(&params)?;
                return self.adhoc(session, &sql).await;
            }
            SysProc::SystemCatalog => {
                self.sessions.caller(session)?;
                let selector = sysproc::parse_selector(&params)?;
                vec![self.system_catalog(&selector)?]
            }
            SysProc::Statistics => {
                self.sessions.caller(session)?;
                vec![self.stats.to_table()]
            }
            SysProc::Pause | SysProc::Resume => {
                let caller = self.sessions.caller(session)?;
                if !caller.grant.can_run_sysproc() {
                    return Err(sysproc_denied(&caller).into());
                }
                if kind == SysProc::Pause {
                    self.pause();
                } else {
                    self.resume();
                }
                vec![ResultTable::status_ok()]
            }
        };
        Ok(ClientResponse::success(generation, tables))
    }

    /// Ad hoc SQL. A batch made only of DDL becomes a catalog update; any
    /// other batch is planned against the current generation and executed.
    pub async fn adhoc(&self, session: Session, sql: &str) -> CallResult {
        let statements = split_statements(sql);
        if statements.is_empty() {
            return Err(LivecatError::ParameterError("no SQL statement provided".into()).into());
        }
        let ddl_count = statements.iter().filter(|s| is_ddl(s)).count();
        if ddl_count == statements.len() {
            let caller = self.sessions.caller(session)?;
            let outcome = self
                .coordinator
                .submit(
                    &caller,
                    UpdateRequest::Ddl {
                        sql: sql.to_string(),
                    },
                )
                .await?;
            return Ok(ClientResponse::success(
                outcome.generation,
                vec![ResultTable::status_ok()],
            ));
        }
        if ddl_count > 0 {
            return Err(LivecatError::ParameterError(
                "DDL mixed with DML and queries is unsupported".into(),
            )
            .into());
        }

        let mut tables = Vec::with_capacity(statements.len());
        let mut generation = self.catalog_generation();
        for stmt in statements {
            let ticket = self.store.serving_node()?.admit()?;
            generation = ticket.generation();
            let caller = self.sessions.caller(session)?;
            let kind = StatementKind::classify(&stmt);
            let read_only = kind.is_read_only();
            let needed = if read_only {
                Permission::SqlRead
            } else {
                Permission::Sql
            };
            if !caller.grant.has(needed) {
                return Err(LivecatError::PermissionDenied(format!(
                    "User {} does not have {} permission",
                    caller.user.as_deref().unwrap_or("anonymous"),
                    needed.as_str()
                ))
                .into());
            }
            if !read_only && self.is_paused() && !caller.admin {
                return Err(LivecatError::Paused.into());
            }
            let plan = self.plan(ticket.catalog(), "@AdHoc", &stmt, &stmt)?;
            let call = ProcedureCall {
                procedure: "@AdHoc".into(),
                generation,
                read_only,
                plans: vec![plan],
                params: Vec::new(),
            };
            tables.push(self.execute(ticket, call).await?);
        }
        Ok(ClientResponse::success(generation, tables))
    }

    // ---- control --------------------------------------------------------

    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("server paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("server resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    // ---- introspection --------------------------------------------------

    pub fn catalog_generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn current_catalog(&self) -> Arc<Catalog> {
        self.store.current()
    }

    pub fn blockers(&self) -> Vec<BlockerInfo> {
        self.blockers.list()
    }

    /// Registry shared with elastic join and rejoin.
    pub fn blocker_registry(&self) -> &Arc<BlockerRegistry> {
        &self.blockers
    }

    pub fn procedure_statistics(&self) -> Vec<ProcedureStatsRow> {
        self.stats.rows()
    }

    pub fn settings(&self) -> &SettingsBroadcast {
        &self.settings
    }

    pub fn snapshot_scheduler(&self) -> &SnapshotScheduler {
        &self.snapshots
    }

    pub fn node(&self, node_id: u32) -> Option<&Arc<LocalNode>> {
        self.nodes.get(node_id as usize)
    }

    pub fn nodes(&self) -> &[Arc<LocalNode>] {
        &self.nodes
    }

    /// Brings an evicted node back at the committed generation. Holds the
    /// rejoin blocker while doing so, so it cannot overlap an update.
    pub fn rejoin_node(&self, node_id: u32) -> Result<u64, LivecatError> {
        let node = self.node(node_id).ok_or_else(|| {
            LivecatError::Validation(format!("no node with id {node_id}"))
        })?;
        let _guard = self
            .blockers
            .guard(BlockerKind::Rejoin, &format!("node-{node_id}"))?;
        self.store.rejoin(node);
        Ok(node.generation())
    }

    /// `CLASSES`, `PROCEDURES`, `TABLES` or `VIEWS` rows for the active generation.
    pub fn system_catalog(&self, selector: &str) -> Result<ResultTable, LivecatError> {
        let catalog = self.store.current();
        match selector.to_ascii_uppercase().as_str() {
            "CLASSES" => {
                let active = catalog.active_procedure_classes();
                let mut table = ResultTable::new(&["CLASS_NAME", "VOLT_PROCEDURE", "ACTIVE_PROC"]);
                for (name, class) in catalog.classes.iter() {
                    table.push_row(vec![
                        Value::from(name.as_str()),
                        Value::Integer(i64::from(class.file.is_procedure())),
                        Value::Integer(i64::from(active.contains(name))),
                    ]);
                }
                Ok(table)
            }
            "PROCEDURES" => {
                let mut table = ResultTable::new(&[
                    "PROCEDURE_NAME",
                    "PROCEDURE_TYPE",
                    "READ_ONLY",
                    "CLASS_NAME",
                ]);
                for (name, def) in &catalog.procedures {
                    let (kind, class_name) = match &def.source {
                        ProcedureSource::Class { class_name } => ("JAVA", Value::from(class_name.as_str())),
                        ProcedureSource::Statement { .. } => ("SINGLE_STATEMENT", Value::Null),
                    };
                    table.push_row(vec![
                        Value::from(name.as_str()),
                        Value::from(kind),
                        Value::Integer(i64::from(def.read_only)),
                        class_name,
                    ]);
                }
                Ok(table)
            }
            "TABLES" => {
                let mut table =
                    ResultTable::new(&["TABLE_NAME", "COLUMN_COUNT", "PARTITION_COLUMN", "ROW_COUNT"]);
                for (name, schema) in &catalog.tables {
                    table.push_row(vec![
                        Value::from(name.as_str()),
                        Value::Integer(schema.columns.len() as i64),
                        schema
                            .partition_column
                            .as_deref()
                            .map(Value::from)
                            .unwrap_or(Value::Null),
                        Value::Integer(self.storage.row_count(name) as i64),
                    ]);
                }
                Ok(table)
            }
            "VIEWS" => {
                let mut table =
                    ResultTable::new(&["VIEW_NAME", "SOURCE_TABLE", "COLUMN_COUNT", "ROW_COUNT"]);
                for (name, view) in &catalog.views {
                    table.push_row(vec![
                        Value::from(name.as_str()),
                        Value::from(view.source_table.as_str()),
                        Value::Integer(view.schema.columns.len() as i64),
                        Value::Integer(self.storage.row_count(name) as i64),
                    ]);
                }
                Ok(table)
            }
            other => Err(LivecatError::ParameterError(format!(
                "Invalid selector for SystemCatalog: {other}"
            ))),
        }
    }
}

fn sysproc_denied(caller: &Caller) -> LivecatError {
    LivecatError::PermissionDenied(format!(
        "User {} does not have sysproc permission",
        caller.user.as_deref().unwrap_or("anonymous")
    ))
}
