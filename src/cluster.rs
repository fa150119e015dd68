use crate::catalog::Catalog;
use crate::catalog::diff::CatalogDiff;
use crate::catalog::types::Value;
use crate::drain::{AdmissionTicket, DrainBarrier};
use crate::error::LivecatError;
use crate::planner::{PlanNode, PlannedStatement};
use crate::response::ResultTable;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Row counts as seen by the storage engine. Used to refuse schema changes
/// that require empty tables.
pub trait TableStats: Send + Sync {
    fn row_count(&self, table: &str) -> u64;

    /// Called once a generation that dropped `table` is installed.
    fn forget_table(&self, _table: &str) {}
}

/// One admitted call handed to the execution engine.
#[derive(Debug, Clone)]
pub struct ProcedureCall {
    pub procedure: String,
    pub generation: u64,
    pub read_only: bool,
    pub plans: Vec<PlannedStatement>,
    pub params: Vec<Value>,
}

/// Execution engine boundary. Runs on a blocking thread; a failure is
/// reported to the single caller.
pub trait ProcedureHandler: Send + Sync {
    fn execute(&self, call: &ProcedureCall) -> Result<ResultTable, String>;
}

/// Row-count-only storage used by tests, tools and single-process
/// deployments.
#[derive(Debug, Default)]
pub struct InMemoryTables {
    rows: Mutex<HashMap<String, u64>>,
    call_delay_ms: AtomicU64,
}

impl InMemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows(&self, table: &str, rows: u64) {
        self.rows.lock().insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> u64 {
        self.rows.lock().get(table).copied().unwrap_or(0)
    }

    /// Makes every call sleep first, for exercising in-flight behaviour.
    pub fn set_call_delay(&self, delay: Duration) {
        self.call_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    fn apply(&self, plan: &PlannedStatement) -> ResultTable {
        let mut rows = self.rows.lock();
        match &plan.root {
            PlanNode::Insert { table, .. } => {
                *rows.entry(table.clone()).or_insert(0) += 1;
                modified(1)
            }
            PlanNode::Update { table, child } => {
                let count = rows.get(table).copied().unwrap_or(0);
                let touched = if matches!(**child, PlanNode::Filter { .. }) {
                    count.min(1)
                } else {
                    count
                };
                modified(touched)
            }
            PlanNode::Delete { table, child } => {
                let count = rows.entry(table.clone()).or_insert(0);
                let removed = if matches!(**child, PlanNode::Filter { .. }) {
                    (*count).min(1)
                } else {
                    *count
                };
                *count -= removed;
                modified(removed)
            }
            PlanNode::Truncate { table } => {
                let removed = rows.insert(table.clone(), 0).unwrap_or(0);
                modified(removed)
            }
            _ => {
                let mut out = ResultTable::new(&["TABLE_NAME", "ROW_COUNT"]);
                for table in &plan.tables {
                    let count = rows.get(table).copied().unwrap_or(0);
                    out.push_row(vec![Value::from(table.as_str()), Value::Integer(count as i64)]);
                }
                out
            }
        }
    }
}

fn modified(count: u64) -> ResultTable {
    let mut out = ResultTable::new(&["MODIFIED_TUPLES"]);
    out.push_row(vec![Value::Integer(count as i64)]);
    out
}

impl TableStats for InMemoryTables {
    fn row_count(&self, table: &str) -> u64 {
        self.rows(table)
    }

    fn forget_table(&self, table: &str) {
        self.rows.lock().remove(table);
    }
}

impl ProcedureHandler for InMemoryTables {
    fn execute(&self, call: &ProcedureCall) -> Result<ResultTable, String> {
        let delay = self.call_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        let mut last = ResultTable::default();
        for plan in &call.plans {
            if call.read_only && !plan.read_only() {
                return Err(format!(
                    "read-only procedure {} attempted a write",
                    call.procedure
                ));
            }
            last = self.apply(plan);
        }
        Ok(last)
    }
}

/// A catalog generation offered to every member in the prepare phase.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub generation: u64,
    pub catalog: Arc<Catalog>,
    pub diff: Arc<CatalogDiff>,
}

/// One participant in the two-phase catalog install.
pub trait ClusterMember: Send + Sync {
    fn node_id(&self) -> u32;

    fn generation(&self) -> u64;

    /// Validates the proposal locally and stages it. A failure is a "no" vote.
    fn prepare(&self, proposal: &Proposal) -> Result<(), LivecatError>;

    /// Installs the staged generation. Succeeds without effect when the
    /// generation is already installed.
    fn commit(&self, generation: u64) -> Result<(), LivecatError>;

    fn abort(&self, generation: u64);

    /// Removes the member from service after it failed to install a
    /// committed generation.
    fn evict(&self);

    fn is_evicted(&self) -> bool;
}

/// Test-only fault switches for a local node.
#[derive(Debug, Default)]
struct NodeFaults {
    refuse_prepare: AtomicBool,
    prepare_delay_ms: AtomicU64,
    failing_commits: AtomicU32,
}

/// In-process cluster member. Owns its own active catalog pointer and drain
/// accounting, so calls served by this node never observe a generation the
/// node has not installed.
pub struct LocalNode {
    id: u32,
    barrier: DrainBarrier,
    staged: Mutex<Option<Proposal>>,
    evicted: AtomicBool,
    stats: Arc<dyn TableStats>,
    faults: NodeFaults,
}

impl LocalNode {
    pub fn new(id: u32, catalog: Catalog, stats: Arc<dyn TableStats>) -> Self {
        Self {
            id,
            barrier: DrainBarrier::new(catalog),
            staged: Mutex::new(None),
            evicted: AtomicBool::new(false),
            stats,
            faults: NodeFaults::default(),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.id
    }

    pub fn current(&self) -> Arc<Catalog> {
        self.barrier.current()
    }

    /// Generation this node has installed.
    pub fn generation(&self) -> u64 {
        self.barrier.generation()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    pub fn barrier(&self) -> &DrainBarrier {
        &self.barrier
    }

    /// Admits a call under this node's active generation.
    pub fn admit(&self) -> Result<AdmissionTicket, LivecatError> {
        if self.evicted.load(Ordering::Acquire) {
            return Err(LivecatError::NodeEvicted { node_id: self.id });
        }
        Ok(self.barrier.admit())
    }

    /// Brings an evicted node back at the cluster's committed generation.
    pub fn rejoin(&self, catalog: Arc<Catalog>) {
        let generation = catalog.generation;
        self.staged.lock().take();
        self.barrier.publish(catalog);
        self.evicted.store(false, Ordering::Release);
        info!(node_id = self.id, generation, "node rejoined");
    }

    pub fn refuse_prepare(&self, refuse: bool) {
        self.faults.refuse_prepare.store(refuse, Ordering::Relaxed);
    }

    pub fn delay_prepare(&self, delay: Duration) {
        self.faults
            .prepare_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// The next `count` commit attempts on this node fail.
    pub fn fail_commits(&self, count: u32) {
        self.faults.failing_commits.store(count, Ordering::Relaxed);
    }

    fn non_empty_tables(&self, diff: &CatalogDiff) -> Vec<String> {
        diff.tables_that_must_be_empty
            .keys()
            .filter(|table| self.stats.row_count(table) > 0)
            .cloned()
            .collect()
    }
}

impl ClusterMember for LocalNode {
    fn node_id(&self) -> u32 {
        LocalNode::node_id(self)
    }

    fn generation(&self) -> u64 {
        LocalNode::generation(self)
    }

    fn prepare(&self, proposal: &Proposal) -> Result<(), LivecatError> {
        if self.evicted.load(Ordering::Acquire) {
            return Err(LivecatError::NodeEvicted { node_id: self.id });
        }
        let delay = self.faults.prepare_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.faults.refuse_prepare.load(Ordering::Relaxed) {
            return Err(LivecatError::Validation(format!(
                "node {} refused generation {}",
                self.id, proposal.generation
            )));
        }
        let installed = self.barrier.generation();
        if installed + 1 != proposal.generation {
            return Err(LivecatError::Conflict(format!(
                "node {} is at generation {installed}, cannot stage generation {}",
                self.id, proposal.generation
            )));
        }
        let non_empty = self.non_empty_tables(&proposal.diff);
        if !non_empty.is_empty() {
            return Err(LivecatError::TablesMustBeEmpty(
                proposal.diff.must_be_empty_message(&non_empty),
            ));
        }
        *self.staged.lock() = Some(proposal.clone());
        debug!(node_id = self.id, generation = proposal.generation, "prepared");
        Ok(())
    }

    fn commit(&self, generation: u64) -> Result<(), LivecatError> {
        if self.barrier.generation() == generation {
            return Ok(());
        }
        if self.evicted.load(Ordering::Acquire) {
            return Err(LivecatError::NodeEvicted { node_id: self.id });
        }
        let injected = self
            .faults
            .failing_commits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LivecatError::Validation(format!(
                "node {} failed to install generation {generation}",
                self.id
            )));
        }
        let mut staged = self.staged.lock();
        let proposal = match staged.take() {
            Some(p) if p.generation == generation => p,
            other => {
                *staged = other;
                return Err(LivecatError::Conflict(format!(
                    "node {} has no staged proposal for generation {generation}",
                    self.id
                )));
            }
        };
        drop(staged);
        self.barrier.publish(Arc::clone(&proposal.catalog));
        for table in proposal
            .diff
            .tables_dropped
            .iter()
            .chain(&proposal.diff.views_dropped)
        {
            self.stats.forget_table(table);
        }
        debug!(node_id = self.id, generation, "installed");
        Ok(())
    }

    fn abort(&self, generation: u64) {
        let mut staged = self.staged.lock();
        if staged.as_ref().is_some_and(|p| p.generation == generation) {
            staged.take();
            debug!(node_id = self.id, generation, "aborted");
        }
    }

    fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        self.staged.lock().take();
        warn!(node_id = self.id, generation = self.barrier.generation(), "node evicted");
    }

    fn is_evicted(&self) -> bool {
        LocalNode::is_evicted(self)
    }
}
