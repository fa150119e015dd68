use crate::catalog::types::Value;
use crate::response::ResultTable;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
struct ProcedureCounters {
    invocations: AtomicU64,
    failures: AtomicU64,
    total_latency_micros: AtomicU64,
    min_latency_micros: AtomicU64,
    max_latency_micros: AtomicU64,
}

impl Default for ProcedureCounters {
    fn default() -> Self {
        Self {
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_micros: AtomicU64::new(0),
            min_latency_micros: AtomicU64::new(u64::MAX),
            max_latency_micros: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Default)]
struct GenerationStats {
    generation: u64,
    procedures: Mutex<HashMap<String, Arc<ProcedureCounters>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureStatsRow {
    pub procedure: String,
    pub invocations: u64,
    pub failures: u64,
    pub min_latency_micros: u64,
    pub avg_latency_micros: u64,
    pub max_latency_micros: u64,
}

/// Invocation statistics owned by the active generation. A commit replaces
/// the whole set; results from calls admitted under an older generation are
/// dropped rather than migrated.
#[derive(Debug, Default)]
pub struct ProcedureStats {
    current: RwLock<Arc<GenerationStats>>,
}

impl ProcedureStats {
    pub fn new(generation: u64) -> Self {
        Self {
            current: RwLock::new(Arc::new(GenerationStats {
                generation,
                procedures: Mutex::new(HashMap::new()),
            })),
        }
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Starts a fresh set for `generation`. A set already started for it by
    /// an early call is kept; older generations never replace newer ones.
    pub fn reset(&self, generation: u64) {
        self.advance(generation);
    }

    fn advance(&self, generation: u64) -> Arc<GenerationStats> {
        let mut current = self.current.write();
        if current.generation < generation {
            *current = Arc::new(GenerationStats {
                generation,
                procedures: Mutex::new(HashMap::new()),
            });
        }
        Arc::clone(&current)
    }

    pub fn record(&self, generation: u64, procedure: &str, latency: Duration, succeeded: bool) {
        let mut stats = self.current.read().clone();
        if stats.generation < generation {
            // Admitted under a generation installed before the reset ran.
            stats = self.advance(generation);
        }
        if stats.generation != generation {
            return;
        }
        let counters = Arc::clone(
            stats
                .procedures
                .lock()
                .entry(procedure.to_string())
                .or_default(),
        );
        let micros = latency.as_micros() as u64;
        counters.invocations.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .total_latency_micros
            .fetch_add(micros, Ordering::Relaxed);
        counters.min_latency_micros.fetch_min(micros, Ordering::Relaxed);
        counters.max_latency_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn rows(&self) -> Vec<ProcedureStatsRow> {
        let stats = self.current.read().clone();
        let procedures = stats.procedures.lock();
        let mut out: Vec<ProcedureStatsRow> = procedures
            .iter()
            .map(|(name, c)| {
                let invocations = c.invocations.load(Ordering::Relaxed);
                let total = c.total_latency_micros.load(Ordering::Relaxed);
                ProcedureStatsRow {
                    procedure: name.clone(),
                    invocations,
                    failures: c.failures.load(Ordering::Relaxed),
                    min_latency_micros: match c.min_latency_micros.load(Ordering::Relaxed) {
                        u64::MAX => 0,
                        v => v,
                    },
                    avg_latency_micros: total.checked_div(invocations).unwrap_or(0),
                    max_latency_micros: c.max_latency_micros.load(Ordering::Relaxed),
                }
            })
            .collect();
        out.sort_by(|a, b| a.procedure.cmp(&b.procedure));
        out
    }

    pub fn to_table(&self) -> ResultTable {
        let mut table = ResultTable::new(&[
            "PROCEDURE",
            "INVOCATIONS",
            "FAILURES",
            "MIN_EXECUTION_TIME",
            "AVG_EXECUTION_TIME",
            "MAX_EXECUTION_TIME",
        ]);
        for row in self.rows() {
            table.push_row(vec![
                Value::from(row.procedure),
                Value::Integer(row.invocations as i64),
                Value::Integer(row.failures as i64),
                Value::Integer(row.min_latency_micros as i64),
                Value::Integer(row.avg_latency_micros as i64),
                Value::Integer(row.max_latency_micros as i64),
            ]);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::ProcedureStats;
    use std::time::Duration;

    #[test]
    fn records_min_avg_max() {
        let stats = ProcedureStats::new(0);
        stats.record(0, "SelectAll", Duration::from_micros(10), true);
        stats.record(0, "SelectAll", Duration::from_micros(30), false);
        let rows = stats.rows();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.invocations, 2);
        assert_eq!(row.failures, 1);
        assert_eq!(row.min_latency_micros, 10);
        assert_eq!(row.avg_latency_micros, 20);
        assert_eq!(row.max_latency_micros, 30);
    }

    #[test]
    fn reset_discards_and_ignores_stale_generation() {
        let stats = ProcedureStats::new(0);
        stats.record(0, "InsertNewOrder", Duration::from_micros(5), true);
        stats.reset(1);
        assert!(stats.rows().is_empty());
        stats.record(0, "InsertNewOrder", Duration::from_micros(5), true);
        assert!(stats.rows().is_empty());
        stats.record(1, "InsertNewOrder", Duration::from_micros(5), true);
        assert_eq!(stats.to_table().row_count(), 1);
    }

    #[test]
    fn call_on_new_generation_before_reset_is_kept() {
        let stats = ProcedureStats::new(0);
        stats.record(0, "Delivery", Duration::from_micros(5), true);
        stats.record(1, "Delivery", Duration::from_micros(7), true);
        assert_eq!(stats.generation(), 1);
        stats.reset(1);
        let rows = stats.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invocations, 1);
        assert_eq!(rows[0].max_latency_micros, 7);
        stats.reset(0);
        assert_eq!(stats.generation(), 1);
    }
}
