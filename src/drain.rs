use crate::catalog::Catalog;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone)]
struct Generation {
    catalog: Arc<Catalog>,
    in_flight: Arc<AtomicU64>,
    published_at: Instant,
}

impl Generation {
    fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            in_flight: Arc::new(AtomicU64::new(0)),
            published_at: Instant::now(),
        }
    }

    fn busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }
}

#[derive(Debug)]
struct BarrierState {
    active: Generation,
    /// Replaced generations that still have admitted calls running.
    retired: Vec<Generation>,
}

/// Holds the active catalog pointer and tags every admitted call with the
/// generation it was admitted under. Swapping generations never waits for
/// running calls; they finish against the catalog they hold.
#[derive(Debug)]
pub struct DrainBarrier {
    state: RwLock<BarrierState>,
    drained: Arc<Notify>,
}

/// Pins one generation for the lifetime of a call.
#[derive(Debug)]
pub struct AdmissionTicket {
    catalog: Arc<Catalog>,
    in_flight: Arc<AtomicU64>,
    drained: Arc<Notify>,
}

impl AdmissionTicket {
    pub fn generation(&self) -> u64 {
        self.catalog.generation
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

impl DrainBarrier {
    pub fn new(initial: Catalog) -> Self {
        Self {
            state: RwLock::new(BarrierState {
                active: Generation::new(Arc::new(initial)),
                retired: Vec::new(),
            }),
            drained: Arc::new(Notify::new()),
        }
    }

    pub fn current(&self) -> Arc<Catalog> {
        Arc::clone(&self.state.read().active.catalog)
    }

    pub fn generation(&self) -> u64 {
        self.state.read().active.catalog.generation
    }

    /// Admits a call under the active generation. The counter is bumped under
    /// the same lock that guards the swap, so a call is never counted against a
    /// generation it did not observe.
    pub fn admit(&self) -> AdmissionTicket {
        let state = self.state.read();
        state.active.in_flight.fetch_add(1, Ordering::AcqRel);
        AdmissionTicket {
            catalog: Arc::clone(&state.active.catalog),
            in_flight: Arc::clone(&state.active.in_flight),
            drained: Arc::clone(&self.drained),
        }
    }

    /// Makes `next` the active generation. Returns the replaced generation.
    pub fn publish(&self, next: Arc<Catalog>) -> Arc<Catalog> {
        let mut state = self.state.write();
        let previous = std::mem::replace(&mut state.active, Generation::new(next));
        let replaced = Arc::clone(&previous.catalog);
        if previous.busy() {
            debug!(
                generation = previous.catalog.generation,
                in_flight = previous.in_flight.load(Ordering::Acquire),
                "retiring generation with calls still running"
            );
            state.retired.push(previous);
        }
        state.retired.retain(Generation::busy);
        replaced
    }

    pub fn in_flight(&self, generation: u64) -> u64 {
        let state = self.state.read();
        std::iter::once(&state.active)
            .chain(state.retired.iter())
            .filter(|g| g.catalog.generation == generation)
            .map(|g| g.in_flight.load(Ordering::Acquire))
            .sum()
    }

    /// Generations other than the active one still pinned by running calls.
    pub fn retained_generations(&self) -> Vec<u64> {
        let state = self.state.read();
        state
            .retired
            .iter()
            .filter(|g| g.busy())
            .map(|g| g.catalog.generation)
            .collect()
    }

    /// Memory held by the active generation plus every retired generation
    /// that still has calls running.
    pub fn retained_footprint(&self) -> usize {
        let state = self.state.read();
        state.active.catalog.footprint_bytes()
            + state
                .retired
                .iter()
                .filter(|g| g.busy())
                .map(|g| g.catalog.footprint_bytes())
                .sum::<usize>()
    }

    /// How long the active generation has been live.
    pub fn active_age(&self) -> Duration {
        self.state.read().active.published_at.elapsed()
    }

    /// Waits until no call admitted under a generation older than `generation`
    /// is still running. Returns false on timeout.
    pub async fn wait_drained(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let pending = {
                let state = self.state.read();
                state
                    .retired
                    .iter()
                    .any(|g| g.catalog.generation < generation && g.busy())
            };
            if !pending {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}
