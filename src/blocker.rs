use crate::error::LivecatError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operations that must not overlap a schema change or each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockerKind {
    ElasticJoin,
    Rejoin,
    CatalogUpdate,
}

impl BlockerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockerKind::ElasticJoin => "elastic_join",
            BlockerKind::Rejoin => "rejoin",
            BlockerKind::CatalogUpdate => "catalog_update",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "elastic_join" => Some(BlockerKind::ElasticJoin),
            "rejoin" => Some(BlockerKind::Rejoin),
            "catalog_update" => Some(BlockerKind::CatalogUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for BlockerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockerToken(Uuid);

impl fmt::Display for BlockerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct BlockerInfo {
    pub token: BlockerToken,
    pub kind: BlockerKind,
    pub owner: String,
    pub acquired_at_micros: u64,
    pub lease: Duration,
    expires_at: Instant,
}

impl BlockerInfo {
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// In-process lease-based exclusion between catalog updates and cluster
/// operations such as elastic join and rejoin. At most one blocker is held at a
/// time; an expired lease counts as released.
pub struct BlockerRegistry {
    held: Mutex<HashMap<BlockerToken, BlockerInfo>>,
    default_lease: Duration,
}

impl BlockerRegistry {
    pub fn new(default_lease: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            default_lease,
        }
    }

    fn purge_expired(held: &mut HashMap<BlockerToken, BlockerInfo>) {
        let now = Instant::now();
        held.retain(|_, info| {
            let live = info.expires_at > now;
            if !live {
                warn!(kind = %info.kind, owner = %info.owner, "blocker lease expired");
            }
            live
        });
    }

    pub fn acquire(&self, kind: BlockerKind, owner: &str) -> Result<BlockerToken, LivecatError> {
        self.acquire_with_lease(kind, owner, self.default_lease)
    }

    pub fn acquire_with_lease(
        &self,
        kind: BlockerKind,
        owner: &str,
        lease: Duration,
    ) -> Result<BlockerToken, LivecatError> {
        let mut held = self.held.lock();
        Self::purge_expired(&mut held);
        if let Some(existing) = held.values().next() {
            return Err(LivecatError::Conflict(format!(
                "cannot start {kind}: blocker '{}' is held by {}",
                existing.kind, existing.owner
            )));
        }
        let token = BlockerToken(Uuid::new_v4());
        let acquired_at_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        held.insert(
            token,
            BlockerInfo {
                token,
                kind,
                owner: owner.to_string(),
                acquired_at_micros,
                lease,
                expires_at: Instant::now() + lease,
            },
        );
        info!(%kind, owner, %token, lease_ms = lease.as_millis() as u64, "blocker acquired");
        Ok(token)
    }

    /// Acquires a blocker released automatically when the guard drops.
    pub fn guard(&self, kind: BlockerKind, owner: &str) -> Result<BlockerGuard<'_>, LivecatError> {
        let token = self.acquire(kind, owner)?;
        Ok(BlockerGuard {
            registry: self,
            token,
        })
    }

    pub fn release(&self, token: BlockerToken) -> bool {
        let removed = self.held.lock().remove(&token);
        match &removed {
            Some(info) => info!(kind = %info.kind, owner = %info.owner, "blocker released"),
            None => debug!(%token, "release of unknown or expired blocker"),
        }
        removed.is_some()
    }

    /// Extends the lease of a live blocker from now.
    pub fn renew(&self, token: BlockerToken) -> bool {
        let mut held = self.held.lock();
        Self::purge_expired(&mut held);
        match held.get_mut(&token) {
            Some(info) => {
                info.expires_at = Instant::now() + info.lease;
                true
            }
            None => false,
        }
    }

    pub fn held(&self, kind: BlockerKind) -> bool {
        let mut held = self.held.lock();
        Self::purge_expired(&mut held);
        held.values().any(|info| info.kind == kind)
    }

    /// Any live blocker, for admission checks.
    pub fn first_held(&self) -> Option<BlockerInfo> {
        let mut held = self.held.lock();
        Self::purge_expired(&mut held);
        held.values().next().cloned()
    }

    pub fn list(&self) -> Vec<BlockerInfo> {
        let mut held = self.held.lock();
        Self::purge_expired(&mut held);
        let mut out: Vec<BlockerInfo> = held.values().cloned().collect();
        out.sort_by_key(|info| info.acquired_at_micros);
        out
    }
}

pub struct BlockerGuard<'a> {
    registry: &'a BlockerRegistry,
    token: BlockerToken,
}

impl BlockerGuard<'_> {
    pub fn token(&self) -> BlockerToken {
        self.token
    }
}

impl Drop for BlockerGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::{BlockerKind, BlockerRegistry};
    use std::time::Duration;

    fn registry() -> BlockerRegistry {
        BlockerRegistry::new(Duration::from_secs(60))
    }

    #[test]
    fn acquire_release_and_held() {
        let reg = registry();
        assert!(!reg.held(BlockerKind::ElasticJoin));
        let token = reg.acquire(BlockerKind::ElasticJoin, "host-2").expect("acquire");
        assert!(reg.held(BlockerKind::ElasticJoin));
        assert!(!reg.held(BlockerKind::Rejoin));
        assert_eq!(reg.first_held().expect("held").owner, "host-2");
        assert!(reg.release(token));
        assert!(!reg.release(token));
        assert!(reg.first_held().is_none());
    }

    #[test]
    fn blockers_are_mutually_exclusive() {
        let reg = registry();
        let _join = reg.acquire(BlockerKind::ElasticJoin, "host-2").expect("join");
        let err = reg
            .acquire(BlockerKind::CatalogUpdate, "coordinator")
            .expect_err("exclusive");
        assert!(err.to_string().contains("elastic_join"));
        assert!(reg.acquire(BlockerKind::Rejoin, "host-3").is_err());
    }

    #[test]
    fn guard_releases_on_drop() {
        let reg = registry();
        {
            let guard = reg.guard(BlockerKind::CatalogUpdate, "coordinator").expect("guard");
            assert!(reg.held(BlockerKind::CatalogUpdate));
            assert_eq!(reg.list()[0].token, guard.token());
        }
        assert!(!reg.held(BlockerKind::CatalogUpdate));
        reg.acquire(BlockerKind::ElasticJoin, "host-2").expect("free again");
    }

    #[test]
    fn expired_lease_counts_as_released() {
        let reg = registry();
        let token = reg
            .acquire_with_lease(BlockerKind::Rejoin, "host-4", Duration::from_millis(5))
            .expect("acquire");
        std::thread::sleep(Duration::from_millis(20));
        assert!(!reg.held(BlockerKind::Rejoin));
        assert!(!reg.renew(token));
        reg.acquire(BlockerKind::ElasticJoin, "host-2").expect("lease expired");
    }

    #[test]
    fn renew_extends_live_lease() {
        let reg = registry();
        let token = reg
            .acquire_with_lease(BlockerKind::ElasticJoin, "host-2", Duration::from_millis(200))
            .expect("acquire");
        assert!(reg.renew(token));
        assert!(reg.held(BlockerKind::ElasticJoin));
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in [
            BlockerKind::ElasticJoin,
            BlockerKind::Rejoin,
            BlockerKind::CatalogUpdate,
        ] {
            assert_eq!(BlockerKind::parse(kind.as_str()), Some(kind));
        }
    }
}
