use crate::artifact::Jarfile;
use crate::catalog::Catalog;
use crate::catalog::diff::CatalogDiff;
use crate::cluster::{ClusterMember, LocalNode, Proposal};
use crate::config::LivecatConfig;
use crate::error::LivecatError;
use crate::manifest::{self, CatalogManifest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A validated update waiting to be installed: the compiled catalog, the
/// diff it was computed from, and the generation it was planned against.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub expected_generation: u64,
    pub catalog: Catalog,
    pub diff: CatalogDiff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub generation: u64,
    /// The update had already been installed by an earlier attempt.
    pub already_applied: bool,
    /// Members evicted because they could not install the committed generation.
    pub evicted: Vec<u32>,
}

const STALE_PLAN: &str = "Invalid catalog update: the update was planned against one version of \
the cluster configuration but that version was no longer live when attempting to apply the change. \
This is likely the result of multiple concurrent attempts to change the cluster configuration. \
Please make such changes synchronously from a single connection to the cluster.";

/// Owns the committed catalog and the single commit path that installs the
/// next generation on every member.
pub struct CatalogStore {
    dir: PathBuf,
    config: LivecatConfig,
    committed: parking_lot::RwLock<Arc<Catalog>>,
    serving: Vec<Arc<LocalNode>>,
    members: Vec<Arc<dyn ClusterMember>>,
    last_manifest: parking_lot::Mutex<Option<CatalogManifest>>,
}

impl CatalogStore {
    /// `serving` lists the local nodes that may serve calls, in preference
    /// order; `members` lists every participant in the vote.
    pub fn new(
        dir: &Path,
        config: LivecatConfig,
        committed: Arc<Catalog>,
        serving: Vec<Arc<LocalNode>>,
        members: Vec<Arc<dyn ClusterMember>>,
        last_manifest: Option<CatalogManifest>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            config,
            committed: parking_lot::RwLock::new(committed),
            serving,
            members,
            last_manifest: parking_lot::Mutex::new(last_manifest),
        }
    }

    /// The most recently committed generation, whether or not every member
    /// has installed it yet.
    pub fn current(&self) -> Arc<Catalog> {
        Arc::clone(&self.committed.read())
    }

    pub fn generation(&self) -> u64 {
        self.committed.read().generation
    }

    /// First local node still in service. Calls are admitted through it.
    pub fn serving_node(&self) -> Result<&Arc<LocalNode>, LivecatError> {
        self.serving
            .iter()
            .find(|node| !node.is_evicted())
            .ok_or(LivecatError::NodeEvicted {
                node_id: self.serving.first().map_or(0, |node| node.node_id()),
            })
    }

    /// Memory still held by older generations on the serving node.
    pub fn retained_footprint(&self) -> usize {
        self.serving_node()
            .map_or(0, |node| node.barrier().retained_footprint())
    }

    /// Waits for calls admitted before `generation` to finish on the serving
    /// node. True when they did within `wait`.
    pub async fn wait_drained(&self, generation: u64, wait: Duration) -> bool {
        match self.serving_node() {
            Ok(node) => {
                let drained = node.barrier().wait_drained(generation, wait).await;
                if !drained {
                    warn!(
                        generation,
                        node_id = node.node_id(),
                        retained = ?node.barrier().retained_generations(),
                        "previous generation still draining"
                    );
                }
                drained
            }
            Err(_) => true,
        }
    }

    pub fn members(&self) -> &[Arc<dyn ClusterMember>] {
        &self.members
    }

    pub fn last_manifest(&self) -> Option<CatalogManifest> {
        self.last_manifest.lock().clone()
    }

    /// Records `catalog` durably as its own generation without a vote. Used
    /// once at bootstrap.
    pub fn record_bootstrap(&self, catalog: &Catalog) -> Result<CatalogManifest, LivecatError> {
        self.persist(catalog)
    }

    fn persist(&self, catalog: &Catalog) -> Result<CatalogManifest, LivecatError> {
        let artifact = Jarfile::from_catalog(catalog).encode()?;
        let deployment = catalog.deployment.to_bytes()?;
        let written = manifest::write_committed(
            &self.dir,
            catalog.generation,
            &catalog.catalog_hash,
            &catalog.deployment_hash,
            &artifact,
            &deployment,
            self.config.hmac_key(),
        )?;
        *self.last_manifest.lock() = Some(written.clone());
        Ok(written)
    }

    /// Installs `update` on every member in service as generation
    /// `expected + 1`.
    ///
    /// Prepare fans out to the members in service; any "no" vote or vote
    /// timeout aborts everywhere and leaves the committed generation
    /// unchanged. Once every voter has said yes the new generation is written
    /// to the manifest, which is the commit point. Commit is then retried per
    /// voter and voters that still fail are evicted rather than left serving
    /// the old generation. Evicted members sit out until rejoined.
    pub async fn propose_and_commit(
        &self,
        update: PendingUpdate,
    ) -> Result<CommitReceipt, LivecatError> {
        let current = self.current();
        if current.generation != update.expected_generation {
            if current.generation == update.expected_generation + 1
                && current.same_content(&update.catalog)
            {
                info!(
                    generation = current.generation,
                    "catalog update already applied; treating as retry"
                );
                return Ok(CommitReceipt {
                    generation: current.generation,
                    already_applied: true,
                    evicted: Vec::new(),
                });
            }
            return Err(LivecatError::Conflict(STALE_PLAN.into()));
        }

        let voters: Vec<Arc<dyn ClusterMember>> = self
            .members
            .iter()
            .filter(|member| !member.is_evicted())
            .cloned()
            .collect();
        if voters.is_empty() {
            return Err(LivecatError::CommitVoteFailed {
                node_id: self.members.first().map_or(0, |m| m.node_id()),
                reason: "every member is evicted; rejoin a node first".into(),
            });
        }

        let generation = update.expected_generation + 1;
        let proposal = Proposal {
            generation,
            catalog: Arc::new(update.catalog.with_generation(generation)),
            diff: Arc::new(update.diff),
        };

        let prepared = match self.prepare_all(&voters, &proposal).await {
            Ok(()) => self.persist(&proposal.catalog),
            Err(err) => Err(err),
        };
        if let Err(err) = prepared {
            for member in &voters {
                member.abort(generation);
            }
            return Err(err);
        }
        *self.committed.write() = Arc::clone(&proposal.catalog);
        info!(generation, "catalog generation recorded");

        let evicted = self.commit_all(&voters, generation).await;
        if evicted.len() == voters.len() {
            error!(generation, "no member acknowledged the committed generation");
            return Err(LivecatError::CommitIncomplete { generation });
        }
        Ok(CommitReceipt {
            generation,
            already_applied: false,
            evicted,
        })
    }

    async fn prepare_all(
        &self,
        voters: &[Arc<dyn ClusterMember>],
        proposal: &Proposal,
    ) -> Result<(), LivecatError> {
        let vote_timeout = Duration::from_millis(self.config.commit_vote_timeout_ms);
        let mut votes = Vec::with_capacity(voters.len());
        for member in voters {
            let member = Arc::clone(member);
            let proposal = proposal.clone();
            votes.push((
                member.node_id(),
                tokio::task::spawn_blocking(move || member.prepare(&proposal)),
            ));
        }
        let deadline = tokio::time::Instant::now() + vote_timeout;
        let mut first_failure = None;
        for (node_id, vote) in votes {
            let outcome = match tokio::time::timeout_at(deadline, vote).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(err))) => err,
                Ok(Err(join)) => LivecatError::Validation(format!("prepare task failed: {join}")),
                Err(_) => LivecatError::Validation(format!(
                    "no vote within {} ms",
                    vote_timeout.as_millis()
                )),
            };
            error!(
                node_id,
                generation = proposal.generation,
                error = %outcome,
                "catalog prepare failed"
            );
            if first_failure.is_none() {
                first_failure = Some((node_id, outcome));
            }
        }
        match first_failure {
            None => Ok(()),
            // A table that must be empty is a validation outcome, not a vote failure.
            Some((_, err @ LivecatError::TablesMustBeEmpty(_))) => Err(err),
            Some((node_id, err)) => Err(LivecatError::CommitVoteFailed {
                node_id,
                reason: err.to_string(),
            }),
        }
    }

    async fn commit_all(&self, voters: &[Arc<dyn ClusterMember>], generation: u64) -> Vec<u32> {
        let attempts = self.config.commit_retry_attempts.max(1);
        let mut evicted = Vec::new();
        for member in voters {
            let mut installed = false;
            for attempt in 1..=attempts {
                let task = {
                    let member = Arc::clone(member);
                    tokio::task::spawn_blocking(move || member.commit(generation))
                };
                match task.await {
                    Ok(Ok(())) => {
                        installed = true;
                        break;
                    }
                    Ok(Err(err)) => warn!(
                        node_id = member.node_id(),
                        generation,
                        attempt,
                        error = %err,
                        "catalog install failed"
                    ),
                    Err(join) => warn!(
                        node_id = member.node_id(),
                        generation,
                        attempt,
                        error = %join,
                        "catalog install task failed"
                    ),
                }
            }
            if !installed {
                error!(
                    node_id = member.node_id(),
                    generation, "evicting member that could not install committed catalog"
                );
                member.evict();
                evicted.push(member.node_id());
            }
        }
        evicted
    }

    /// Rejoins an evicted local member at the committed generation.
    pub fn rejoin(&self, node: &LocalNode) {
        node.rejoin(self.current());
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogStore, PendingUpdate};
    use crate::catalog::Catalog;
    use crate::catalog::deployment::Deployment;
    use crate::catalog::diff::CatalogDiff;
    use crate::classes::ClassRegistry;
    use crate::cluster::{ClusterMember, InMemoryTables, LocalNode};
    use crate::config::LivecatConfig;
    use crate::error::LivecatError;
    use crate::manifest::load_committed;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn compile(ddl: &str) -> Catalog {
        Catalog::compile(ddl, ClassRegistry::new(), Deployment::default()).expect("compile")
    }

    fn store(dir: &std::path::Path, nodes: u32) -> (CatalogStore, Vec<Arc<LocalNode>>) {
        let tables = Arc::new(InMemoryTables::new());
        let locals: Vec<Arc<LocalNode>> = (0..nodes)
            .map(|id| Arc::new(LocalNode::new(id, compile(""), tables.clone())))
            .collect();
        let members: Vec<Arc<dyn ClusterMember>> = locals
            .iter()
            .map(|n| Arc::clone(n) as Arc<dyn ClusterMember>)
            .collect();
        let config = LivecatConfig::default().with_node_count(nodes as usize);
        let config = LivecatConfig {
            commit_vote_timeout_ms: 200,
            ..config
        };
        (
            CatalogStore::new(dir, config, Arc::new(compile("")), locals.clone(), members, None),
            locals,
        )
    }

    fn pending(store: &CatalogStore, ddl: &str) -> PendingUpdate {
        let current = store.current();
        let catalog = compile(ddl);
        PendingUpdate {
            expected_generation: current.generation,
            diff: CatalogDiff::compute(&current, &catalog),
            catalog,
        }
    }

    #[tokio::test]
    async fn commit_moves_every_member_and_persists() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 3);
        let receipt = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect("commit");
        assert_eq!(receipt.generation, 1);
        assert!(nodes.iter().all(|n| n.generation() == 1));
        let committed = load_committed(dir.path(), None, true)
            .expect("load")
            .expect("committed");
        assert_eq!(committed.manifest.generation, 1);
        assert_eq!(committed.manifest.catalog_hash, store.current().catalog_hash);
    }

    #[tokio::test]
    async fn stale_expected_generation_conflicts_and_retry_is_idempotent() {
        let dir = tempdir().expect("temp");
        let (store, _) = store(dir.path(), 1);
        let update = pending(&store, "CREATE TABLE T (A INTEGER);");
        store
            .propose_and_commit(update.clone())
            .await
            .expect("first");
        let retry = store.propose_and_commit(update.clone()).await.expect("retry");
        assert!(retry.already_applied);
        assert_eq!(store.generation(), 1);

        let mut stale = pending(&store, "CREATE TABLE U (A INTEGER);");
        stale.expected_generation = 0;
        let err = store.propose_and_commit(stale).await.expect_err("stale");
        assert!(err.to_string().contains("no longer live"));
    }

    #[tokio::test]
    async fn refused_vote_aborts_everywhere() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 3);
        nodes[2].refuse_prepare(true);
        let err = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect_err("refused");
        assert!(matches!(err, LivecatError::CommitVoteFailed { node_id: 2, .. }));
        assert!(
            err.to_string()
                .contains("Catalog verification failed on one or more hosts")
        );
        assert!(nodes.iter().all(|n| n.generation() == 0));
        assert!(load_committed(dir.path(), None, true).expect("load").is_none());
    }

    #[tokio::test]
    async fn slow_vote_times_out() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 2);
        nodes[1].delay_prepare(Duration::from_millis(600));
        let err = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect_err("timeout");
        assert!(err.to_string().contains("no vote within"));
        assert_eq!(nodes[0].generation(), 0);
    }

    #[tokio::test]
    async fn member_failing_every_commit_is_evicted() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 3);
        nodes[1].fail_commits(10);
        let receipt = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect("commit");
        assert_eq!(receipt.evicted, vec![1]);
        assert!(nodes[1].is_evicted());
        assert!(nodes[1].admit().is_err());
        assert_eq!(nodes[0].generation(), 1);
        assert_eq!(nodes[2].generation(), 1);

        nodes[1].fail_commits(0);
        store.rejoin(&nodes[1]);
        assert_eq!(nodes[1].admit().expect("rejoined").generation(), 1);
    }

    #[tokio::test]
    async fn evicting_the_serving_node_moves_service_and_rejoins_at_committed() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 3);
        nodes[0].fail_commits(100);
        let receipt = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect("commit");
        assert_eq!(receipt.evicted, vec![0]);
        assert_eq!(store.generation(), 1);
        let serving = store.serving_node().expect("serving");
        assert_eq!(serving.node_id(), 1);
        assert_eq!(serving.admit().expect("admit").generation(), 1);

        nodes[0].fail_commits(0);
        store.rejoin(&nodes[0]);
        assert_eq!(nodes[0].generation(), 1);
        assert_eq!(store.serving_node().expect("serving").node_id(), 0);

        store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER); CREATE TABLE U (A INTEGER);"))
            .await
            .expect("next update");
        assert!(nodes.iter().all(|n| n.generation() == 2));
    }

    #[tokio::test]
    async fn updates_continue_while_a_member_is_evicted() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 3);
        nodes[1].fail_commits(u32::MAX);
        store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect("first");
        assert!(nodes[1].is_evicted());
        let receipt = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER); CREATE TABLE U (A INTEGER);"))
            .await
            .expect("second update skips the evicted member");
        assert_eq!(receipt.generation, 2);
        assert!(receipt.evicted.is_empty());
        assert_eq!(nodes[0].generation(), 2);
        assert_eq!(nodes[2].generation(), 2);
        assert_eq!(nodes[1].generation(), 0);

        nodes[1].fail_commits(0);
        store.rejoin(&nodes[1]);
        assert_eq!(nodes[1].generation(), 2);
    }

    #[tokio::test]
    async fn commit_needs_a_member_in_service() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 1);
        nodes[0].evict();
        let err = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect_err("no voters");
        assert!(matches!(err, LivecatError::CommitVoteFailed { .. }));
        assert!(store.serving_node().is_err());
        assert_eq!(store.generation(), 0);
    }

    #[tokio::test]
    async fn persist_failure_before_commit_point_aborts_members() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 2);
        std::fs::create_dir(dir.path().join("manifest.json")).expect("block manifest path");
        let err = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect_err("manifest not writable");
        assert!(matches!(err, LivecatError::Io(_)));
        assert_eq!(store.generation(), 0);
        assert!(nodes.iter().all(|n| n.generation() == 0));
        assert!(nodes[1].commit(1).is_err());
    }

    #[tokio::test]
    async fn transient_commit_failure_is_retried() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 2);
        nodes[1].fail_commits(2);
        let receipt = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect("commit");
        assert!(receipt.evicted.is_empty());
        assert_eq!(nodes[1].generation(), 1);
    }

    #[tokio::test]
    async fn no_acknowledgement_is_incomplete_but_recorded() {
        let dir = tempdir().expect("temp");
        let (store, nodes) = store(dir.path(), 1);
        nodes[0].fail_commits(10);
        let err = store
            .propose_and_commit(pending(&store, "CREATE TABLE T (A INTEGER);"))
            .await
            .expect_err("incomplete");
        assert!(matches!(err, LivecatError::CommitIncomplete { generation: 1 }));
        let committed = load_committed(dir.path(), None, true)
            .expect("load")
            .expect("recorded");
        assert_eq!(committed.manifest.generation, 1);
    }
}
