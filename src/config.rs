use crate::error::LivecatError;
use std::sync::Arc;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// Refuse to open when the committed manifest cannot be verified.
    Strict,
    /// Fall back to the previous manifest, then to bootstrap.
    Permissive,
}

/// Runtime configuration for a live catalog instance.
#[derive(Debug, Clone)]
pub struct LivecatConfig {
    /// Number of in-process cluster members taking part in each two-phase install.
    pub node_count: usize,
    /// Ceiling on the combined in-memory footprint of the new catalog and every
    /// generation still pinned by in-flight calls.
    pub max_catalog_memory_bytes: usize,
    pub commit_vote_timeout_ms: u64,
    pub commit_retry_attempts: u32,
    /// How long a committed update waits for the previous generation to drain
    /// before it reports back. Zero skips the wait.
    pub drain_wait_ms: u64,
    pub default_blocker_lease_ms: u64,
    /// HMAC key for manifest integrity. Wrapped in Arc<Zeroizing<>> so the key is
    /// zeroed when the last reference is dropped.
    pub manifest_hmac_key: Option<Arc<Zeroizing<Vec<u8>>>>,
    pub recovery_mode: RecoveryMode,
    pub snapshot_sink_enabled: bool,
}

impl Default for LivecatConfig {
    fn default() -> Self {
        Self {
            node_count: 1,
            max_catalog_memory_bytes: 256 * 1024 * 1024,
            commit_vote_timeout_ms: 5_000,
            commit_retry_attempts: 3,
            drain_wait_ms: 0,
            default_blocker_lease_ms: 60_000,
            manifest_hmac_key: None,
            recovery_mode: RecoveryMode::Strict,
            snapshot_sink_enabled: true,
        }
    }
}

impl LivecatConfig {
    pub fn production(hmac_key: [u8; 32]) -> Self {
        Self {
            manifest_hmac_key: Some(Arc::new(Zeroizing::new(hmac_key.to_vec()))),
            recovery_mode: RecoveryMode::Strict,
            drain_wait_ms: 2_000,
            ..Self::default()
        }
    }

    pub fn development() -> Self {
        Self {
            manifest_hmac_key: None,
            recovery_mode: RecoveryMode::Permissive,
            commit_vote_timeout_ms: 1_000,
            ..Self::default()
        }
    }

    pub fn strict_recovery(&self) -> bool {
        matches!(self.recovery_mode, RecoveryMode::Strict)
    }

    pub fn hmac_key(&self) -> Option<&[u8]> {
        self.manifest_hmac_key.as_ref().map(|arc| &***arc as &[u8])
    }

    pub fn with_hmac_key(mut self, key: Vec<u8>) -> Self {
        self.manifest_hmac_key = Some(Arc::new(Zeroizing::new(key)));
        self
    }

    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn with_max_catalog_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_catalog_memory_bytes = bytes;
        self
    }
}

pub(crate) fn validate_config(config: &LivecatConfig) -> Result<(), LivecatError> {
    if config.node_count == 0 {
        return Err(LivecatError::InvalidConfig {
            message: "node_count must be at least 1".into(),
        });
    }
    if config.max_catalog_memory_bytes == 0 {
        return Err(LivecatError::InvalidConfig {
            message: "max_catalog_memory_bytes must be non-zero".into(),
        });
    }
    if config.commit_vote_timeout_ms == 0 {
        return Err(LivecatError::InvalidConfig {
            message: "commit_vote_timeout_ms must be non-zero".into(),
        });
    }
    if config.default_blocker_lease_ms == 0 {
        return Err(LivecatError::InvalidConfig {
            message: "default_blocker_lease_ms must be non-zero".into(),
        });
    }
    if let Some(key) = config.hmac_key()
        && key.len() < 16
    {
        return Err(LivecatError::InvalidConfig {
            message: "manifest hmac key must be at least 16 bytes".into(),
        });
    }
    Ok(())
}
