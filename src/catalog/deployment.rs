use crate::error::LivecatError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Schema changes arrive as whole catalog artifacts.
    #[default]
    Catalog,
    /// Schema changes arrive as ad hoc DDL.
    Ddl,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ElasticSettings {
    /// Target duration of one rebalance transaction.
    pub duration_ms: u64,
    /// Rebalance throughput ceiling in MB/s.
    pub throughput_mb: u64,
}

impl Default for ElasticSettings {
    fn default() -> Self {
        Self {
            duration_ms: 50,
            throughput_mb: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotSettings {
    pub enabled: bool,
    pub path: String,
    pub prefix: String,
    /// `<n>s`, `<n>m` or `<n>h`.
    pub frequency: String,
    pub retain: u32,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "snapshots".into(),
            prefix: "auto".into(),
            frequency: "24h".into(),
            retain: 2,
        }
    }
}

impl SnapshotSettings {
    pub fn interval(&self) -> Result<Duration, LivecatError> {
        parse_frequency(&self.frequency)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterSettings {
    pub sites_per_host: u32,
    pub kfactor: u32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            sites_per_host: 8,
            kfactor: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SecuritySettings {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserDef {
    pub name: String,
    /// Plaintext as supplied by the operator; replaced by `password_hash` on parse.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl UserDef {
    pub fn verify_password(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(expected) => *expected == hash_password(password),
            None => false,
        }
    }
}

/// Operator settings that travel with the catalog and change atomically with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Deployment {
    pub schema_mode: SchemaMode,
    /// Fixed when the cluster starts; not changeable by a live update.
    pub cluster: ClusterSettings,
    /// Zero disables the per-call timeout.
    pub query_timeout_ms: u64,
    pub heartbeat_timeout_secs: u64,
    pub elastic: ElasticSettings,
    pub snapshot: SnapshotSettings,
    pub security: SecuritySettings,
    pub users: Vec<UserDef>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            schema_mode: SchemaMode::Catalog,
            cluster: ClusterSettings::default(),
            query_timeout_ms: 0,
            heartbeat_timeout_secs: 90,
            elastic: ElasticSettings::default(),
            snapshot: SnapshotSettings::default(),
            security: SecuritySettings::default(),
            users: Vec::new(),
        }
    }
}

impl Deployment {
    /// Decodes a JSON deployment document, hashing any plaintext passwords.
    pub fn parse(bytes: &[u8]) -> Result<Self, LivecatError> {
        let mut deployment: Deployment =
            serde_json::from_slice(bytes).map_err(|e| LivecatError::Deployment(e.to_string()))?;
        deployment.normalize()?;
        Ok(deployment)
    }

    fn normalize(&mut self) -> Result<(), LivecatError> {
        let mut seen = BTreeSet::new();
        for user in &mut self.users {
            if user.name.trim().is_empty() {
                return Err(LivecatError::Deployment("user name must not be empty".into()));
            }
            if !seen.insert(user.name.clone()) {
                return Err(LivecatError::Deployment(format!(
                    "user '{}' is defined more than once",
                    user.name
                )));
            }
            if let Some(plain) = user.password.take() {
                user.password_hash = Some(hash_password(&plain));
            }
            if user.password_hash.is_none() {
                return Err(LivecatError::Deployment(format!(
                    "user '{}' has no password",
                    user.name
                )));
            }
            user.roles = user
                .roles
                .iter()
                .map(|r| r.trim().to_ascii_uppercase())
                .collect();
        }
        if self.snapshot.enabled {
            self.snapshot.interval()?;
            if self.snapshot.retain == 0 {
                return Err(LivecatError::Deployment(
                    "snapshot retain must be at least 1".into(),
                ));
            }
            if self.snapshot.prefix.is_empty() || self.snapshot.prefix.contains('/') {
                return Err(LivecatError::Deployment(format!(
                    "invalid snapshot prefix '{}'",
                    self.snapshot.prefix
                )));
            }
        }
        if self.cluster.sites_per_host == 0 {
            return Err(LivecatError::Deployment(
                "sitesperhost must be at least 1".into(),
            ));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(LivecatError::Deployment(
                "heartbeat timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    /// Canonical encoding used for hashing and persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LivecatError> {
        serde_json::to_vec(self).map_err(|e| LivecatError::Encode(e.to_string()))
    }

    pub fn user(&self, name: &str) -> Option<&UserDef> {
        self.users.iter().find(|u| u.name == name)
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

pub fn parse_frequency(raw: &str) -> Result<Duration, LivecatError> {
    let raw = raw.trim();
    let invalid = || LivecatError::Deployment(format!("invalid snapshot frequency '{raw}'"));
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid());
    }
    let secs = match unit {
        "s" => amount,
        "m" => amount.checked_mul(60).ok_or_else(invalid)?,
        "h" => amount.checked_mul(3_600).ok_or_else(invalid)?,
        _ => return Err(invalid()),
    };
    Ok(Duration::from_secs(secs))
}
