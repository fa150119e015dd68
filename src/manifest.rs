use crate::error::LivecatError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

const MANIFEST_FORMAT_VERSION: u32 = 1;
const MANIFEST: &str = "manifest.json";
const MANIFEST_PREV: &str = "manifest.json.prev";
const SIGNATURE: &str = "manifest.hmac";
const SIGNATURE_PREV: &str = "manifest.hmac.prev";

/// Durable record of the most recently committed generation. Writing it is
/// the commit point of a catalog update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub format_version: u32,
    pub generation: u64,
    pub catalog_hash: String,
    pub deployment_hash: String,
    pub artifact_file: String,
    pub artifact_sha256: String,
    pub deployment_file: String,
    pub deployment_sha256: String,
    pub committed_at_micros: u64,
}

#[derive(Debug, Clone)]
pub struct CommittedCatalog {
    pub manifest: CatalogManifest,
    pub artifact: Vec<u8>,
    pub deployment: Vec<u8>,
    /// True when the manifest was rebuilt from generation files rather than read.
    pub reconstructed: bool,
}

pub fn artifact_file_name(generation: u64) -> String {
    format!("catalog-{generation:020}.lcj")
}

pub fn deployment_file_name(generation: u64) -> String {
    format!("deployment-{generation:020}.json")
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

fn write_file_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), LivecatError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(name)).map_err(|e| LivecatError::Io(e.error))?;
    Ok(())
}

/// Writes the generation's artifact and deployment files, then swaps the
/// manifest. The previous manifest stays readable as `.prev`.
pub fn write_committed(
    dir: &Path,
    generation: u64,
    catalog_hash: &str,
    deployment_hash: &str,
    artifact: &[u8],
    deployment: &[u8],
    signing_key: Option<&[u8]>,
) -> Result<CatalogManifest, LivecatError> {
    fs::create_dir_all(dir)?;
    let manifest = CatalogManifest {
        format_version: MANIFEST_FORMAT_VERSION,
        generation,
        catalog_hash: catalog_hash.to_string(),
        deployment_hash: deployment_hash.to_string(),
        artifact_file: artifact_file_name(generation),
        artifact_sha256: sha256_hex(artifact),
        deployment_file: deployment_file_name(generation),
        deployment_sha256: sha256_hex(deployment),
        committed_at_micros: now_micros(),
    };
    write_file_atomic(dir, &manifest.artifact_file, artifact)?;
    write_file_atomic(dir, &manifest.deployment_file, deployment)?;

    let primary = dir.join(MANIFEST);
    let previous = if primary.exists() {
        let data = fs::read(&primary)?;
        write_file_atomic(dir, MANIFEST_PREV, &data)?;
        serde_json::from_slice::<CatalogManifest>(&data).ok()
    } else {
        None
    };

    let bytes =
        serde_json::to_vec_pretty(&manifest).map_err(|e| LivecatError::Encode(e.to_string()))?;
    // The signature lands first: until the manifest swap, the old manifest
    // fails verification against it and loading falls back to `.prev`.
    let sig = dir.join(SIGNATURE);
    if let Some(key) = signing_key {
        if sig.exists() {
            let data = fs::read(&sig)?;
            write_file_atomic(dir, SIGNATURE_PREV, &data)?;
        }
        write_file_atomic(dir, SIGNATURE, hmac_hex(key, &bytes)?.as_bytes())?;
    } else {
        let _ = fs::remove_file(&sig);
        let _ = fs::remove_file(dir.join(SIGNATURE_PREV));
    }
    write_file_atomic(dir, MANIFEST, &bytes)?;

    // Committed. Nothing below may fail the write.
    if let Err(err) = fsync_dir(dir) {
        warn!(generation, error = %err, "catalog directory sync failed after commit");
    }
    let keep = [Some(generation), previous.map(|m| m.generation)];
    if let Err(err) = prune_generations(dir, &keep) {
        warn!(generation, error = %err, "old catalog generations not pruned");
    }
    Ok(manifest)
}

/// Loads the committed generation. `Ok(None)` means the directory has never
/// recorded a commit.
pub fn load_committed(
    dir: &Path,
    signing_key: Option<&[u8]>,
    strict_recovery: bool,
) -> Result<Option<CommittedCatalog>, LivecatError> {
    if !dir.exists() {
        return Ok(None);
    }
    let primary_exists = dir.join(MANIFEST).exists();
    let mut last_err = None;
    for (manifest_name, sig_name) in [(MANIFEST, SIGNATURE), (MANIFEST_PREV, SIGNATURE_PREV)] {
        match try_read(dir, manifest_name, sig_name, signing_key) {
            Ok(committed) => {
                if manifest_name == MANIFEST_PREV {
                    warn!(
                        generation = committed.manifest.generation,
                        "primary catalog manifest unusable; resumed from previous"
                    );
                }
                return Ok(Some(committed));
            }
            Err(e) => {
                debug!(file = manifest_name, error = %e, "catalog manifest not usable");
                last_err = Some(e);
            }
        }
    }

    let generations = generation_files(dir)?;
    if !primary_exists && generations.is_empty() {
        return Ok(None);
    }
    if signing_key.is_some() || strict_recovery {
        return Err(match last_err {
            Some(LivecatError::IntegrityError { message }) => LivecatError::IntegrityError {
                message: format!("{message}; manifest reconstruction disabled"),
            },
            _ => LivecatError::IntegrityError {
                message: "catalog manifest unavailable and reconstruction disabled".into(),
            },
        });
    }
    reconstruct(dir, &generations)
}

fn try_read(
    dir: &Path,
    manifest_name: &str,
    sig_name: &str,
    signing_key: Option<&[u8]>,
) -> Result<CommittedCatalog, LivecatError> {
    let bytes = fs::read(dir.join(manifest_name))?;
    if let Some(key) = signing_key {
        verify_hmac(&dir.join(sig_name), key, &bytes)?;
    }
    let manifest: CatalogManifest =
        serde_json::from_slice(&bytes).map_err(|e| LivecatError::Decode(e.to_string()))?;
    if manifest.format_version != MANIFEST_FORMAT_VERSION {
        return Err(LivecatError::Decode(format!(
            "unsupported manifest version {}",
            manifest.format_version
        )));
    }
    let artifact = read_checked(dir, &manifest.artifact_file, &manifest.artifact_sha256)?;
    let deployment = read_checked(dir, &manifest.deployment_file, &manifest.deployment_sha256)?;
    Ok(CommittedCatalog {
        manifest,
        artifact,
        deployment,
        reconstructed: false,
    })
}

fn read_checked(dir: &Path, name: &str, expected_sha256: &str) -> Result<Vec<u8>, LivecatError> {
    let bytes = fs::read(dir.join(name))?;
    if sha256_hex(&bytes) != expected_sha256 {
        return Err(LivecatError::IntegrityError {
            message: format!("{name} does not match its recorded checksum"),
        });
    }
    Ok(bytes)
}

/// Generations that have both an artifact and a deployment file, ascending.
fn generation_files(dir: &Path) -> Result<Vec<u64>, LivecatError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(generation) = parse_generation(&name, "catalog-", ".lcj")
            && dir.join(deployment_file_name(generation)).exists()
        {
            out.push(generation);
        }
    }
    out.sort_unstable();
    Ok(out)
}

fn parse_generation(name: &str, prefix: &str, suffix: &str) -> Option<u64> {
    name.strip_prefix(prefix)?.strip_suffix(suffix)?.parse().ok()
}

fn reconstruct(dir: &Path, generations: &[u64]) -> Result<Option<CommittedCatalog>, LivecatError> {
    let Some(&generation) = generations.last() else {
        return Ok(None);
    };
    warn!(generation, "rebuilding catalog manifest from generation files");
    let artifact = fs::read(dir.join(artifact_file_name(generation)))?;
    let deployment = fs::read(dir.join(deployment_file_name(generation)))?;
    Ok(Some(CommittedCatalog {
        manifest: CatalogManifest {
            format_version: MANIFEST_FORMAT_VERSION,
            generation,
            catalog_hash: String::new(),
            deployment_hash: String::new(),
            artifact_file: artifact_file_name(generation),
            artifact_sha256: sha256_hex(&artifact),
            deployment_file: deployment_file_name(generation),
            deployment_sha256: sha256_hex(&deployment),
            committed_at_micros: 0,
        },
        artifact,
        deployment,
        reconstructed: true,
    }))
}

fn prune_generations(dir: &Path, keep: &[Option<u64>]) -> Result<(), LivecatError> {
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        let generation = parse_generation(&name, "catalog-", ".lcj")
            .or_else(|| parse_generation(&name, "deployment-", ".json"));
        if let Some(generation) = generation
            && !keep.contains(&Some(generation))
        {
            fs::remove_file(dir.join(&name))?;
        }
    }
    Ok(())
}

fn new_mac(key: &[u8]) -> Result<Hmac<Sha256>, LivecatError> {
    Hmac::<Sha256>::new_from_slice(key).map_err(|e| LivecatError::InvalidConfig {
        message: format!("invalid hmac key: {e}"),
    })
}

fn hmac_hex(key: &[u8], bytes: &[u8]) -> Result<String, LivecatError> {
    let mut mac = new_mac(key)?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify_hmac(sig_path: &Path, key: &[u8], bytes: &[u8]) -> Result<(), LivecatError> {
    let integrity = |message: &str| LivecatError::IntegrityError {
        message: message.to_string(),
    };
    let expected = fs::read_to_string(sig_path).map_err(|_| integrity("manifest hmac missing"))?;
    let expected = hex::decode(expected.trim()).map_err(|_| integrity("manifest hmac must be hex"))?;
    let mut mac = new_mac(key)?;
    mac.update(bytes);
    mac.verify_slice(&expected)
        .map_err(|_| integrity("manifest hmac mismatch"))
}

fn fsync_dir(path: &Path) -> Result<(), LivecatError> {
    let dir = fs::File::open(path)?;
    dir.sync_all()?;
    Ok(())
}
