use crate::catalog::Catalog;
use crate::catalog::deployment::Deployment;
use crate::classes::{ClassFile, ClassRegistry, canonical_name_for_entry, class_entry_path};
use crate::error::LivecatError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

const JAR_MAGIC: &[u8; 4] = b"LCJ1";
const JAR_FORMAT_VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

/// Archive entry holding the schema DDL.
pub const DDL_ENTRY: &str = "autogen-ddl.sql";

#[derive(Debug, Serialize, Deserialize)]
struct JarImage {
    format_version: u32,
    entries: BTreeMap<String, Vec<u8>>,
}

/// In-memory catalog archive: DDL plus class files keyed by entry path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jarfile {
    entries: BTreeMap<String, Vec<u8>>,
}

impl Jarfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, path: &str, bytes: Vec<u8>) {
        self.entries.insert(path.to_string(), bytes);
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    pub fn remove(&mut self, path: &str) -> Option<Vec<u8>> {
        self.entries.remove(path)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ddl(&self) -> Result<String, LivecatError> {
        match self.entries.get(DDL_ENTRY) {
            Some(bytes) => String::from_utf8(bytes.clone())
                .map_err(|_| LivecatError::InvalidArtifact(format!("{DDL_ENTRY} is not UTF-8"))),
            None => Ok(String::new()),
        }
    }

    /// Class files keyed by canonical name. Entries that are not class files,
    /// or class files at the archive root, are ignored.
    pub fn class_entries(&self) -> BTreeMap<String, Vec<u8>> {
        self.entries
            .iter()
            .filter_map(|(path, bytes)| canonical_name_for_entry(path).map(|n| (n, bytes.clone())))
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, LivecatError> {
        let image = JarImage {
            format_version: JAR_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let packed = rmp_serde::to_vec(&image).map_err(|e| LivecatError::Encode(e.to_string()))?;
        let compressed = zstd::stream::encode_all(packed.as_slice(), ZSTD_LEVEL)?;
        let mut out = Vec::with_capacity(JAR_MAGIC.len() + compressed.len());
        out.extend_from_slice(JAR_MAGIC);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Decodes an archive, refusing any whose image inflates past
    /// `max_image_bytes`.
    pub fn decode(bytes: &[u8], max_image_bytes: usize) -> Result<Self, LivecatError> {
        let unreadable =
            |reason: String| LivecatError::InvalidArtifact(format!("Unable to read from catalog bytes: {reason}"));
        let body = bytes
            .strip_prefix(JAR_MAGIC)
            .ok_or_else(|| unreadable("not a catalog archive".into()))?;
        let decoder = zstd::stream::Decoder::with_buffer(body).map_err(|e| unreadable(e.to_string()))?;
        let mut packed = Vec::new();
        decoder
            .take(max_image_bytes as u64 + 1)
            .read_to_end(&mut packed)
            .map_err(|e| unreadable(e.to_string()))?;
        if packed.len() > max_image_bytes {
            return Err(unreadable(format!(
                "archive expands beyond the {max_image_bytes} byte catalog limit"
            )));
        }
        let image: JarImage =
            rmp_serde::from_slice(&packed).map_err(|e| unreadable(e.to_string()))?;
        if image.format_version != JAR_FORMAT_VERSION {
            return Err(unreadable(format!(
                "unsupported archive version {}",
                image.format_version
            )));
        }
        Ok(Self {
            entries: image.entries,
        })
    }

    /// Reads an archive from disk. A missing or unreadable file is reported as
    /// a missing catalog.
    pub fn read_path(path: &Path, max_image_bytes: usize) -> Result<Self, LivecatError> {
        let not_found = || LivecatError::CatalogNotFound {
            path: path.display().to_string(),
        };
        let bytes = std::fs::read(path).map_err(|_| not_found())?;
        Self::decode(&bytes, max_image_bytes).map_err(|_| not_found())
    }

    pub fn sha256_hex(&self) -> Result<String, LivecatError> {
        Ok(hex::encode(Sha256::digest(self.encode()?)))
    }

    /// Archive equivalent to a compiled catalog: canonical DDL plus its classes.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut entries = catalog.classes.entries();
        entries.insert(DDL_ENTRY.to_string(), catalog.canonical_ddl().into_bytes());
        Self { entries }
    }

    /// Loads the archive's classes and compiles its DDL against them.
    pub fn compile(&self, deployment: Deployment) -> Result<Catalog, LivecatError> {
        let mut classes = ClassRegistry::new();
        classes.add(&self.class_entries())?;
        Catalog::compile(&self.ddl()?, classes, deployment)
    }
}

/// Assembles catalog archives for tools and tests.
#[derive(Debug, Default)]
pub struct ArtifactBuilder {
    ddl: String,
    jar: Jarfile,
}

impl ArtifactBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ddl(mut self, ddl: &str) -> Self {
        if !self.ddl.is_empty() && !self.ddl.trim_end().ends_with(';') {
            self.ddl.push(';');
        }
        self.ddl.push_str(ddl);
        self.ddl.push('\n');
        self
    }

    pub fn class(mut self, class: &ClassFile) -> Result<Self, LivecatError> {
        self.jar
            .put(&class_entry_path(&class.canonical_name), class.encode()?);
        Ok(self)
    }

    pub fn raw_entry(mut self, path: &str, bytes: Vec<u8>) -> Self {
        self.jar.put(path, bytes);
        self
    }

    pub fn build(mut self) -> Jarfile {
        if !self.ddl.trim().is_empty() {
            self.jar.put(DDL_ENTRY, self.ddl.into_bytes());
        }
        self.jar
    }

    pub fn to_bytes(self) -> Result<Vec<u8>, LivecatError> {
        self.build().encode()
    }
}
