pub mod matcher;

use crate::error::LivecatError;
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use matcher::{ClassPattern, parse_patterns};

/// Magic prefix of an encoded class descriptor.
const CLASS_MAGIC: &[u8; 4] = b"LCC1";

/// One SQL statement a procedure class declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatementDecl {
    pub name: String,
    pub sql: String,
    /// Statements built at call time cannot be planned when the class loads.
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClassKind {
    Procedure { statements: Vec<StatementDecl> },
    Function,
    Support,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StaticInit {
    Ok,
    Throws(String),
}

/// Serialized class descriptor: what a loaded class declares and what
/// happens when its static initializer runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassFile {
    pub canonical_name: String,
    pub kind: ClassKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub static_init: StaticInit,
}

impl ClassFile {
    pub fn procedure(canonical_name: &str, statements: Vec<StatementDecl>) -> Self {
        Self {
            canonical_name: canonical_name.to_string(),
            kind: ClassKind::Procedure { statements },
            depends_on: Vec::new(),
            static_init: StaticInit::Ok,
        }
    }

    pub fn support(canonical_name: &str) -> Self {
        Self {
            canonical_name: canonical_name.to_string(),
            kind: ClassKind::Support,
            depends_on: Vec::new(),
            static_init: StaticInit::Ok,
        }
    }

    pub fn function(canonical_name: &str) -> Self {
        Self {
            kind: ClassKind::Function,
            ..Self::support(canonical_name)
        }
    }

    pub fn with_dependency(mut self, canonical_name: &str) -> Self {
        self.depends_on.push(canonical_name.to_string());
        self
    }

    pub fn with_failing_init(mut self, reason: &str) -> Self {
        self.static_init = StaticInit::Throws(reason.to_string());
        self
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self.kind, ClassKind::Procedure { .. })
    }

    pub fn statements(&self) -> &[StatementDecl] {
        match &self.kind {
            ClassKind::Procedure { statements } => statements,
            _ => &[],
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LivecatError> {
        let body = rmp_serde::to_vec(self).map_err(|e| LivecatError::Encode(e.to_string()))?;
        let mut out = Vec::with_capacity(CLASS_MAGIC.len() + body.len());
        out.extend_from_slice(CLASS_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn decode(class_name: &str, bytes: &[u8]) -> Result<Self, LivecatError> {
        let bad = |reason: String| LivecatError::ClassLoad {
            class_name: class_name.to_string(),
            reason,
        };
        let body = bytes
            .strip_prefix(CLASS_MAGIC)
            .ok_or_else(|| bad("not a class file".into()))?;
        let file: ClassFile =
            rmp_serde::from_slice(body).map_err(|e| bad(format!("malformed class file: {e}")))?;
        if file.canonical_name != class_name {
            return Err(bad(format!(
                "class file declares '{}' but is stored as '{class_name}'",
                file.canonical_name
            )));
        }
        Ok(file)
    }
}

/// Last dotted segment, inner-class suffix included.
pub fn simple_name(canonical_name: &str) -> &str {
    canonical_name
        .rsplit_once('.')
        .map(|(_, leaf)| leaf)
        .unwrap_or(canonical_name)
}

/// Archive entry path for a canonical class name: `a/b/C.class`.
pub fn class_entry_path(canonical_name: &str) -> String {
    format!("{}.class", canonical_name.replace('.', "/"))
}

/// Canonical class name for an archive entry path, `None` for non-class
/// entries and for class files at the archive root.
pub fn canonical_name_for_entry(path: &str) -> Option<String> {
    let stem = path.strip_suffix(".class")?;
    if !stem.contains('/') {
        return None;
    }
    Some(stem.replace('/', "."))
}

#[derive(Debug, Clone)]
pub struct LoadedClass {
    pub file: ClassFile,
    pub bytes: Arc<Vec<u8>>,
}

/// Classes of one catalog generation, keyed by canonical name, with a
/// derived simple-name index that may hold ambiguous entries.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: OrdMap<String, Arc<LoadedClass>>,
    by_simple_name: OrdMap<String, OrdSet<String>>,
}

pub enum Resolved<'a> {
    Found(&'a LoadedClass),
    Ambiguous(Vec<String>),
    Missing,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn contains(&self, canonical_name: &str) -> bool {
        self.classes.contains_key(canonical_name)
    }

    pub fn get(&self, canonical_name: &str) -> Option<&LoadedClass> {
        self.classes.get(canonical_name).map(|c| c.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.classes.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LoadedClass)> {
        self.classes.iter().map(|(k, v)| (k, v.as_ref()))
    }

    pub fn total_bytes(&self) -> usize {
        self.classes.values().map(|c| c.bytes.len()).sum()
    }

    /// Loads every class of the batch or none of them. Each class must decode,
    /// run its static initializer cleanly and find its dependencies either in
    /// the batch or already loaded. Existing canonical names are overwritten.
    pub fn add(&mut self, batch: &BTreeMap<String, Vec<u8>>) -> Result<Vec<String>, LivecatError> {
        let mut decoded = Vec::with_capacity(batch.len());
        for (name, bytes) in batch {
            let file = ClassFile::decode(name, bytes)?;
            if let StaticInit::Throws(reason) = &file.static_init {
                return Err(LivecatError::ClassLoad {
                    class_name: name.clone(),
                    reason: format!("static initializer failed: {reason}"),
                });
            }
            decoded.push((file, bytes.clone()));
        }
        for (file, _) in &decoded {
            for dep in &file.depends_on {
                if !batch.contains_key(dep) && !self.classes.contains_key(dep) {
                    return Err(LivecatError::ClassLoad {
                        class_name: file.canonical_name.clone(),
                        reason: format!("missing dependency {dep}"),
                    });
                }
            }
        }
        let mut added = Vec::with_capacity(decoded.len());
        for (file, bytes) in decoded {
            added.push(file.canonical_name.clone());
            self.insert(LoadedClass {
                file,
                bytes: Arc::new(bytes),
            });
        }
        Ok(added)
    }

    fn insert(&mut self, class: LoadedClass) {
        let name = class.file.canonical_name.clone();
        let simple = simple_name(&name).to_string();
        let mut names = self.by_simple_name.get(&simple).cloned().unwrap_or_default();
        names.insert(name.clone());
        self.by_simple_name.insert(simple, names);
        self.classes.insert(name, Arc::new(class));
    }

    fn remove_one(&mut self, canonical_name: &str) -> bool {
        if self.classes.remove(canonical_name).is_none() {
            return false;
        }
        let simple = simple_name(canonical_name).to_string();
        let now_empty = match self.by_simple_name.get_mut(&simple) {
            Some(names) => {
                names.remove(canonical_name);
                names.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_simple_name.remove(&simple);
        }
        true
    }

    /// Removes every class matching any pattern, plus the `Outer$...` inner
    /// classes of each removed class. Blank or unmatched patterns are no-ops.
    pub fn remove(&mut self, patterns: &[ClassPattern]) -> Vec<String> {
        let mut doomed: Vec<String> = self
            .classes
            .keys()
            .filter(|name| patterns.iter().any(|p| p.matches(name)))
            .cloned()
            .collect();
        let inner: Vec<String> = self
            .classes
            .keys()
            .filter(|name| {
                doomed
                    .iter()
                    .any(|outer| name.starts_with(&format!("{outer}$")))
            })
            .cloned()
            .collect();
        doomed.extend(inner);
        doomed.sort();
        doomed.dedup();
        doomed.retain(|name| self.remove_one(name));
        doomed
    }

    pub fn resolve(&self, name: &str) -> Resolved<'_> {
        if let Some(class) = self.classes.get(name) {
            return Resolved::Found(class);
        }
        match self.by_simple_name.get(name) {
            Some(names) if names.len() == 1 => match names
                .iter()
                .next()
                .and_then(|canonical| self.classes.get(canonical))
            {
                Some(class) => Resolved::Found(class),
                None => Resolved::Missing,
            },
            Some(names) if !names.is_empty() => Resolved::Ambiguous(names.iter().cloned().collect()),
            _ => Resolved::Missing,
        }
    }

    pub fn resolve_strict(&self, name: &str) -> Result<&LoadedClass, LivecatError> {
        match self.resolve(name) {
            Resolved::Found(class) => Ok(class),
            Resolved::Ambiguous(candidates) => Err(LivecatError::AmbiguousClass {
                name: name.to_string(),
                candidates,
            }),
            Resolved::Missing => Err(LivecatError::ClassNotFound {
                name: name.to_string(),
            }),
        }
    }

    /// Archive entries for every loaded class.
    pub fn entries(&self) -> BTreeMap<String, Vec<u8>> {
        self.classes
            .iter()
            .map(|(name, class)| (class_entry_path(name), class.bytes.as_ref().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ClassFile, ClassRegistry, Resolved, StatementDecl, canonical_name_for_entry,
        class_entry_path, parse_patterns, simple_name,
    };
    use std::collections::BTreeMap;

    fn batch(files: &[ClassFile]) -> BTreeMap<String, Vec<u8>> {
        files
            .iter()
            .map(|f| (f.canonical_name.clone(), f.encode().expect("encode")))
            .collect()
    }

    fn registry_with(names: &[&str]) -> ClassRegistry {
        let mut reg = ClassRegistry::new();
        let files: Vec<ClassFile> = names.iter().map(|n| ClassFile::support(n)).collect();
        reg.add(&batch(&files)).expect("add");
        reg
    }

    #[test]
    fn glob_delete_respects_segments() {
        let mut reg = registry_with(&["a.b.X", "a.b.Y", "a.c.Z"]);
        let removed = reg.remove(&parse_patterns("a.b.*"));
        assert_eq!(removed, vec!["a.b.X".to_string(), "a.b.Y".to_string()]);
        assert!(reg.contains("a.c.Z"));

        let mut reg = registry_with(&["a.b.X", "a.b.Y", "a.c.Z"]);
        assert_eq!(reg.remove(&parse_patterns("a**")).len(), 3);
        assert!(reg.is_empty());
    }

    #[test]
    fn deleting_outer_class_removes_inner_classes() {
        let mut reg = registry_with(&["a.b.X", "a.b.X$Inner", "a.b.X$Inner$Deep", "a.b.XY"]);
        let removed = reg.remove(&parse_patterns("a.b.X"));
        assert_eq!(removed.len(), 3);
        assert!(reg.contains("a.b.XY"));
    }

    #[test]
    fn empty_or_unmatched_patterns_are_noops() {
        let mut reg = registry_with(&["a.b.X"]);
        assert!(reg.remove(&parse_patterns("")).is_empty());
        assert!(reg.remove(&parse_patterns("no.such.*,  ")).is_empty());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn same_simple_name_coexists_and_is_ambiguous() {
        let reg = registry_with(&["a.b.Proc", "c.d.Proc"]);
        assert!(reg.get("a.b.Proc").is_some());
        assert!(reg.get("c.d.Proc").is_some());
        match reg.resolve("Proc") {
            Resolved::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            _ => panic!("expected ambiguity"),
        }
        let err = reg.resolve_strict("Proc").expect_err("ambiguous");
        assert!(err.to_string().contains("a.b.Proc"));
        assert!(reg.resolve_strict("a.b.Proc").is_ok());
    }

    #[test]
    fn simple_name_resolves_after_ambiguity_clears() {
        let mut reg = registry_with(&["a.b.Proc", "c.d.Proc"]);
        reg.remove(&parse_patterns("c.d.Proc"));
        assert!(matches!(reg.resolve("Proc"), Resolved::Found(_)));
    }

    #[test]
    fn failing_static_init_rejects_whole_batch() {
        let mut reg = registry_with(&["a.b.Existing"]);
        let files = vec![
            ClassFile::support("a.b.Good"),
            ClassFile::support("a.b.Bad$Inner").with_failing_init("boom"),
        ];
        let err = reg.add(&batch(&files)).expect_err("bad init");
        assert!(err.to_string().contains("static initializer"));
        assert!(!reg.contains("a.b.Good"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn missing_dependency_rejected_but_batch_dependency_ok() {
        let mut reg = ClassRegistry::new();
        let lonely = vec![ClassFile::support("a.b.User").with_dependency("a.b.Helper")];
        assert!(reg.add(&batch(&lonely)).is_err());
        let paired = vec![
            ClassFile::support("a.b.User").with_dependency("a.b.Helper"),
            ClassFile::support("a.b.Helper"),
        ];
        reg.add(&batch(&paired)).expect("paired");
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn garbage_bytes_fail_to_load() {
        let mut reg = ClassRegistry::new();
        let mut garbage = BTreeMap::new();
        garbage.insert("a.b.Junk".to_string(), b"not a class".to_vec());
        assert!(reg.add(&garbage).is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn overwrite_keeps_single_entry() {
        let mut reg = registry_with(&["a.b.P"]);
        let updated = vec![ClassFile::procedure(
            "a.b.P",
            vec![StatementDecl {
                name: "sel".into(),
                sql: "SELECT * FROM T".into(),
                is_final: true,
            }],
        )];
        reg.add(&batch(&updated)).expect("overwrite");
        assert_eq!(reg.len(), 1);
        assert!(reg.get("a.b.P").expect("present").file.is_procedure());
    }

    #[test]
    fn entry_paths_map_to_canonical_names() {
        assert_eq!(class_entry_path("a.b.X$I"), "a/b/X$I.class");
        assert_eq!(canonical_name_for_entry("a/b/X$I.class").as_deref(), Some("a.b.X$I"));
        assert_eq!(canonical_name_for_entry("Root.class"), None);
        assert_eq!(canonical_name_for_entry("a/b/readme.txt"), None);
        assert_eq!(simple_name("a.b.X$I"), "X$I");
    }
}
