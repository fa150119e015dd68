use crate::catalog::Catalog;
use crate::catalog::diff::CatalogDiff;
use crate::catalog::schema::ProcedureSource;
use crate::classes::StaticInit;
use crate::error::LivecatError;
use crate::planner::{PlannedStatement, StatementPlanner};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub statements_planned: usize,
    /// New footprint plus every generation still pinned by running calls.
    pub required_bytes: usize,
    pub plans: BTreeMap<String, Vec<PlannedStatement>>,
}

/// Checks a compiled candidate catalog before it may be proposed. Every step
/// runs against the shadow candidate; nothing here touches the active catalog.
pub struct UpdateValidator {
    planner: Arc<dyn StatementPlanner>,
    max_catalog_memory_bytes: usize,
}

impl UpdateValidator {
    pub fn new(planner: Arc<dyn StatementPlanner>, max_catalog_memory_bytes: usize) -> Self {
        Self {
            planner,
            max_catalog_memory_bytes,
        }
    }

    /// Runs the structural, class, re-plan and size checks in that order.
    /// `retained_bytes` is the footprint of generations that stay alive while
    /// in-flight calls drain.
    pub fn validate(
        &self,
        candidate: &Catalog,
        diff: &CatalogDiff,
        retained_bytes: usize,
    ) -> Result<ValidationReport, LivecatError> {
        Self::check_structure(diff)?;
        Self::check_classes(candidate, diff)?;
        let plans = self.replan(candidate)?;
        let required_bytes = candidate.footprint_bytes().saturating_add(retained_bytes);
        if required_bytes > self.max_catalog_memory_bytes {
            return Err(LivecatError::SizeLimitExceeded {
                required_bytes,
                limit_bytes: self.max_catalog_memory_bytes,
            });
        }
        let statements_planned = plans.values().map(Vec::len).sum();
        debug!(statements_planned, required_bytes, "catalog candidate validated");
        Ok(ValidationReport {
            statements_planned,
            required_bytes,
            plans,
        })
    }

    fn check_structure(diff: &CatalogDiff) -> Result<(), LivecatError> {
        if diff.unsupported.is_empty() {
            return Ok(());
        }
        Err(LivecatError::UnsupportedChange(diff.unsupported.join("\n")))
    }

    /// Classes that are new or changed must initialise cleanly and find every
    /// dependency in the candidate generation.
    fn check_classes(candidate: &Catalog, diff: &CatalogDiff) -> Result<(), LivecatError> {
        for name in diff.classes_added.iter().chain(&diff.classes_changed) {
            let class = candidate
                .classes
                .get(name)
                .ok_or_else(|| LivecatError::ClassNotFound { name: name.clone() })?;
            if let StaticInit::Throws(reason) = &class.file.static_init {
                return Err(LivecatError::ClassLoad {
                    class_name: name.clone(),
                    reason: format!("static initializer failed: {reason}"),
                });
            }
            if let Some(missing) = class
                .file
                .depends_on
                .iter()
                .find(|dep| !candidate.classes.contains(dep))
            {
                return Err(LivecatError::ClassLoad {
                    class_name: name.clone(),
                    reason: format!("missing dependency {missing}"),
                });
            }
        }
        Ok(())
    }

    /// Plans every statement of every procedure, old and new, against the
    /// candidate schema.
    fn replan(
        &self,
        candidate: &Catalog,
    ) -> Result<BTreeMap<String, Vec<PlannedStatement>>, LivecatError> {
        let mut out = BTreeMap::new();
        for (name, procedure) in &candidate.procedures {
            let mut plans = Vec::new();
            match &procedure.source {
                ProcedureSource::Statement { sql } => {
                    let plan = self.planner.plan(candidate, sql).map_err(|reason| {
                        LivecatError::PlanFailure {
                            procedure: name.clone(),
                            statement: "sql".into(),
                            reason,
                        }
                    })?;
                    plans.push(plan);
                }
                ProcedureSource::Class { class_name } => {
                    let class = candidate.classes.get(class_name).ok_or_else(|| {
                        LivecatError::ClassLoad {
                            class_name: class_name.clone(),
                            reason: format!("Cannot load class for procedure: {name}"),
                        }
                    })?;
                    for stmt in class.file.statements() {
                        if !stmt.is_final {
                            return Err(LivecatError::NonFinalStatement {
                                procedure: name.clone(),
                                statement: stmt.name.clone(),
                            });
                        }
                        let plan = self.planner.plan(candidate, &stmt.sql).map_err(|reason| {
                            LivecatError::PlanFailure {
                                procedure: name.clone(),
                                statement: stmt.name.clone(),
                                reason,
                            }
                        })?;
                        plans.push(plan);
                    }
                }
            }
            out.insert(name.clone(), plans);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::UpdateValidator;
    use crate::catalog::Catalog;
    use crate::catalog::deployment::Deployment;
    use crate::catalog::diff::CatalogDiff;
    use crate::classes::{ClassFile, ClassPattern, ClassRegistry, StatementDecl};
    use crate::error::LivecatError;
    use crate::planner::SchemaPlanner;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn validator(limit: usize) -> UpdateValidator {
        UpdateValidator::new(Arc::new(SchemaPlanner), limit)
    }

    fn registry(classes: &[ClassFile]) -> ClassRegistry {
        let batch: BTreeMap<String, Vec<u8>> = classes
            .iter()
            .map(|c| (c.canonical_name.clone(), c.encode().expect("encode")))
            .collect();
        let mut reg = ClassRegistry::new();
        reg.add(&batch).expect("add");
        reg
    }

    fn stmt(name: &str, sql: &str, is_final: bool) -> StatementDecl {
        StatementDecl {
            name: name.into(),
            sql: sql.into(),
            is_final,
        }
    }

    #[test]
    fn procedures_are_replanned_against_new_schema() {
        let classes = registry(&[ClassFile::procedure(
            "org.example.SelectAll",
            vec![stmt("select", "SELECT A, B FROM T", true)],
        )]);
        let base = Catalog::compile(
            "CREATE TABLE T (A INTEGER, B INTEGER); CREATE PROCEDURE FROM CLASS org.example.SelectAll;",
            classes.clone(),
            Deployment::default(),
        )
        .expect("base");
        validator(usize::MAX)
            .validate(&base, &CatalogDiff::default(), 0)
            .expect("valid");

        // Dropping B is legal DDL but breaks the procedure's statement.
        let candidate = Catalog::compile(
            "CREATE TABLE T (A INTEGER); CREATE PROCEDURE FROM CLASS org.example.SelectAll;",
            classes,
            Deployment::default(),
        )
        .expect("candidate");
        let diff = CatalogDiff::compute(&base, &candidate);
        let err = validator(usize::MAX)
            .validate(&candidate, &diff, 0)
            .expect_err("replan");
        assert!(matches!(err, LivecatError::PlanFailure { ref procedure, .. } if procedure == "SelectAll"));
    }

    #[test]
    fn non_final_statement_has_specific_diagnostic() {
        let classes = registry(&[ClassFile::procedure(
            "org.example.Dynamic",
            vec![stmt("stmt", "SELECT A FROM T", false)],
        )]);
        let candidate = Catalog::compile(
            "CREATE TABLE T (A INTEGER); CREATE PROCEDURE FROM CLASS org.example.Dynamic;",
            classes,
            Deployment::default(),
        )
        .expect("candidate");
        let err = validator(usize::MAX)
            .validate(&candidate, &CatalogDiff::default(), 0)
            .expect_err("non-final");
        assert!(matches!(err, LivecatError::NonFinalStatement { .. }));
        assert!(err.to_string().contains("not final"));
    }

    #[test]
    fn footprint_over_limit_is_hard_failure() {
        let candidate = Catalog::compile(
            "CREATE TABLE T (A INTEGER, B VARCHAR(200));",
            ClassRegistry::new(),
            Deployment::default(),
        )
        .expect("candidate");
        let limit = candidate.footprint_bytes() + 10;
        validator(limit)
            .validate(&candidate, &CatalogDiff::default(), 0)
            .expect("fits alone");
        let err = validator(limit)
            .validate(&candidate, &CatalogDiff::default(), 11)
            .expect_err("retained generation pushes over");
        assert!(matches!(err, LivecatError::SizeLimitExceeded { .. }));
    }

    #[test]
    fn unsupported_change_rejected_first() {
        let diff = CatalogDiff {
            unsupported: vec!["cluster topology changed".into()],
            ..CatalogDiff::default()
        };
        let err = validator(usize::MAX)
            .validate(&Catalog::default(), &diff, 0)
            .expect_err("unsupported");
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn changed_class_with_missing_dependency_rejected() {
        let helper = ClassFile::support("org.example.Helper");
        let user = ClassFile::support("org.example.User").with_dependency("org.example.Helper");
        let mut classes = registry(&[helper, user]);
        classes.remove(&[ClassPattern::new("org.example.Helper")]);
        let candidate = Catalog::compile("", classes, Deployment::default()).expect("candidate");
        let diff = CatalogDiff {
            classes_added: vec!["org.example.User".into()],
            ..CatalogDiff::default()
        };
        let err = validator(usize::MAX)
            .validate(&candidate, &diff, 0)
            .expect_err("dependency");
        assert!(err.to_string().contains("missing dependency"));
    }
}
