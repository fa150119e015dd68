use crate::catalog::Catalog;
use crate::catalog::schema::TableSchema;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// Which deployment settings differ between two generations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentDelta {
    pub schema_mode: bool,
    pub query_timeout: bool,
    pub heartbeat: bool,
    pub elastic: bool,
    pub snapshot: bool,
    pub security_enabled: bool,
    pub users: bool,
    pub cluster: bool,
}

impl DeploymentDelta {
    pub fn is_empty(&self) -> bool {
        *self == DeploymentDelta::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    pub table: String,
    pub changes: Vec<String>,
}

/// Everything that differs between the active catalog and a proposed one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogDiff {
    pub tables_added: Vec<String>,
    pub tables_dropped: Vec<String>,
    pub tables_altered: Vec<TableChange>,
    pub indexes_added: Vec<String>,
    pub indexes_dropped: Vec<String>,
    pub views_added: Vec<String>,
    pub views_dropped: Vec<String>,
    pub views_changed: Vec<String>,
    pub procedures_added: Vec<String>,
    pub procedures_dropped: Vec<String>,
    pub procedures_changed: Vec<String>,
    pub roles_added: Vec<String>,
    pub roles_dropped: Vec<String>,
    pub roles_changed: Vec<String>,
    pub classes_added: Vec<String>,
    pub classes_removed: Vec<String>,
    pub classes_changed: Vec<String>,
    pub deployment: DeploymentDelta,
    /// Table -> reasons the change needs the table to hold no rows.
    pub tables_that_must_be_empty: BTreeMap<String, Vec<String>>,
    pub unsupported: Vec<String>,
}

fn keyed_changes<V: PartialEq>(
    old: &im::OrdMap<String, V>,
    new: &im::OrdMap<String, V>,
) -> (Vec<String>, Vec<String>, Vec<String>)
where
    V: Clone,
{
    let added = new.keys().filter(|k| !old.contains_key(*k)).cloned().collect();
    let dropped = old.keys().filter(|k| !new.contains_key(*k)).cloned().collect();
    let changed = new
        .iter()
        .filter(|(k, v)| old.get(*k).is_some_and(|o| o != *v))
        .map(|(k, _)| k.clone())
        .collect();
    (added, dropped, changed)
}

impl CatalogDiff {
    pub fn compute(old: &Catalog, new: &Catalog) -> Self {
        let mut diff = CatalogDiff::default();

        let (added, dropped, altered) = keyed_changes(&old.tables, &new.tables);
        diff.tables_added = added;
        diff.tables_dropped = dropped;
        for name in altered {
            if let (Some(before), Some(after)) = (old.tables.get(&name), new.tables.get(&name)) {
                diff.diff_table(before, after);
            }
        }

        let (added, dropped, changed) = keyed_changes(&old.indexes, &new.indexes);
        diff.indexes_dropped = dropped;
        // A changed index is dropped and rebuilt.
        diff.indexes_dropped.extend(changed.iter().cloned());
        diff.indexes_added = added;
        diff.indexes_added.extend(changed);
        diff.indexes_added.sort();
        diff.indexes_dropped.sort();
        for name in &diff.indexes_added.clone() {
            let Some(index) = new.indexes.get(name) else {
                continue;
            };
            if index.unique && old.tables.contains_key(&index.table) {
                diff.must_be_empty(
                    &index.table,
                    format!("Unable to add unique index {name} because table {} is not empty", index.table),
                );
            }
        }

        let (added, dropped, changed) = keyed_changes(&old.views, &new.views);
        // A view is populated from its source when created, so the source
        // must hold no rows unless it is new in this generation.
        for (name, verb) in added
            .iter()
            .map(|n| (n, "create"))
            .chain(changed.iter().map(|n| (n, "change")))
        {
            let Some(view) = new.views.get(name) else {
                continue;
            };
            if old.tables.contains_key(&view.source_table) {
                diff.must_be_empty(
                    &view.source_table,
                    format!(
                        "Unable to {verb} materialized view {name} because table {} is not empty",
                        view.source_table
                    ),
                );
            }
        }
        diff.views_added = added;
        diff.views_dropped = dropped;
        diff.views_changed = changed;

        let (added, dropped, changed) = keyed_changes(&old.procedures, &new.procedures);
        diff.procedures_added = added;
        diff.procedures_dropped = dropped;
        diff.procedures_changed = changed;

        let (added, dropped, changed) = keyed_changes(&old.roles, &new.roles);
        diff.roles_added = added;
        diff.roles_dropped = dropped;
        diff.roles_changed = changed;

        let old_classes: BTreeSet<&String> = old.classes.names().collect();
        let new_classes: BTreeSet<&String> = new.classes.names().collect();
        diff.classes_added = new_classes
            .difference(&old_classes)
            .map(|s| s.to_string())
            .collect();
        diff.classes_removed = old_classes
            .difference(&new_classes)
            .map(|s| s.to_string())
            .collect();
        diff.classes_changed = new_classes
            .intersection(&old_classes)
            .filter(|name| {
                match (old.classes.get(name.as_str()), new.classes.get(name.as_str())) {
                    (Some(a), Some(b)) => a.bytes != b.bytes,
                    _ => false,
                }
            })
            .map(|s| s.to_string())
            .collect();

        let (a, b) = (&old.deployment, &new.deployment);
        diff.deployment = DeploymentDelta {
            schema_mode: a.schema_mode != b.schema_mode,
            query_timeout: a.query_timeout_ms != b.query_timeout_ms,
            heartbeat: a.heartbeat_timeout_secs != b.heartbeat_timeout_secs,
            elastic: a.elastic != b.elastic,
            snapshot: a.snapshot != b.snapshot,
            security_enabled: a.security != b.security,
            users: a.users != b.users,
            cluster: a.cluster != b.cluster,
        };
        if diff.deployment.cluster {
            diff.unsupported.push(format!(
                "Unable to change the cluster topology (sitesperhost {} -> {}, kfactor {} -> {}) in a live update",
                a.cluster.sites_per_host, b.cluster.sites_per_host, a.cluster.kfactor, b.cluster.kfactor
            ));
        }
        if diff.deployment.schema_mode {
            diff.unsupported.push(
                "Unable to change the schema mode of a running cluster; restart with the new deployment"
                    .to_string(),
            );
        }
        diff
    }

    fn must_be_empty(&mut self, table: &str, reason: String) {
        self.tables_that_must_be_empty
            .entry(table.to_string())
            .or_default()
            .push(reason);
    }

    fn diff_table(&mut self, before: &TableSchema, after: &TableSchema) {
        let table = after.name.clone();
        let mut changes = Vec::new();
        for col in &after.columns {
            match before.column(&col.name) {
                None => {
                    changes.push(format!("add column {}", col.name));
                    if !col.nullable && col.default.is_none() {
                        self.must_be_empty(
                            &table,
                            format!(
                                "Unable to add NOT NULL column {} because table {table} is not empty and no default value was specified",
                                col.name
                            ),
                        );
                    }
                }
                Some(prev) => {
                    if prev.col_type != col.col_type {
                        changes.push(format!(
                            "change column {} type {} -> {}",
                            col.name, prev.col_type, col.col_type
                        ));
                        if !prev.col_type.widens_to(col.col_type) {
                            self.must_be_empty(
                                &table,
                                format!(
                                    "Unable to narrow the type of column {} from {} to {} because table {table} is not empty",
                                    col.name, prev.col_type, col.col_type
                                ),
                            );
                        }
                    }
                    if prev.nullable && !col.nullable {
                        changes.push(format!("make column {} NOT NULL", col.name));
                        self.must_be_empty(
                            &table,
                            format!(
                                "Unable to change column {} to NOT NULL because table {table} is not empty",
                                col.name
                            ),
                        );
                    } else if !prev.nullable && col.nullable {
                        changes.push(format!("make column {} nullable", col.name));
                    }
                    if prev.default != col.default {
                        changes.push(format!("change default of column {}", col.name));
                    }
                }
            }
        }
        for col in &before.columns {
            if !after.has_column(&col.name) {
                changes.push(format!("drop column {}", col.name));
            }
        }
        if before.primary_key != after.primary_key {
            changes.push("change primary key".to_string());
            self.must_be_empty(
                &table,
                format!("Unable to change the primary key of table {table} because it is not empty"),
            );
        }
        if before.partition_column != after.partition_column {
            changes.push(format!(
                "change partitioning {} -> {}",
                before.partition_column.as_deref().unwrap_or("replicated"),
                after.partition_column.as_deref().unwrap_or("replicated")
            ));
            self.must_be_empty(
                &table,
                format!("Unable to change the partitioning of table {table} because it is not empty"),
            );
        }
        let column_order_changed = before
            .columns
            .iter()
            .filter(|c| after.has_column(&c.name))
            .map(|c| &c.name)
            .ne(after
                .columns
                .iter()
                .filter(|c| before.has_column(&c.name))
                .map(|c| &c.name));
        if column_order_changed {
            changes.push("reorder columns".to_string());
        }
        self.tables_altered.push(TableChange { table, changes });
    }

    pub fn has_schema_change(&self) -> bool {
        !(self.tables_added.is_empty()
            && self.tables_dropped.is_empty()
            && self.tables_altered.is_empty()
            && self.indexes_added.is_empty()
            && self.indexes_dropped.is_empty()
            && self.views_added.is_empty()
            && self.views_dropped.is_empty()
            && self.views_changed.is_empty()
            && self.procedures_added.is_empty()
            && self.procedures_dropped.is_empty()
            && self.procedures_changed.is_empty()
            && self.roles_added.is_empty()
            && self.roles_dropped.is_empty()
            && self.roles_changed.is_empty())
    }

    pub fn has_class_change(&self) -> bool {
        !(self.classes_added.is_empty()
            && self.classes_removed.is_empty()
            && self.classes_changed.is_empty())
    }

    /// Security-relevant change: sessions must be revalidated after commit.
    pub fn has_security_change(&self) -> bool {
        self.deployment.security_enabled
            || self.deployment.users
            || !self.roles_dropped.is_empty()
            || !self.roles_changed.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_schema_change() && !self.has_class_change() && self.deployment.is_empty()
    }

    /// Human-readable change list, one change per line.
    pub fn description(&self) -> String {
        let mut out = String::new();
        let sections: [(&str, &Vec<String>); 16] = [
            ("ADD TABLE", &self.tables_added),
            ("DROP TABLE", &self.tables_dropped),
            ("ADD INDEX", &self.indexes_added),
            ("DROP INDEX", &self.indexes_dropped),
            ("ADD VIEW", &self.views_added),
            ("DROP VIEW", &self.views_dropped),
            ("CHANGE VIEW", &self.views_changed),
            ("ADD PROCEDURE", &self.procedures_added),
            ("DROP PROCEDURE", &self.procedures_dropped),
            ("CHANGE PROCEDURE", &self.procedures_changed),
            ("ADD ROLE", &self.roles_added),
            ("DROP ROLE", &self.roles_dropped),
            ("CHANGE ROLE", &self.roles_changed),
            ("ADD CLASS", &self.classes_added),
            ("REMOVE CLASS", &self.classes_removed),
            ("CHANGE CLASS", &self.classes_changed),
        ];
        for (label, names) in sections {
            for name in names {
                let _ = writeln!(out, "{label} {name}");
            }
        }
        for change in &self.tables_altered {
            for detail in &change.changes {
                let _ = writeln!(out, "ALTER TABLE {}: {detail}", change.table);
            }
        }
        let d = &self.deployment;
        let flags = [
            (d.schema_mode, "schema mode"),
            (d.query_timeout, "query timeout"),
            (d.heartbeat, "heartbeat timeout"),
            (d.elastic, "elastic throttle"),
            (d.snapshot, "snapshot schedule"),
            (d.security_enabled, "security"),
            (d.users, "users"),
            (d.cluster, "cluster topology"),
        ];
        for (changed, what) in flags {
            if changed {
                let _ = writeln!(out, "DEPLOYMENT {what} changed");
            }
        }
        if out.is_empty() {
            out.push_str("no changes\n");
        }
        out
    }

    /// Message listing every must-be-empty reason for the given non-empty tables.
    pub fn must_be_empty_message(&self, non_empty: &[String]) -> String {
        non_empty
            .iter()
            .filter_map(|t| self.tables_that_must_be_empty.get(t))
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}
