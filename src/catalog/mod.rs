pub mod ddl;
pub mod deployment;
pub mod diff;
pub mod schema;
pub mod types;

use crate::catalog::deployment::Deployment;
use crate::catalog::schema::{
    ColumnDef, IndexDef, ProcedureDef, ProcedureSource, RoleDef, TableAlteration, TableSchema,
    ViewDef, ViewExpr,
};
use crate::catalog::types::ColumnType;
use crate::classes::{ClassRegistry, simple_name};
use crate::error::LivecatError;
use crate::permission::Permission;
use crate::planner::{SchemaPlanner, StatementKind, StatementPlanner};
use im::OrdMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

const MAX_IDENTIFIER_LEN: usize = 128;

pub const ADMINISTRATOR_ROLE: &str = "ADMINISTRATOR";
pub const USER_ROLE: &str = "USER";

/// Default procedures generated for every table with a primary key.
const DEFAULT_PROCEDURE_SUFFIXES: &[&str] = &["insert", "upsert", "select", "delete"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DdlOperation {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
        #[serde(default)]
        unique: Vec<Vec<String>>,
        #[serde(default)]
        if_not_exists: bool,
    },
    AlterTable {
        table: String,
        alteration: TableAlteration,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    PartitionTable {
        table: String,
        column: String,
    },
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
        #[serde(default)]
        if_not_exists: bool,
    },
    DropIndex {
        name: String,
        if_exists: bool,
    },
    CreateRole {
        name: String,
        permissions: BTreeSet<Permission>,
    },
    DropRole {
        name: String,
        if_exists: bool,
    },
    CreateProcedure {
        name: String,
        source: ProcedureSource,
        allowed_roles: BTreeSet<String>,
    },
    DropProcedure {
        name: String,
        if_exists: bool,
    },
    CreateView {
        name: String,
        columns: Vec<String>,
        exprs: Vec<ViewExpr>,
        source_table: String,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        group_by: Vec<String>,
    },
    DropView {
        name: String,
        if_exists: bool,
    },
}

/// One immutable catalog generation: schema, procedures, roles, classes and
/// deployment. Built once by [`Catalog::compile`] and never mutated after it
/// is published.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub generation: u64,
    pub tables: OrdMap<String, TableSchema>,
    pub indexes: OrdMap<String, IndexDef>,
    pub views: OrdMap<String, ViewDef>,
    pub procedures: OrdMap<String, ProcedureDef>,
    pub roles: OrdMap<String, RoleDef>,
    pub classes: ClassRegistry,
    pub deployment: Arc<Deployment>,
    pub catalog_hash: String,
    pub deployment_hash: String,
    footprint_bytes: usize,
}

/// A procedure as seen by the invocation surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProcedure {
    pub def: ProcedureDef,
    pub is_default: bool,
}

#[derive(Serialize)]
struct SchemaImage<'a> {
    tables: &'a OrdMap<String, TableSchema>,
    indexes: &'a OrdMap<String, IndexDef>,
    views: &'a OrdMap<String, ViewDef>,
    procedures: &'a OrdMap<String, ProcedureDef>,
    roles: &'a OrdMap<String, RoleDef>,
    classes: Vec<(&'a str, String)>,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut roles = OrdMap::new();
        roles.insert(
            ADMINISTRATOR_ROLE.to_string(),
            RoleDef {
                name: ADMINISTRATOR_ROLE.to_string(),
                permissions: [Permission::Admin].into_iter().collect(),
            },
        );
        roles.insert(
            USER_ROLE.to_string(),
            RoleDef {
                name: USER_ROLE.to_string(),
                permissions: [Permission::Sql, Permission::DefaultProc, Permission::AllProc]
                    .into_iter()
                    .collect(),
            },
        );
        Self {
            generation: 0,
            tables: OrdMap::new(),
            indexes: OrdMap::new(),
            views: OrdMap::new(),
            procedures: OrdMap::new(),
            roles,
            classes: ClassRegistry::new(),
            deployment: Arc::new(Deployment::default()),
            catalog_hash: String::new(),
            deployment_hash: String::new(),
            footprint_bytes: 0,
        }
    }
}

impl Catalog {
    /// Compiles a DDL script against a class archive and deployment into a
    /// fully bound catalog. The generation is assigned by the store.
    pub fn compile(
        ddl_script: &str,
        classes: ClassRegistry,
        deployment: Deployment,
    ) -> Result<Self, LivecatError> {
        let mut catalog = Catalog {
            classes,
            ..Catalog::default()
        };
        for op in ddl::parse_script(ddl_script)? {
            catalog.apply_ddl(op)?;
        }
        catalog.finalize(deployment)?;
        Ok(catalog)
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn apply_ddl(&mut self, op: DdlOperation) -> Result<(), LivecatError> {
        match op {
            DdlOperation::CreateTable {
                name,
                columns,
                primary_key,
                unique,
                if_not_exists,
            } => self.create_table(&name, columns, primary_key, unique, if_not_exists),
            DdlOperation::AlterTable { table, alteration } => self.alter_table(&table, alteration),
            DdlOperation::DropTable { name, if_exists } => self.drop_table(&name, if_exists),
            DdlOperation::PartitionTable { table, column } => self.partition_table(&table, &column),
            DdlOperation::CreateIndex {
                name,
                table,
                columns,
                unique,
                if_not_exists,
            } => self.create_index(&name, &table, columns, unique, if_not_exists),
            DdlOperation::DropIndex { name, if_exists } => self.drop_index(&name, if_exists),
            DdlOperation::CreateRole { name, permissions } => self.create_role(&name, permissions),
            DdlOperation::DropRole { name, if_exists } => self.drop_role(&name, if_exists),
            DdlOperation::CreateProcedure {
                name,
                source,
                allowed_roles,
            } => self.create_procedure(&name, source, allowed_roles),
            DdlOperation::DropProcedure { name, if_exists } => {
                self.drop_procedure(&name, if_exists)
            }
            DdlOperation::CreateView {
                name,
                columns,
                exprs,
                source_table,
                filter,
                group_by,
            } => self.create_view(&name, columns, exprs, &source_table, filter, group_by),
            DdlOperation::DropView { name, if_exists } => self.drop_view(&name, if_exists),
        }
    }

    fn create_table(
        &mut self,
        name: &str,
        mut columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
        unique: Vec<Vec<String>>,
        if_not_exists: bool,
    ) -> Result<(), LivecatError> {
        validate_identifier(name, "table name")?;
        if self.views.contains_key(name) {
            return Err(LivecatError::Ddl(format!("object name already exists: {name}")));
        }
        if self.tables.contains_key(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(LivecatError::Ddl(format!("object name already exists: {name}")));
        }
        if columns.is_empty() {
            return Err(LivecatError::Ddl(format!(
                "table {name} needs at least one column"
            )));
        }
        let mut seen = BTreeSet::new();
        for col in &columns {
            validate_identifier(&col.name, "column name")?;
            if !seen.insert(col.name.as_str()) {
                return Err(LivecatError::Ddl(format!(
                    "duplicate column {} in table {name}",
                    col.name
                )));
            }
        }
        for pk in &primary_key {
            let Some(col) = columns.iter_mut().find(|c| c.name == *pk) else {
                return Err(LivecatError::Ddl(format!(
                    "primary key column {pk} does not exist in table {name}"
                )));
            };
            col.nullable = false;
        }
        self.tables.insert(
            name.to_string(),
            TableSchema {
                name: name.to_string(),
                columns,
                primary_key,
                partition_column: None,
            },
        );
        for cols in unique {
            let index_name = format!("SYS_UNIQUE_{name}_{}", cols.join("_"));
            self.create_index(&index_name, name, cols, true, false)?;
        }
        Ok(())
    }

    fn alter_table(&mut self, table: &str, alteration: TableAlteration) -> Result<(), LivecatError> {
        let mut schema = self
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| LivecatError::Ddl(format!("object not found: {table}")))?;
        match alteration {
            TableAlteration::AddColumn(col) => {
                validate_identifier(&col.name, "column name")?;
                if schema.has_column(&col.name) {
                    return Err(LivecatError::Ddl(format!(
                        "column {} already exists in table {table}",
                        col.name
                    )));
                }
                schema.columns.push(col);
            }
            TableAlteration::DropColumn { name } => {
                if !schema.has_column(&name) {
                    return Err(LivecatError::Ddl(format!(
                        "column {name} does not exist in table {table}"
                    )));
                }
                if schema.primary_key.contains(&name)
                    || schema.partition_column.as_deref() == Some(name.as_str())
                {
                    return Err(LivecatError::Ddl(format!(
                        "column {name} is part of the primary key or partitioning of {table}"
                    )));
                }
                if let Some(index) = self
                    .indexes
                    .values()
                    .find(|i| i.table == table && i.columns.contains(&name))
                {
                    return Err(LivecatError::Ddl(format!(
                        "column {name} is used by index {}",
                        index.name
                    )));
                }
                if schema.columns.len() == 1 {
                    return Err(LivecatError::Ddl(format!(
                        "cannot drop the only column of table {table}"
                    )));
                }
                self.check_not_in_view(table, &name)?;
                schema.columns.retain(|c| c.name != name);
            }
            TableAlteration::AlterColumn(col) => {
                let Some(existing) = schema.columns.iter_mut().find(|c| c.name == col.name) else {
                    return Err(LivecatError::Ddl(format!(
                        "column {} does not exist in table {table}",
                        col.name
                    )));
                };
                if existing.col_type != col.col_type {
                    self.check_not_in_view(table, &col.name)?;
                }
                let pinned = schema.primary_key.contains(&col.name)
                    || schema.partition_column.as_deref() == Some(col.name.as_str());
                *existing = ColumnDef {
                    nullable: col.nullable && !pinned,
                    ..col
                };
            }
        }
        self.tables.insert(table.to_string(), schema);
        Ok(())
    }

    fn drop_table(&mut self, name: &str, if_exists: bool) -> Result<(), LivecatError> {
        if let Some(view) = self.views.values().find(|v| v.source_table == name) {
            return Err(LivecatError::Ddl(format!(
                "table {name} is the source of view {}; drop the view first",
                view.name
            )));
        }
        if self.tables.remove(name).is_none() {
            if if_exists {
                return Ok(());
            }
            return Err(LivecatError::Ddl(format!("object not found: {name}")));
        }
        let doomed: Vec<String> = self
            .indexes
            .values()
            .filter(|i| i.table == name)
            .map(|i| i.name.clone())
            .collect();
        for index in doomed {
            self.indexes.remove(&index);
        }
        Ok(())
    }

    fn partition_table(&mut self, table: &str, column: &str) -> Result<(), LivecatError> {
        let mut schema = self
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| LivecatError::Ddl(format!("object not found: {table}")))?;
        let Some(col) = schema.columns.iter_mut().find(|c| c.name == column) else {
            return Err(LivecatError::Ddl(format!(
                "partition column {column} does not exist in table {table}"
            )));
        };
        if col.nullable {
            return Err(LivecatError::Ddl(format!(
                "partition column {table}.{column} must be declared NOT NULL"
            )));
        }
        if !schema.primary_key.is_empty() && !schema.primary_key.iter().any(|c| c == column) {
            return Err(LivecatError::Ddl(format!(
                "primary key of partitioned table {table} must include the partition column {column}"
            )));
        }
        schema.partition_column = Some(column.to_string());
        self.tables.insert(table.to_string(), schema);
        Ok(())
    }

    fn create_index(
        &mut self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        unique: bool,
        if_not_exists: bool,
    ) -> Result<(), LivecatError> {
        validate_identifier(name, "index name")?;
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| LivecatError::Ddl(format!("object not found: {table}")))?;
        if columns.is_empty() {
            return Err(LivecatError::Ddl(format!("index {name} needs at least one column")));
        }
        for col in &columns {
            if !schema.has_column(col) {
                return Err(LivecatError::Ddl(format!(
                    "index column {col} does not exist in table {table}"
                )));
            }
        }
        if self.indexes.contains_key(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(LivecatError::Ddl(format!("object name already exists: {name}")));
        }
        self.indexes.insert(
            name.to_string(),
            IndexDef {
                name: name.to_string(),
                table: table.to_string(),
                columns,
                unique,
            },
        );
        Ok(())
    }

    fn drop_index(&mut self, name: &str, if_exists: bool) -> Result<(), LivecatError> {
        if self.indexes.remove(name).is_none() && !if_exists {
            return Err(LivecatError::Ddl(format!("object not found: {name}")));
        }
        Ok(())
    }

    fn check_not_in_view(&self, table: &str, column: &str) -> Result<(), LivecatError> {
        match self
            .views
            .values()
            .find(|v| v.source_table == table && v.references(column))
        {
            Some(view) => Err(LivecatError::Ddl(format!(
                "column {column} of table {table} is used by view {}",
                view.name
            ))),
            None => Ok(()),
        }
    }

    fn create_view(
        &mut self,
        name: &str,
        columns: Vec<String>,
        exprs: Vec<ViewExpr>,
        source_table: &str,
        filter: Option<String>,
        group_by: Vec<String>,
    ) -> Result<(), LivecatError> {
        validate_identifier(name, "view name")?;
        if self.tables.contains_key(name) || self.views.contains_key(name) {
            return Err(LivecatError::Ddl(format!("object name already exists: {name}")));
        }
        if self.views.contains_key(source_table) {
            return Err(LivecatError::Ddl(format!(
                "A materialized view ({name}) can not be defined on another view ({source_table})"
            )));
        }
        let source = self
            .tables
            .get(source_table)
            .ok_or_else(|| LivecatError::Ddl(format!("object not found: {source_table}")))?;
        if columns.len() != exprs.len() {
            return Err(LivecatError::Ddl(format!(
                "view {name} declares {} columns but selects {}",
                columns.len(),
                exprs.len()
            )));
        }
        for (i, key) in group_by.iter().enumerate() {
            if exprs.get(i) != Some(&ViewExpr::Column(key.clone())) {
                return Err(LivecatError::Ddl(format!(
                    "view {name} column {} must exactly match the GROUP BY clause at index {i}",
                    i + 1
                )));
            }
        }
        if exprs[group_by.len()..].iter().any(|e| !e.is_aggregate()) {
            return Err(LivecatError::Ddl(format!(
                "view {name} must have non-group by columns aggregated by sum, count, min or max"
            )));
        }
        let mut seen = BTreeSet::new();
        let mut out = Vec::with_capacity(exprs.len());
        for (column, expr) in columns.iter().zip(&exprs) {
            validate_identifier(column, "column name")?;
            if !seen.insert(column.as_str()) {
                return Err(LivecatError::Ddl(format!(
                    "duplicate column {column} in view {name}"
                )));
            }
            let input = match expr.source_column() {
                Some(col) => Some(source.column(col).ok_or_else(|| {
                    LivecatError::Ddl(format!(
                        "view {name} reads column {col} which does not exist in table {source_table}"
                    ))
                })?),
                None => None,
            };
            let (col_type, nullable) = match (expr, input) {
                (ViewExpr::CountStar | ViewExpr::Count(_), _) => (ColumnType::BigInt, false),
                (ViewExpr::Sum(col), Some(input)) => match input.col_type {
                    ColumnType::TinyInt | ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
                        (ColumnType::BigInt, true)
                    }
                    ColumnType::Float | ColumnType::Decimal => (input.col_type, true),
                    other => {
                        return Err(LivecatError::Ddl(format!(
                            "view {name} cannot SUM column {col} of type {other}"
                        )));
                    }
                },
                (ViewExpr::Column(_), Some(input)) => (input.col_type, input.nullable),
                (_, Some(input)) => (input.col_type, true),
                (_, None) => (ColumnType::BigInt, false),
            };
            out.push(ColumnDef {
                name: column.clone(),
                col_type,
                nullable,
                default: None,
            });
        }
        if let Some(filter) = &filter {
            SchemaPlanner
                .plan(self, &format!("SELECT * FROM {source_table} WHERE {filter}"))
                .map_err(|reason| LivecatError::Ddl(format!("view {name} filter: {reason}")))?;
        }
        let partition_column = source
            .partition_column
            .as_ref()
            .and_then(|p| group_by.iter().position(|g| g == p))
            .map(|i| columns[i].clone());
        let schema = TableSchema {
            name: name.to_string(),
            columns: out,
            primary_key: columns[..group_by.len()].to_vec(),
            partition_column,
        };
        self.views.insert(
            name.to_string(),
            ViewDef {
                name: name.to_string(),
                source_table: source_table.to_string(),
                exprs,
                group_by,
                filter,
                schema,
            },
        );
        Ok(())
    }

    fn drop_view(&mut self, name: &str, if_exists: bool) -> Result<(), LivecatError> {
        if self.views.remove(name).is_none() && !if_exists {
            return Err(LivecatError::Ddl(format!("object not found: {name}")));
        }
        Ok(())
    }

    /// Table or view schema readable under `name`.
    pub fn relation(&self, name: &str) -> Option<&TableSchema> {
        self.tables
            .get(name)
            .or_else(|| self.views.get(name).map(|v| &v.schema))
    }

    fn create_role(
        &mut self,
        name: &str,
        permissions: BTreeSet<Permission>,
    ) -> Result<(), LivecatError> {
        validate_identifier(name, "role name")?;
        if self.roles.contains_key(name) {
            return Err(LivecatError::Ddl(format!("role {name} already exists")));
        }
        self.roles.insert(
            name.to_string(),
            RoleDef {
                name: name.to_string(),
                permissions,
            },
        );
        Ok(())
    }

    fn drop_role(&mut self, name: &str, if_exists: bool) -> Result<(), LivecatError> {
        if is_builtin_role(name) {
            return Err(LivecatError::Ddl(format!("role {name} is built in")));
        }
        if self.roles.remove(name).is_none() {
            if if_exists {
                return Ok(());
            }
            return Err(LivecatError::Ddl(format!("role {name} does not exist")));
        }
        let affected: Vec<String> = self
            .procedures
            .values()
            .filter(|p| p.allowed_roles.contains(name))
            .map(|p| p.name.clone())
            .collect();
        for proc_name in affected {
            if let Some(mut def) = self.procedures.get(&proc_name).cloned() {
                def.allowed_roles.remove(name);
                self.procedures.insert(proc_name, def);
            }
        }
        Ok(())
    }

    fn create_procedure(
        &mut self,
        name: &str,
        source: ProcedureSource,
        allowed_roles: BTreeSet<String>,
    ) -> Result<(), LivecatError> {
        validate_procedure_name(name)?;
        if self.procedures.contains_key(name) {
            return Err(LivecatError::Ddl(format!(
                "procedure {name} is already defined"
            )));
        }
        for role in &allowed_roles {
            if !self.roles.contains_key(role) {
                return Err(LivecatError::Ddl(format!(
                    "procedure {name} allows undefined role {role}"
                )));
            }
        }
        self.procedures.insert(
            name.to_string(),
            ProcedureDef {
                name: name.to_string(),
                source,
                allowed_roles,
                read_only: false,
            },
        );
        Ok(())
    }

    fn drop_procedure(&mut self, name: &str, if_exists: bool) -> Result<(), LivecatError> {
        if self.procedures.remove(name).is_none() && !if_exists {
            return Err(LivecatError::Ddl(format!("procedure {name} does not exist")));
        }
        Ok(())
    }

    /// Binds class procedures, checks cross references against the
    /// deployment and computes hashes and footprint.
    fn finalize(&mut self, deployment: Deployment) -> Result<(), LivecatError> {
        let names: Vec<String> = self.procedures.keys().cloned().collect();
        for name in names {
            let Some(mut def) = self.procedures.get(&name).cloned() else {
                continue;
            };
            def.read_only = match &def.source {
                ProcedureSource::Statement { sql } => StatementKind::classify(sql).is_read_only(),
                ProcedureSource::Class { class_name } => {
                    let class = self.classes.get(class_name).ok_or_else(|| {
                        LivecatError::Ddl(format!(
                            "Cannot load class for procedure: {class_name}"
                        ))
                    })?;
                    if !class.file.is_procedure() {
                        return Err(LivecatError::Ddl(format!(
                            "class {class_name} is not a stored procedure"
                        )));
                    }
                    class
                        .file
                        .statements()
                        .iter()
                        .all(|s| StatementKind::classify(&s.sql).is_read_only())
                }
            };
            self.procedures.insert(name, def);
        }
        for user in &deployment.users {
            for role in &user.roles {
                if !self.roles.contains_key(role) {
                    return Err(LivecatError::Deployment(format!(
                        "user {} is assigned undefined role {role}",
                        user.name
                    )));
                }
            }
        }
        let deployment_bytes = deployment.to_bytes()?;
        self.deployment_hash = hex::encode(Sha256::digest(&deployment_bytes));
        self.deployment = Arc::new(deployment);
        let image = self.schema_image()?;
        self.catalog_hash = hex::encode(Sha256::digest(&image));
        self.footprint_bytes = image.len() + self.classes.total_bytes() + deployment_bytes.len();
        Ok(())
    }

    fn schema_image(&self) -> Result<Vec<u8>, LivecatError> {
        let classes = self
            .classes
            .iter()
            .map(|(name, class)| (name.as_str(), hex::encode(Sha256::digest(class.bytes.as_slice()))))
            .collect();
        let image = SchemaImage {
            tables: &self.tables,
            indexes: &self.indexes,
            views: &self.views,
            procedures: &self.procedures,
            roles: &self.roles,
            classes,
        };
        rmp_serde::to_vec(&image).map_err(|e| LivecatError::Encode(e.to_string()))
    }

    /// Estimated in-memory size of this generation.
    pub fn footprint_bytes(&self) -> usize {
        self.footprint_bytes
    }

    /// True when schema, classes and deployment all hash equal.
    pub fn same_content(&self, other: &Catalog) -> bool {
        self.catalog_hash == other.catalog_hash && self.deployment_hash == other.deployment_hash
    }

    pub fn resolve_procedure(&self, name: &str) -> Option<ResolvedProcedure> {
        if let Some(def) = self.procedures.get(name) {
            return Some(ResolvedProcedure {
                def: def.clone(),
                is_default: false,
            });
        }
        let (table, op) = name.rsplit_once('.')?;
        if !DEFAULT_PROCEDURE_SUFFIXES.contains(&op) {
            return None;
        }
        let schema = self.tables.get(table)?;
        if schema.primary_key.is_empty() {
            return None;
        }
        let cols: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        let placeholders = vec!["?"; cols.len()].join(", ");
        let pk_filter = schema
            .primary_key
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = match op {
            "insert" => format!("INSERT INTO {table} ({}) VALUES ({placeholders})", cols.join(", ")),
            "upsert" => format!("UPSERT INTO {table} ({}) VALUES ({placeholders})", cols.join(", ")),
            "select" => format!("SELECT * FROM {table} WHERE {pk_filter}"),
            _ => format!("DELETE FROM {table} WHERE {pk_filter}"),
        };
        Some(ResolvedProcedure {
            def: ProcedureDef {
                name: name.to_string(),
                read_only: op == "select",
                source: ProcedureSource::Statement { sql },
                allowed_roles: BTreeSet::new(),
            },
            is_default: true,
        })
    }

    /// Names of classes bound to a procedure in this generation.
    pub fn active_procedure_classes(&self) -> BTreeSet<String> {
        self.procedures
            .values()
            .filter_map(|p| p.class_name().map(str::to_string))
            .collect()
    }

    /// Regenerates DDL equivalent to this catalog's schema, used when ad hoc
    /// DDL extends the current schema and when the catalog is archived.
    pub fn canonical_ddl(&self) -> String {
        let mut out = String::new();
        for table in self.tables.values() {
            let mut lines: Vec<String> = table
                .columns
                .iter()
                .map(|c| {
                    let mut line = format!("  {} {}", c.name, c.col_type);
                    if let Some(default) = &c.default {
                        line.push_str(&format!(" DEFAULT {default}"));
                    }
                    if !c.nullable {
                        line.push_str(" NOT NULL");
                    }
                    line
                })
                .collect();
            if !table.primary_key.is_empty() {
                lines.push(format!("  PRIMARY KEY ({})", table.primary_key.join(", ")));
            }
            out.push_str(&format!(
                "CREATE TABLE {} (\n{}\n);\n",
                table.name,
                lines.join(",\n")
            ));
            if let Some(column) = &table.partition_column {
                out.push_str(&format!(
                    "PARTITION TABLE {} ON COLUMN {column};\n",
                    table.name
                ));
            }
        }
        for index in self.indexes.values() {
            out.push_str(&format!(
                "CREATE {}INDEX {} ON {} ({});\n",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                index.table,
                index.columns.join(", ")
            ));
        }
        for view in self.views.values() {
            out.push_str(&view.to_ddl());
            out.push('\n');
        }
        for role in self.roles.values().filter(|r| !is_builtin_role(&r.name)) {
            if role.permissions.is_empty() {
                out.push_str(&format!("CREATE ROLE {};\n", role.name));
            } else {
                let perms: Vec<&str> = role.permissions.iter().map(|p| p.as_str()).collect();
                out.push_str(&format!("CREATE ROLE {} WITH {};\n", role.name, perms.join(",")));
            }
        }
        for proc_def in self.procedures.values() {
            let allow = if proc_def.allowed_roles.is_empty() {
                String::new()
            } else {
                let roles: Vec<&str> = proc_def.allowed_roles.iter().map(String::as_str).collect();
                format!(" ALLOW {}", roles.join(","))
            };
            match &proc_def.source {
                ProcedureSource::Class { class_name } => {
                    out.push_str(&format!("CREATE PROCEDURE{allow} FROM CLASS {class_name};\n"));
                }
                ProcedureSource::Statement { sql } => {
                    out.push_str(&format!(
                        "CREATE PROCEDURE {}{allow} AS {sql};\n",
                        proc_def.name
                    ));
                }
            }
        }
        out
    }

    pub fn role_permissions(&self, roles: &BTreeSet<String>) -> BTreeSet<Permission> {
        roles
            .iter()
            .filter_map(|r| self.roles.get(r))
            .flat_map(|r| r.permissions.iter().copied())
            .collect()
    }
}

pub fn is_builtin_role(name: &str) -> bool {
    name == ADMINISTRATOR_ROLE || name == USER_ROLE
}

/// Procedure name implied by `CREATE PROCEDURE FROM CLASS`.
pub fn procedure_name_for_class(class_name: &str) -> String {
    simple_name(class_name).to_string()
}

fn validate_identifier(value: &str, what: &str) -> Result<(), LivecatError> {
    if value.is_empty() {
        return Err(LivecatError::Ddl(format!("{what} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(LivecatError::Ddl(format!(
            "{what} must be <= {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LivecatError::Ddl(format!(
            "{what} '{value}' must contain only [A-Za-z0-9_]"
        )));
    }
    Ok(())
}

fn validate_procedure_name(value: &str) -> Result<(), LivecatError> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(LivecatError::Ddl(format!("invalid procedure name '{value}'")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(LivecatError::Ddl(format!(
            "procedure name '{value}' must contain only [A-Za-z0-9_$]"
        )));
    }
    Ok(())
}
