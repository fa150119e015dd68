use crate::catalog::types::ColumnType;
use crate::permission::Permission;
use crate::sql::{Token, tokenize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
    /// Literal default as written in the DDL, if any.
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    /// `None` for replicated tables.
    #[serde(default)]
    pub partition_column: Option<String>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn row_width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.col_type.footprint_bytes())
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProcedureSource {
    /// Bound to a loaded procedure class.
    Class { class_name: String },
    /// A single inline SQL statement.
    Statement { sql: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProcedureDef {
    pub name: String,
    pub source: ProcedureSource,
    #[serde(default)]
    pub allowed_roles: BTreeSet<String>,
    /// Derived at compile time from the statements the procedure runs.
    #[serde(default)]
    pub read_only: bool,
}

impl ProcedureDef {
    pub fn class_name(&self) -> Option<&str> {
        match &self.source {
            ProcedureSource::Class { class_name } => Some(class_name),
            ProcedureSource::Statement { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoleDef {
    pub name: String,
    pub permissions: BTreeSet<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TableAlteration {
    AddColumn(ColumnDef),
    DropColumn { name: String },
    /// Replaces type, nullability and default of an existing column.
    AlterColumn(ColumnDef),
}

/// One item of a view's select list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ViewExpr {
    /// Group key copied from the source table.
    Column(String),
    CountStar,
    Count(String),
    Sum(String),
    Min(String),
    Max(String),
}

impl ViewExpr {
    pub fn source_column(&self) -> Option<&str> {
        match self {
            ViewExpr::CountStar => None,
            ViewExpr::Column(c)
            | ViewExpr::Count(c)
            | ViewExpr::Sum(c)
            | ViewExpr::Min(c)
            | ViewExpr::Max(c) => Some(c),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !matches!(self, ViewExpr::Column(_))
    }
}

impl fmt::Display for ViewExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewExpr::Column(c) => write!(f, "{c}"),
            ViewExpr::CountStar => write!(f, "COUNT(*)"),
            ViewExpr::Count(c) => write!(f, "COUNT({c})"),
            ViewExpr::Sum(c) => write!(f, "SUM({c})"),
            ViewExpr::Min(c) => write!(f, "MIN({c})"),
            ViewExpr::Max(c) => write!(f, "MAX({c})"),
        }
    }
}

/// Materialized view over a single source table. The engine maintains its
/// rows; the catalog keeps the definition and the derived output schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ViewDef {
    pub name: String,
    pub source_table: String,
    /// Select list, group keys first.
    pub exprs: Vec<ViewExpr>,
    pub group_by: Vec<String>,
    /// WHERE clause as written.
    #[serde(default)]
    pub filter: Option<String>,
    /// Output columns. The group keys form the primary key.
    pub schema: TableSchema,
}

impl ViewDef {
    /// True when the select list, grouping or filter reads `column` of the source.
    pub fn references(&self, column: &str) -> bool {
        if self.group_by.iter().any(|g| g == column)
            || self.exprs.iter().any(|e| e.source_column() == Some(column))
        {
            return true;
        }
        let Some(filter) = &self.filter else {
            return false;
        };
        tokenize(filter).is_ok_and(|tokens| {
            tokens.iter().any(
                |s| matches!(&s.token, Token::Ident(w) if w.eq_ignore_ascii_case(column)),
            )
        })
    }

    pub fn to_ddl(&self) -> String {
        let names: Vec<&str> = self.schema.columns.iter().map(|c| c.name.as_str()).collect();
        let exprs: Vec<String> = self.exprs.iter().map(ToString::to_string).collect();
        let mut out = format!(
            "CREATE VIEW {} ({}) AS SELECT {} FROM {}",
            self.name,
            names.join(", "),
            exprs.join(", "),
            self.source_table
        );
        if let Some(filter) = &self.filter {
            out.push_str(&format!(" WHERE {filter}"));
        }
        if !self.group_by.is_empty() {
            out.push_str(&format!(" GROUP BY {}", self.group_by.join(", ")));
        }
        out.push(';');
        out
    }
}
