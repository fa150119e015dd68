use crate::catalog::Catalog;
use crate::catalog::schema::TableSchema;
use crate::sql::lexer::{Spanned, Token, tokenize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Upsert,
    Update,
    Delete,
    Truncate,
    Ddl,
    Unknown,
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let first = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match first.as_str() {
            "SELECT" | "WITH" => StatementKind::Select,
            "INSERT" => StatementKind::Insert,
            "UPSERT" => StatementKind::Upsert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "TRUNCATE" => StatementKind::Truncate,
            "CREATE" | "DROP" | "ALTER" | "PARTITION" => StatementKind::Ddl,
            _ => StatementKind::Unknown,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, StatementKind::Select)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    Scan {
        table: String,
        index: Option<String>,
    },
    Join {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    Filter {
        child: Box<PlanNode>,
    },
    Sort {
        child: Box<PlanNode>,
    },
    Limit {
        child: Box<PlanNode>,
    },
    Project {
        columns: Vec<String>,
        child: Box<PlanNode>,
    },
    Insert {
        table: String,
        columns: Vec<String>,
    },
    Update {
        table: String,
        child: Box<PlanNode>,
    },
    Delete {
        table: String,
        child: Box<PlanNode>,
    },
    Truncate {
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    pub kind: StatementKind,
    pub tables: Vec<String>,
    pub root: PlanNode,
    pub param_count: usize,
}

impl PlannedStatement {
    pub fn read_only(&self) -> bool {
        self.kind.is_read_only()
    }
}

/// Plans one SQL statement against a catalog generation.
pub trait StatementPlanner: Send + Sync {
    fn plan(&self, catalog: &Catalog, sql: &str) -> Result<PlannedStatement, String>;
}

/// Resolves every table and column a statement names against the schema and
/// picks an index for equality predicates on an index's leading column.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaPlanner;

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "AND", "OR", "NOT", "AS", "JOIN", "INNER", "LEFT", "RIGHT",
    "OUTER", "CROSS", "ON", "GROUP", "BY", "ORDER", "ASC", "DESC", "LIMIT", "OFFSET", "HAVING",
    "DISTINCT", "ALL", "IS", "NULL", "IN", "LIKE", "BETWEEN", "VALUES", "INTO", "SET", "INSERT",
    "UPSERT", "UPDATE", "DELETE", "TRUNCATE", "TABLE", "CASE", "WHEN", "THEN", "ELSE", "END",
    "TRUE", "FALSE", "EXISTS", "UNION",
];

const CLAUSE_END: &[&str] = &["WHERE", "GROUP", "ORDER", "LIMIT", "OFFSET", "HAVING", "UNION"];

fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn word_at(tokens: &[Spanned], i: usize) -> Option<String> {
    match tokens.get(i).map(|s| &s.token) {
        Some(Token::Ident(w)) => Some(w.to_ascii_uppercase()),
        _ => None,
    }
}

fn symbol_at(tokens: &[Spanned], i: usize, symbol: &str) -> bool {
    matches!(tokens.get(i).map(|s| &s.token), Some(Token::Symbol(s)) if *s == symbol)
}

struct Scope<'c> {
    /// Alias or table name -> schema.
    bindings: BTreeMap<String, &'c TableSchema>,
    tables: Vec<String>,
}

impl<'c> Scope<'c> {
    fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
            tables: Vec::new(),
        }
    }

    fn bind(&mut self, catalog: &'c Catalog, table: &str, alias: Option<String>) -> Result<(), String> {
        let schema = catalog
            .relation(table)
            .ok_or_else(|| format!("object not found: {table}"))?;
        self.bindings.insert(table.to_string(), schema);
        if let Some(alias) = alias {
            self.bindings.insert(alias, schema);
        }
        self.tables.push(table.to_string());
        Ok(())
    }

    fn has_column(&self, column: &str) -> bool {
        self.bindings.values().any(|s| s.has_column(column))
    }
}

/// Table a write statement may modify. Views are maintained by the engine.
fn write_target<'c>(catalog: &'c Catalog, table: &str) -> Result<&'c TableSchema, String> {
    if catalog.views.contains_key(table) {
        return Err(format!("Illegal to modify a materialized view: {table}"));
    }
    catalog
        .tables
        .get(table)
        .ok_or_else(|| format!("object not found: {table}"))
}

/// Index whose leading column is compared with `=` somewhere in `where_tokens`.
fn choose_index(catalog: &Catalog, table: &str, where_tokens: &[Spanned]) -> Option<String> {
    let mut equality_columns = Vec::new();
    for i in 0..where_tokens.len() {
        if let Some(word) = word_at(where_tokens, i) {
            let (column, next) = if symbol_at(where_tokens, i + 1, ".") {
                (word_at(where_tokens, i + 2), i + 3)
            } else {
                (Some(word), i + 1)
            };
            if let Some(column) = column
                && symbol_at(where_tokens, next, "=")
            {
                equality_columns.push(column);
            }
        }
    }
    catalog
        .indexes
        .values()
        .filter(|idx| idx.table == table)
        .find(|idx| {
            idx.columns
                .first()
                .is_some_and(|lead| equality_columns.contains(lead))
        })
        .map(|idx| idx.name.clone())
}

fn clause_end(tokens: &[Spanned], start: usize) -> usize {
    (start..tokens.len())
        .find(|&i| {
            word_at(tokens, i).is_some_and(|w| CLAUSE_END.contains(&w.as_str()))
                || symbol_at(tokens, i, ";")
        })
        .unwrap_or(tokens.len())
}

fn find_word(tokens: &[Spanned], start: usize, word: &str) -> Option<usize> {
    (start..tokens.len()).find(|&i| word_at(tokens, i).as_deref() == Some(word))
}

/// Binds every table named in the FROM list between `start` and `end`.
fn bind_from<'c>(
    catalog: &'c Catalog,
    tokens: &[Spanned],
    start: usize,
    end: usize,
    scope: &mut Scope<'c>,
) -> Result<(), String> {
    let mut i = start;
    let mut expect_table = true;
    while i < end {
        if expect_table {
            let table = word_at(tokens, i).ok_or("expected table name in FROM clause")?;
            i += 1;
            let mut alias = None;
            if word_at(tokens, i).as_deref() == Some("AS") {
                i += 1;
                alias = word_at(tokens, i);
                i += 1;
            } else if let Some(word) = word_at(tokens, i)
                && !is_keyword(&word)
            {
                alias = Some(word);
                i += 1;
            }
            scope.bind(catalog, &table, alias)?;
            expect_table = false;
            continue;
        }
        if symbol_at(tokens, i, ",") || word_at(tokens, i).as_deref() == Some("JOIN") {
            expect_table = true;
        }
        i += 1;
    }
    Ok(())
}

/// Checks every column reference in `tokens` against the bound tables.
fn check_columns(scope: &Scope<'_>, tokens: &[Spanned], aliases: &[String]) -> Result<(), String> {
    let mut i = 0;
    while i < tokens.len() {
        let Some(word) = word_at(tokens, i) else {
            i += 1;
            continue;
        };
        if i > 0 && word_at(tokens, i - 1).as_deref() == Some("AS") {
            i += 1;
            continue;
        }
        if symbol_at(tokens, i + 1, "(") || is_keyword(&word) {
            i += 1;
            continue;
        }
        if symbol_at(tokens, i + 1, ".") {
            let schema = scope
                .bindings
                .get(&word)
                .ok_or_else(|| format!("object not found: {word}"))?;
            if !symbol_at(tokens, i + 2, "*") {
                let column = word_at(tokens, i + 2).ok_or("expected column after '.'")?;
                if !schema.has_column(&column) {
                    return Err(format!("user lacks privilege or object not found: {word}.{column}"));
                }
            }
            i += 3;
            continue;
        }
        if scope.bindings.contains_key(&word) || aliases.contains(&word) {
            i += 1;
            continue;
        }
        if !scope.has_column(&word) {
            return Err(format!("user lacks privilege or object not found: {word}"));
        }
        i += 1;
    }
    Ok(())
}

fn select_aliases(tokens: &[Spanned]) -> Vec<String> {
    (1..tokens.len())
        .filter(|&i| word_at(tokens, i - 1).as_deref() == Some("AS"))
        .filter_map(|i| word_at(tokens, i))
        .collect()
}

fn param_count(tokens: &[Spanned]) -> usize {
    tokens.iter().filter(|s| s.token == Token::Param).count()
}

/// Number of top-level comma separated items inside the parentheses opening at `open`.
fn paren_items(tokens: &[Spanned], open: usize) -> Result<(usize, usize), String> {
    let mut depth = 0usize;
    let mut items = 1;
    for i in open..tokens.len() {
        if symbol_at(tokens, i, "(") {
            depth += 1;
        } else if symbol_at(tokens, i, ")") {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Ok((items, i));
            }
        } else if depth == 1 && symbol_at(tokens, i, ",") {
            items += 1;
        }
    }
    Err("unbalanced parentheses".into())
}

impl SchemaPlanner {
    fn plan_select(catalog: &Catalog, tokens: &[Spanned]) -> Result<(Vec<String>, PlanNode), String> {
        let from = find_word(tokens, 0, "FROM").ok_or("SELECT requires a FROM clause")?;
        let from_end = clause_end(tokens, from + 1);
        let mut scope = Scope::new();
        bind_from(catalog, tokens, from + 1, from_end, &mut scope)?;
        let aliases = select_aliases(&tokens[..from]);
        check_columns(&scope, &tokens[1..from], &aliases)?;
        check_columns(&scope, &tokens[from_end..], &aliases)?;
        // ON conditions inside the FROM clause.
        let mut on = from + 1;
        while let Some(pos) = find_word(tokens, on, "ON").filter(|p| *p < from_end) {
            let stop = (pos + 1..from_end)
                .find(|&i| word_at(tokens, i).as_deref() == Some("JOIN"))
                .unwrap_or(from_end);
            check_columns(&scope, &tokens[pos + 1..stop], &aliases)?;
            on = stop;
        }

        let where_pos = find_word(tokens, from_end, "WHERE");
        let where_tokens = match where_pos {
            Some(pos) => &tokens[pos + 1..clause_end(tokens, pos + 1)],
            None => &[][..],
        };
        let mut node: Option<PlanNode> = None;
        for table in &scope.tables {
            let scan = PlanNode::Scan {
                table: table.clone(),
                index: choose_index(catalog, table, where_tokens),
            };
            node = Some(match node {
                None => scan,
                Some(left) => PlanNode::Join {
                    left: Box::new(left),
                    right: Box::new(scan),
                },
            });
        }
        let mut node = node.ok_or("SELECT requires at least one table")?;
        if where_pos.is_some() {
            node = PlanNode::Filter {
                child: Box::new(node),
            };
        }
        if find_word(tokens, from_end, "ORDER").is_some() {
            node = PlanNode::Sort {
                child: Box::new(node),
            };
        }
        if find_word(tokens, from_end, "LIMIT").is_some() {
            node = PlanNode::Limit {
                child: Box::new(node),
            };
        }
        let projected: Vec<String> = (1..from)
            .filter_map(|i| word_at(tokens, i))
            .filter(|w| !is_keyword(w))
            .collect();
        if !symbol_at(tokens, 1, "*") && !projected.is_empty() {
            node = PlanNode::Project {
                columns: projected,
                child: Box::new(node),
            };
        }
        Ok((scope.tables, node))
    }

    fn plan_insert(catalog: &Catalog, tokens: &[Spanned]) -> Result<(Vec<String>, PlanNode), String> {
        let into = find_word(tokens, 0, "INTO").ok_or("expected INTO")?;
        let table = word_at(tokens, into + 1).ok_or("expected table name after INTO")?;
        let schema = write_target(catalog, &table)?;
        let mut i = into + 2;
        let mut columns = Vec::new();
        if symbol_at(tokens, i, "(") {
            let (_, close) = paren_items(tokens, i)?;
            for j in i + 1..close {
                if let Some(col) = word_at(tokens, j) {
                    if !schema.has_column(&col) {
                        return Err(format!("unknown column {col} in table {table}"));
                    }
                    columns.push(col);
                }
            }
            i = close + 1;
        }
        if word_at(tokens, i).as_deref() == Some("VALUES") {
            let (items, _) = paren_items(tokens, i + 1)?;
            let expected = if columns.is_empty() {
                schema.columns.len()
            } else {
                columns.len()
            };
            if items != expected {
                return Err(format!(
                    "insert into {table} supplies {items} values for {expected} columns"
                ));
            }
        } else if word_at(tokens, i).as_deref() == Some("SELECT") {
            Self::plan_select(catalog, &tokens[i..])?;
        } else {
            return Err("expected VALUES or SELECT".into());
        }
        for col in schema.columns.iter().filter(|c| !c.nullable && c.default.is_none()) {
            if !columns.is_empty() && !columns.contains(&col.name) {
                return Err(format!(
                    "column {} has no default and is not nullable",
                    col.name
                ));
            }
        }
        Ok((vec![table.clone()], PlanNode::Insert { table, columns }))
    }

    fn plan_update(catalog: &Catalog, tokens: &[Spanned]) -> Result<(Vec<String>, PlanNode), String> {
        let table = word_at(tokens, 1).ok_or("expected table name after UPDATE")?;
        write_target(catalog, &table)?;
        let mut scope = Scope::new();
        scope.bind(catalog, &table, None)?;
        let set = find_word(tokens, 2, "SET").ok_or("expected SET")?;
        check_columns(&scope, &tokens[set + 1..], &[])?;
        let where_pos = find_word(tokens, set, "WHERE");
        let where_tokens = where_pos.map(|p| &tokens[p + 1..]).unwrap_or(&[]);
        let scan = PlanNode::Scan {
            table: table.clone(),
            index: choose_index(catalog, &table, where_tokens),
        };
        let child = if where_pos.is_some() {
            PlanNode::Filter {
                child: Box::new(scan),
            }
        } else {
            scan
        };
        Ok((
            vec![table.clone()],
            PlanNode::Update {
                table,
                child: Box::new(child),
            },
        ))
    }

    fn plan_delete(catalog: &Catalog, tokens: &[Spanned]) -> Result<(Vec<String>, PlanNode), String> {
        let from = find_word(tokens, 0, "FROM").ok_or("expected FROM")?;
        let table = word_at(tokens, from + 1).ok_or("expected table name after FROM")?;
        write_target(catalog, &table)?;
        let mut scope = Scope::new();
        scope.bind(catalog, &table, None)?;
        let where_pos = find_word(tokens, from + 2, "WHERE");
        let where_tokens = where_pos.map(|p| &tokens[p + 1..]).unwrap_or(&[]);
        check_columns(&scope, where_tokens, &[])?;
        let scan = PlanNode::Scan {
            table: table.clone(),
            index: choose_index(catalog, &table, where_tokens),
        };
        let child = if where_pos.is_some() {
            PlanNode::Filter {
                child: Box::new(scan),
            }
        } else {
            scan
        };
        Ok((
            vec![table.clone()],
            PlanNode::Delete {
                table,
                child: Box::new(child),
            },
        ))
    }
}

impl StatementPlanner for SchemaPlanner {
    fn plan(&self, catalog: &Catalog, sql: &str) -> Result<PlannedStatement, String> {
        let kind = StatementKind::classify(sql);
        let tokens = tokenize(sql)?;
        let (tables, root) = match kind {
            StatementKind::Select => Self::plan_select(catalog, &tokens)?,
            StatementKind::Insert | StatementKind::Upsert => Self::plan_insert(catalog, &tokens)?,
            StatementKind::Update => Self::plan_update(catalog, &tokens)?,
            StatementKind::Delete => Self::plan_delete(catalog, &tokens)?,
            StatementKind::Truncate => {
                let pos = if word_at(&tokens, 1).as_deref() == Some("TABLE") { 2 } else { 1 };
                let table = word_at(&tokens, pos).ok_or("expected table name after TRUNCATE")?;
                write_target(catalog, &table)?;
                (vec![table.clone()], PlanNode::Truncate { table })
            }
            StatementKind::Ddl => {
                return Err("DDL cannot be planned as a procedure statement".into());
            }
            StatementKind::Unknown => return Err(format!("unrecognized statement: {sql}")),
        };
        Ok(PlannedStatement {
            kind,
            tables,
            root,
            param_count: param_count(&tokens),
        })
    }
}
