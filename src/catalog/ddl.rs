//! DDL dialect accepted in catalog artifacts and ad hoc schema changes.

use crate::catalog::schema::{ColumnDef, ProcedureSource, TableAlteration, ViewExpr};
use crate::catalog::types::ColumnType;
use crate::catalog::{DdlOperation, procedure_name_for_class};
use crate::error::LivecatError;
use crate::permission::Permission;
use crate::sql::{Token, TokenCursor, split_statements};
use std::collections::BTreeSet;

const DEFAULT_VARIABLE_LENGTH: u32 = 1024;

pub fn parse_script(script: &str) -> Result<Vec<DdlOperation>, LivecatError> {
    split_statements(script)
        .iter()
        .map(|stmt| parse_statement(stmt))
        .collect()
}

/// True when the statement starts with a schema-changing keyword.
pub fn is_ddl(sql: &str) -> bool {
    let first = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    matches!(first.as_str(), "CREATE" | "DROP" | "PARTITION" | "ALTER")
}

pub fn parse_statement(stmt: &str) -> Result<DdlOperation, LivecatError> {
    let mut cursor = TokenCursor::new(stmt).map_err(LivecatError::Ddl)?;
    let op = parse_inner(&mut cursor, stmt)
        .map_err(|reason| LivecatError::Ddl(format!("{reason} in statement: {stmt}")))?;
    Ok(op)
}

fn parse_inner(cursor: &mut TokenCursor<'_>, stmt: &str) -> Result<DdlOperation, String> {
    if cursor.eat_keyword("CREATE") {
        if cursor.eat_keyword("TABLE") {
            return parse_create_table(cursor);
        }
        if cursor.eat_keyword("UNIQUE") {
            cursor.expect_keyword("INDEX")?;
            return parse_create_index(cursor, true);
        }
        if cursor.eat_keyword("INDEX") {
            return parse_create_index(cursor, false);
        }
        if cursor.eat_keyword("ROLE") {
            return parse_create_role(cursor);
        }
        if cursor.eat_keyword("PROCEDURE") {
            return parse_create_procedure(cursor);
        }
        if cursor.eat_keyword("VIEW") {
            return parse_create_view(cursor);
        }
        return Err(format!(
            "unsupported CREATE target {}",
            cursor.describe_next()
        ));
    }
    if cursor.eat_keyword("DROP") {
        return parse_drop(cursor);
    }
    if cursor.eat_keyword("PARTITION") {
        cursor.expect_keyword("TABLE")?;
        let table = upper_ident(cursor)?;
        cursor.expect_keyword("ON")?;
        cursor.expect_keyword("COLUMN")?;
        let column = upper_ident(cursor)?;
        expect_end(cursor)?;
        return Ok(DdlOperation::PartitionTable { table, column });
    }
    if cursor.eat_keyword("ALTER") {
        return parse_alter_table(cursor);
    }
    Err(format!(
        "unsupported DDL statement starting with {}",
        stmt.split_whitespace().next().unwrap_or("")
    ))
}

fn upper_ident(cursor: &mut TokenCursor<'_>) -> Result<String, String> {
    Ok(cursor.expect_ident()?.to_ascii_uppercase())
}

fn expect_end(cursor: &mut TokenCursor<'_>) -> Result<(), String> {
    cursor.eat_symbol(";");
    if cursor.is_done() {
        Ok(())
    } else {
        Err(format!("unexpected trailing {}", cursor.describe_next()))
    }
}

fn parse_if_exists(cursor: &mut TokenCursor<'_>) -> Result<bool, String> {
    if cursor.eat_keyword("IF") {
        cursor.expect_keyword("EXISTS")?;
        return Ok(true);
    }
    Ok(false)
}

fn parse_column_list(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>, String> {
    cursor.expect_symbol("(")?;
    let mut cols = vec![upper_ident(cursor)?];
    while cursor.eat_symbol(",") {
        cols.push(upper_ident(cursor)?);
    }
    cursor.expect_symbol(")")?;
    Ok(cols)
}

fn parse_length(cursor: &mut TokenCursor<'_>) -> Result<u32, String> {
    if !cursor.eat_symbol("(") {
        return Ok(DEFAULT_VARIABLE_LENGTH);
    }
    let raw = cursor.expect_number()?;
    let len: u32 = raw
        .parse()
        .map_err(|_| format!("invalid length {raw}"))?;
    if len == 0 {
        return Err("column length must be positive".into());
    }
    cursor.eat_keyword("BYTES");
    cursor.expect_symbol(")")?;
    Ok(len)
}

fn parse_type(cursor: &mut TokenCursor<'_>) -> Result<ColumnType, String> {
    let name = cursor.expect_ident()?.to_ascii_uppercase();
    let col_type = match name.as_str() {
        "TINYINT" => ColumnType::TinyInt,
        "SMALLINT" => ColumnType::SmallInt,
        "INTEGER" | "INT" => ColumnType::Integer,
        "BIGINT" => ColumnType::BigInt,
        "FLOAT" => ColumnType::Float,
        "DECIMAL" => ColumnType::Decimal,
        "TIMESTAMP" => ColumnType::Timestamp,
        "VARCHAR" => ColumnType::Varchar(parse_length(cursor)?),
        "VARBINARY" => ColumnType::Varbinary(parse_length(cursor)?),
        other => return Err(format!("unknown column type {other}")),
    };
    Ok(col_type)
}

fn parse_default_literal(cursor: &mut TokenCursor<'_>) -> Result<Option<String>, String> {
    match cursor.next_token() {
        Some(Token::Str(s)) => Ok(Some(format!("'{}'", s.replace('\'', "''")))),
        Some(Token::Number(n)) => Ok(Some(n)),
        Some(Token::Symbol("-")) => Ok(Some(format!("-{}", cursor.expect_number()?))),
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NULL") => Ok(None),
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("NOW") => Ok(Some("NOW".into())),
        other => Err(format!("invalid DEFAULT value {other:?}")),
    }
}

/// Column definition plus whether it carried inline PRIMARY KEY / UNIQUE.
fn parse_column_def(cursor: &mut TokenCursor<'_>) -> Result<(ColumnDef, bool, bool), String> {
    let name = upper_ident(cursor)?;
    let col_type = parse_type(cursor)?;
    let mut col = ColumnDef {
        name,
        col_type,
        nullable: true,
        default: None,
    };
    let mut primary = false;
    let mut unique = false;
    loop {
        if cursor.eat_keyword("NOT") {
            cursor.expect_keyword("NULL")?;
            col.nullable = false;
        } else if cursor.eat_keyword("NULL") {
            col.nullable = true;
        } else if cursor.eat_keyword("DEFAULT") {
            col.default = parse_default_literal(cursor)?;
        } else if cursor.eat_keyword("PRIMARY") {
            cursor.expect_keyword("KEY")?;
            primary = true;
            col.nullable = false;
        } else if cursor.eat_keyword("UNIQUE") {
            unique = true;
        } else {
            break;
        }
    }
    Ok((col, primary, unique))
}

fn parse_create_table(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    let mut if_not_exists = false;
    if cursor.eat_keyword("IF") {
        cursor.expect_keyword("NOT")?;
        cursor.expect_keyword("EXISTS")?;
        if_not_exists = true;
    }
    let name = upper_ident(cursor)?;
    cursor.expect_symbol("(")?;
    let mut columns = Vec::new();
    let mut primary_key: Vec<String> = Vec::new();
    let mut unique = Vec::new();
    loop {
        if cursor.eat_keyword("CONSTRAINT") {
            cursor.expect_ident()?;
        }
        if cursor.eat_keyword("PRIMARY") {
            cursor.expect_keyword("KEY")?;
            if !primary_key.is_empty() {
                return Err(format!("table {name} declares more than one primary key"));
            }
            primary_key = parse_column_list(cursor)?;
        } else if cursor.eat_keyword("UNIQUE") {
            unique.push(parse_column_list(cursor)?);
        } else {
            let (col, inline_pk, inline_unique) = parse_column_def(cursor)?;
            if inline_pk {
                if !primary_key.is_empty() {
                    return Err(format!("table {name} declares more than one primary key"));
                }
                primary_key = vec![col.name.clone()];
            }
            if inline_unique {
                unique.push(vec![col.name.clone()]);
            }
            columns.push(col);
        }
        if cursor.eat_symbol(",") {
            continue;
        }
        cursor.expect_symbol(")")?;
        break;
    }
    expect_end(cursor)?;
    Ok(DdlOperation::CreateTable {
        name,
        columns,
        primary_key,
        unique,
        if_not_exists,
    })
}

fn parse_create_index(cursor: &mut TokenCursor<'_>, unique: bool) -> Result<DdlOperation, String> {
    let mut if_not_exists = false;
    if cursor.eat_keyword("IF") {
        cursor.expect_keyword("NOT")?;
        cursor.expect_keyword("EXISTS")?;
        if_not_exists = true;
    }
    let name = upper_ident(cursor)?;
    cursor.expect_keyword("ON")?;
    let table = upper_ident(cursor)?;
    let columns = parse_column_list(cursor)?;
    expect_end(cursor)?;
    Ok(DdlOperation::CreateIndex {
        name,
        table,
        columns,
        unique,
        if_not_exists,
    })
}

fn parse_create_role(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    let name = upper_ident(cursor)?;
    let mut permissions = BTreeSet::new();
    if cursor.eat_keyword("WITH") {
        loop {
            let raw = cursor.expect_ident()?;
            let perm =
                Permission::parse(&raw).ok_or_else(|| format!("unknown permission {raw}"))?;
            permissions.insert(perm);
            if !cursor.eat_symbol(",") {
                break;
            }
        }
    }
    expect_end(cursor)?;
    Ok(DdlOperation::CreateRole { name, permissions })
}

fn parse_allow(cursor: &mut TokenCursor<'_>) -> Result<BTreeSet<String>, String> {
    let mut roles = BTreeSet::new();
    if cursor.eat_keyword("ALLOW") {
        roles.insert(upper_ident(cursor)?);
        while cursor.eat_symbol(",") {
            roles.insert(upper_ident(cursor)?);
        }
    }
    Ok(roles)
}

fn parse_create_procedure(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    if cursor.peek_keyword("ALLOW") || cursor.peek_keyword("FROM") {
        let allowed_roles = parse_allow(cursor)?;
        cursor.expect_keyword("FROM")?;
        cursor.expect_keyword("CLASS")?;
        let class_name = cursor.expect_qualified_name()?;
        expect_end(cursor)?;
        return Ok(DdlOperation::CreateProcedure {
            name: procedure_name_for_class(&class_name),
            source: ProcedureSource::Class { class_name },
            allowed_roles,
        });
    }
    let name = cursor.expect_ident()?;
    let allowed_roles = parse_allow(cursor)?;
    cursor.expect_keyword("AS")?;
    let sql = cursor.rest_source().trim_end_matches(';').trim().to_string();
    if sql.is_empty() {
        return Err(format!("procedure {name} has an empty statement"));
    }
    Ok(DdlOperation::CreateProcedure {
        name,
        source: ProcedureSource::Statement { sql },
        allowed_roles,
    })
}

fn parse_drop(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    let kind = cursor.expect_ident()?.to_ascii_uppercase();
    let mut if_exists = parse_if_exists(cursor)?;
    let name = match kind.as_str() {
        "PROCEDURE" => cursor.expect_qualified_name()?,
        "TABLE" | "INDEX" | "ROLE" | "VIEW" => upper_ident(cursor)?,
        other => return Err(format!("unsupported DROP target {other}")),
    };
    if !if_exists {
        if_exists = parse_if_exists(cursor)?;
    }
    expect_end(cursor)?;
    Ok(match kind.as_str() {
        "TABLE" => DdlOperation::DropTable { name, if_exists },
        "INDEX" => DdlOperation::DropIndex { name, if_exists },
        "ROLE" => DdlOperation::DropRole { name, if_exists },
        "VIEW" => DdlOperation::DropView { name, if_exists },
        _ => DdlOperation::DropProcedure { name, if_exists },
    })
}

/// One select-list item of a view plus its `AS` alias.
fn parse_view_expr(cursor: &mut TokenCursor<'_>) -> Result<(ViewExpr, Option<String>), String> {
    let word = upper_ident(cursor)?;
    let expr = if cursor.eat_symbol("(") {
        let expr = match word.as_str() {
            "COUNT" if cursor.eat_symbol("*") => ViewExpr::CountStar,
            "COUNT" => ViewExpr::Count(upper_ident(cursor)?),
            "SUM" => ViewExpr::Sum(upper_ident(cursor)?),
            "MIN" => ViewExpr::Min(upper_ident(cursor)?),
            "MAX" => ViewExpr::Max(upper_ident(cursor)?),
            other => {
                return Err(format!(
                    "view columns must be group keys or COUNT, SUM, MIN, MAX aggregates, found {other}"
                ));
            }
        };
        cursor.expect_symbol(")")?;
        expr
    } else {
        ViewExpr::Column(word)
    };
    let alias = if cursor.eat_keyword("AS") {
        Some(upper_ident(cursor)?)
    } else {
        None
    };
    Ok((expr, alias))
}

fn parse_create_view(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    let name = upper_ident(cursor)?;
    let declared = if matches!(cursor.peek(), Some(Token::Symbol("("))) {
        parse_column_list(cursor)?
    } else {
        Vec::new()
    };
    cursor.expect_keyword("AS")?;
    cursor.expect_keyword("SELECT")?;
    let mut items = vec![parse_view_expr(cursor)?];
    while cursor.eat_symbol(",") {
        items.push(parse_view_expr(cursor)?);
    }
    cursor.expect_keyword("FROM")?;
    let source_table = upper_ident(cursor)?;
    let mut filter = None;
    if cursor.eat_keyword("WHERE") {
        let start = cursor.source_offset();
        while !cursor.is_done()
            && !cursor.peek_keyword("GROUP")
            && !matches!(cursor.peek(), Some(Token::Symbol(";")))
        {
            if cursor.next_token() == Some(Token::Param) {
                return Err(format!(
                    "view {name} contains placeholders (?), which are not allowed in a view"
                ));
            }
        }
        let text = cursor.source_since(start);
        if text.is_empty() {
            return Err(format!("view {name} has an empty WHERE clause"));
        }
        filter = Some(text.to_string());
    }
    let mut group_by = Vec::new();
    if cursor.eat_keyword("GROUP") {
        cursor.expect_keyword("BY")?;
        group_by.push(upper_ident(cursor)?);
        while cursor.eat_symbol(",") {
            group_by.push(upper_ident(cursor)?);
        }
    }
    expect_end(cursor)?;
    let columns = if declared.is_empty() {
        items
            .iter()
            .enumerate()
            .map(|(i, (expr, alias))| match (alias, expr) {
                (Some(alias), _) => Ok(alias.clone()),
                (None, ViewExpr::Column(column)) => Ok(column.clone()),
                (None, other) => Err(format!("view {name} column {} ({other}) needs a name", i + 1)),
            })
            .collect::<Result<Vec<_>, _>>()?
    } else if declared.len() != items.len() {
        return Err(format!(
            "view {name} declares {} columns but selects {}",
            declared.len(),
            items.len()
        ));
    } else {
        declared
    };
    Ok(DdlOperation::CreateView {
        name,
        columns,
        exprs: items.into_iter().map(|(expr, _)| expr).collect(),
        source_table,
        filter,
        group_by,
    })
}

fn parse_alter_table(cursor: &mut TokenCursor<'_>) -> Result<DdlOperation, String> {
    cursor.expect_keyword("TABLE")?;
    let table = upper_ident(cursor)?;
    let alteration = if cursor.eat_keyword("ADD") {
        cursor.eat_keyword("COLUMN");
        let (col, primary, unique) = parse_column_def(cursor)?;
        if primary || unique {
            return Err("constraints cannot be added with ALTER TABLE ADD COLUMN".into());
        }
        TableAlteration::AddColumn(col)
    } else if cursor.eat_keyword("DROP") {
        cursor.eat_keyword("COLUMN");
        TableAlteration::DropColumn {
            name: upper_ident(cursor)?,
        }
    } else if cursor.eat_keyword("ALTER") {
        cursor.eat_keyword("COLUMN");
        let (col, primary, unique) = parse_column_def(cursor)?;
        if primary || unique {
            return Err("constraints cannot be changed with ALTER COLUMN".into());
        }
        TableAlteration::AlterColumn(col)
    } else {
        return Err(format!(
            "expected ADD, DROP or ALTER, found {}",
            cursor.describe_next()
        ));
    };
    expect_end(cursor)?;
    Ok(DdlOperation::AlterTable { table, alteration })
}
