// ABOUTME: Type translator - maps type names and default literals across dialects
// ABOUTME: Renders column definitions for CREATE TABLE and ALTER TABLE ADD

use super::Column;
use crate::db::Dialect;

/// Type name to use on `to` for a column read from `column.dialect`.
///
/// Only Postgres integer aliases need translating, every other name is
/// passed through unchanged.
pub fn translate_type(column: &Column, to: Dialect) -> String {
    if column.dialect == Dialect::Postgres && to != Dialect::Postgres {
        match column.type_name.as_str() {
            "int8" => return "BIGINT".to_string(),
            "int4" => return "INT".to_string(),
            "int2" => return "SMALLINT".to_string(),
            _ => {}
        }
    }
    column.type_name.clone()
}

/// Strip vendor decorations from a catalog default value.
///
/// Returns `None` when the column has no usable default (including
/// sequence-backed defaults, which only exist on the source).
pub fn normalize_default(dialect: Dialect, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let value = match dialect {
        Dialect::Postgres => {
            if raw.starts_with("nextval(") {
                return None;
            }
            strip_postgres_cast(raw)
        }
        Dialect::SqlServer => strip_sqlserver_parens(raw),
        Dialect::Mysql | Dialect::MariaDb => {
            if raw.eq_ignore_ascii_case("NULL") {
                return None;
            }
            strip_quotes(raw).to_string()
        }
    };
    Some(value)
}

fn strip_postgres_cast(raw: &str) -> String {
    let mut value = raw;
    if let Some(inner) = value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        value = inner.trim();
    }
    let literal = value.split("::").next().unwrap_or("").trim();
    strip_quotes(literal).to_string()
}

/// `((0))` -> `0`, `('abc')` -> `abc`.
fn strip_sqlserver_parens(raw: &str) -> String {
    let mut value = strip_parens(raw);
    if let Some(inner) = value.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        value = inner;
    } else {
        value = strip_quotes(value);
    }
    value.to_string()
}

fn strip_parens(value: &str) -> &str {
    value
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .unwrap_or(value)
}

fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Function call or SQL keyword defaults are emitted verbatim.
fn is_expression_default(value: &str) -> bool {
    const KEYWORDS: [&str; 4] = [
        "CURRENT_TIMESTAMP",
        "CURRENT_DATE",
        "CURRENT_TIME",
        "LOCALTIMESTAMP",
    ];
    if KEYWORDS.iter().any(|k| value.eq_ignore_ascii_case(k)) {
        return true;
    }
    match value.find('(') {
        Some(open) => {
            value.ends_with(')')
                && open > 0
                && value[..open]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// `"name" TYPE(size) NOT NULL DEFAULT 'x'` in the `to` dialect.
pub fn column_definition(column: &Column, to: Dialect) -> String {
    let mut out = format!(
        "{} {}",
        to.quote_identifier(&column.name),
        translate_type(column, to)
    );

    if column.sql_type.uses_size() {
        if column.size > 0 {
            out.push_str(&format!("({})", column.size));
        } else if column.size == -1 && to == Dialect::SqlServer {
            out.push_str("(max)");
        }
    }

    if column.not_null {
        out.push_str(" NOT NULL");
    }

    if let Some(default) = &column.default_value {
        if column.sql_type.default_needs_quotes() && !is_expression_default(default) {
            out.push_str(&format!(" DEFAULT '{}'", to.escape_literal(default)));
        } else {
            out.push_str(&format!(" DEFAULT {}", default));
        }
    }
    out
}
