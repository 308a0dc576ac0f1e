// ABOUTME: Schema comparator - emits CREATE, DROP and ALTER TABLE text for the sink
// ABOUTME: DDL is only rendered here, never executed

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use super::translate::column_definition;
use super::{Database, Table};

const DROP_WARNING: &str =
    "-- Warning! Dropping table! Note that a table rename becomes a drop+create!\n";

/// Tables on the sink only become DROPs, tables on the source only become CREATEs.
///
/// Names are compared case-insensitively. Returns the DDL text and whether
/// anything was emitted.
pub fn find_creates_and_drops(from: &Database, to: &Database) -> (String, bool) {
    let mut out = String::new();
    let mut changed = false;

    let from_names: HashSet<String> = from
        .table_names()
        .iter()
        .map(|n| n.to_lowercase())
        .collect();
    let to_names: HashSet<String> = to.table_names().iter().map(|n| n.to_lowercase()).collect();

    let mut drop_found = false;
    for name in to.table_names() {
        if !from_names.contains(&name.to_lowercase()) {
            if !drop_found {
                out.push_str(DROP_WARNING);
                drop_found = true;
            }
            let _ = writeln!(
                out,
                "DROP TABLE {}{};",
                to.schema_prefix(),
                to.dialect().quote_identifier(name)
            );
            changed = true;
        }
    }

    for table in from.tables() {
        if !to_names.contains(&table.name.to_lowercase()) {
            out.push_str(&create_table(table, to));
            changed = true;
        }
    }

    (out, changed)
}

/// `CREATE TABLE` for a source table, rendered in the sink's dialect.
pub fn create_table(table: &Table, to: &Database) -> String {
    let dialect = to.dialect();
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_definition(c, dialect))
        .collect();
    if !table.primary_key.is_empty() {
        let keys: Vec<String> = table
            .primary_key
            .iter()
            .map(|k| dialect.quote_identifier(k))
            .collect();
        parts.push(format!("PRIMARY KEY ({})", keys.join(", ")));
    }
    format!(
        "CREATE TABLE {}{} ({});\n",
        to.schema_prefix(),
        dialect.quote_identifier(&table.name),
        parts.join(", ")
    )
}

/// Columns present on the source but missing on the sink (case-sensitive)
/// become `ALTER TABLE ... ADD COLUMN`.
pub fn table_definition(from: &Table, to: &Table) -> (String, bool) {
    let mut out = String::new();
    let dialect = to.dialect();
    for column in &from.columns {
        if to.column(&column.name).is_none() {
            let _ = writeln!(
                out,
                "ALTER TABLE {} {} {};",
                to.qualified_name(),
                dialect.add_column_keyword(),
                column_definition(column, dialect)
            );
        }
    }
    let changed = !out.is_empty();
    (out, changed)
}

/// Pairs of tables present in both databases, in source order.
pub fn tables_in_both(from: &Database, to: &Database) -> Vec<(Arc<Table>, Arc<Table>)> {
    from.tables()
        .iter()
        .filter_map(|f| to.table(&f.name).map(|t| (f.clone(), t)))
        .collect()
}

/// All DDL needed to bring the sink schema in line with the source.
pub fn compare_schemas(from: &Database, to: &Database) -> (String, bool) {
    let (mut out, mut changed) = find_creates_and_drops(from, to);
    for (source, sink) in tables_in_both(from, to) {
        let (ddl, table_changed) = table_definition(&source, &sink);
        out.push_str(&ddl);
        changed |= table_changed;
    }
    (out, changed)
}
