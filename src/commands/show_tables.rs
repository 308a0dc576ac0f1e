// ABOUTME: show-source-tables and show-sink-tables - list tables with size estimates
// ABOUTME: Tables are listed smallest first, the order bulk sync uses

use anyhow::Result;

use crate::config::DatabaseConfig;
use crate::schema::{Database, Table};
use crate::utils::{right_pad, size_hr};

/// One listing line: `n/total name  size  rows (pk)`.
pub fn format_table_line(index: usize, total: usize, table: &Table, name_width: usize) -> String {
    let size = size_hr(u64::try_from(table.approx_disk_kb.max(0)).unwrap_or(0) * 1024);
    format!(
        "{}/{} {}  {}  {} ({})",
        index,
        total,
        right_pad(&table.name, name_width),
        right_pad(&size, 15),
        right_pad(&format!("{} c.rows ", table.approx_rows), 15),
        table.primary_key.join(",")
    )
}

/// Lines for every table of `db`, smallest on disk first.
pub fn table_listing(db: &Database) -> Vec<String> {
    let mut tables = db.tables().to_vec();
    tables.sort_by_key(|t| t.approx_disk_kb);
    let total = tables.len();
    tables
        .iter()
        .enumerate()
        .map(|(i, t)| format_table_line(i + 1, total, t, db.max_table_name_length()))
        .collect()
}

pub async fn show_tables(config: &DatabaseConfig) -> Result<()> {
    let db = Database::open(config, "").await?;
    for line in table_listing(&db) {
        println!("{}", line);
    }
    Ok(())
}
