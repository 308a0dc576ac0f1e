// ABOUTME: Catalog queries - tables, columns, primary keys and size metrics per dialect
// ABOUTME: Reads information_schema everywhere, vendor catalogs for size estimates

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{require_primary_key, schema_prefix, translate, Column, Table};
use crate::config::DatabaseConfig;
use crate::db::{Connector, Dialect, TextRow};

/// Base table names in `schema`.
pub async fn list_tables(conn: &dyn Connector, schema: &str) -> Result<Vec<String>> {
    let dialect = conn.dialect();
    let sql = format!(
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = '{}' AND table_type = 'BASE TABLE'",
        dialect.escape_literal(schema)
    );
    let rows = conn
        .query(&sql)
        .await
        .with_context(|| format!("Failed to list tables of {}", conn.name()))?;
    Ok(rows.into_iter().filter_map(|row| first(row)).collect())
}

/// Load one table's columns, primary key and metrics.
pub async fn load_table(
    conn: Arc<dyn Connector>,
    config: &DatabaseConfig,
    schema: &str,
    name: &str,
) -> Result<Table> {
    let dialect = conn.dialect();
    let columns = load_columns(conn.as_ref(), schema, name).await?;
    let primary_key = load_primary_key(conn.as_ref(), schema, name).await?;
    require_primary_key(name, &primary_key)?;

    let prefix = schema_prefix(dialect, &config.schema);
    let mut table = Table::new(name, columns, primary_key, prefix, conn.clone());

    match load_metrics(conn.as_ref(), schema, name).await {
        Ok((rows, kb)) => {
            table.approx_rows = rows;
            table.approx_disk_kb = kb;
        }
        Err(e) => {
            tracing::warn!("(table) no size metrics for {}: {:#}", name, e);
            table.approx_rows = table.exact_row_count().await?;
        }
    }
    Ok(table)
}

async fn load_columns(conn: &dyn Connector, schema: &str, table: &str) -> Result<Vec<Column>> {
    let dialect = conn.dialect();
    let type_column = match dialect {
        Dialect::Postgres => "udt_name",
        _ => "data_type",
    };
    let sql = format!(
        "SELECT column_name, {}, is_nullable, column_default, character_maximum_length \
         FROM information_schema.columns \
         WHERE table_schema = '{}' AND table_name = '{}' \
         ORDER BY ordinal_position",
        type_column,
        dialect.escape_literal(schema),
        dialect.escape_literal(table)
    );
    let rows = conn
        .query(&sql)
        .await
        .with_context(|| format!("Failed to read columns of {}", table))?;

    Ok(rows
        .into_iter()
        .filter_map(|row| column_from_row(dialect, row))
        .collect())
}

fn column_from_row(dialect: Dialect, mut row: TextRow) -> Option<Column> {
    row.resize(5, None);
    let name = row[0].take()?;
    let type_name = row[1].take().unwrap_or_default();
    let not_null = row[2]
        .as_deref()
        .map(|n| n.eq_ignore_ascii_case("NO"))
        .unwrap_or(false);
    let default_value = row[3]
        .as_deref()
        .and_then(|raw| translate::normalize_default(dialect, raw));
    let size = row[4]
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .unwrap_or(0);
    Some(Column::new(&name, &type_name, dialect, not_null, default_value, size))
}

async fn load_primary_key(conn: &dyn Connector, schema: &str, table: &str) -> Result<Vec<String>> {
    let dialect = conn.dialect();
    let sql = format!(
        "SELECT kcu.column_name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
           ON tc.constraint_name = kcu.constraint_name \
          AND tc.table_schema = kcu.table_schema \
          AND tc.table_name = kcu.table_name \
         WHERE tc.constraint_type = 'PRIMARY KEY' \
           AND tc.table_schema = '{}' AND tc.table_name = '{}' \
         ORDER BY kcu.ordinal_position",
        dialect.escape_literal(schema),
        dialect.escape_literal(table)
    );
    let rows = conn
        .query(&sql)
        .await
        .with_context(|| format!("Failed to read primary key of {}", table))?;
    Ok(rows.into_iter().filter_map(|row| first(row)).collect())
}

/// Approximate `(rows, disk kB)` from vendor statistics.
async fn load_metrics(conn: &dyn Connector, schema: &str, table: &str) -> Result<(i64, i64)> {
    let dialect = conn.dialect();
    let schema = dialect.escape_literal(schema);
    let table = dialect.escape_literal(table);
    let sql = match dialect {
        Dialect::Mysql | Dialect::MariaDb => format!(
            "SELECT table_rows, (data_length + index_length) / 1024 \
             FROM information_schema.tables \
             WHERE table_schema = '{}' AND table_name = '{}'",
            schema, table
        ),
        Dialect::Postgres => format!(
            "SELECT GREATEST(c.reltuples, 0)::bigint, pg_total_relation_size(c.oid) / 1024 \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = '{}' AND c.relname = '{}'",
            schema, table
        ),
        Dialect::SqlServer => format!(
            "SELECT SUM(CASE WHEN i.index_id < 2 THEN p.rows ELSE 0 END), SUM(a.total_pages) * 8 \
             FROM sys.tables t \
             JOIN sys.schemas s ON s.schema_id = t.schema_id \
             JOIN sys.indexes i ON i.object_id = t.object_id \
             JOIN sys.partitions p ON p.object_id = i.object_id AND p.index_id = i.index_id \
             JOIN sys.allocation_units a ON a.container_id = p.partition_id \
             WHERE s.name = '{}' AND t.name = '{}'",
            schema, table
        ),
    };

    let rows = conn.query(&sql).await?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("no statistics row"))?;
    Ok((parse_metric(row.first()), parse_metric(row.get(1))))
}

fn parse_metric(value: Option<&Option<String>>) -> i64 {
    value
        .and_then(|v| v.as_deref())
        .and_then(|v| v.trim().split('.').next())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}

fn first(row: TextRow) -> Option<String> {
    row.into_iter().next().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;
    use crate::testing::{text, FakeConnector};

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            name: "src".to_string(),
            url: url.to_string(),
            schema: String::new(),
            ignored_tables: vec![],
            accept_invalid_certs: false,
        }
    }

    #[tokio::test]
    async fn test_load_table_postgres() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Postgres));
        conn.push_response(vec![
            vec![text("id"), text("int8"), text("NO"), text("nextval('orders_id_seq'::regclass)"), None],
            vec![text("note"), text("varchar"), text("YES"), text("'none'::character varying"), text("80")],
        ]);
        conn.push_response(vec![vec![text("id")]]);
        conn.push_response(vec![vec![text("1200"), text("96")]]);

        let table = load_table(conn.clone(), &config("postgresql://h/db"), "public", "orders")
            .await
            .unwrap();
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.columns[0].sql_type, SqlType::BigInt);
        assert!(table.columns[0].not_null);
        assert_eq!(table.columns[1].default_value.as_deref(), Some("none"));
        assert_eq!(table.columns[1].size, 80);
        assert!(table.has_integer_primary_key());
        assert_eq!(table.approx_rows, 1200);
        assert_eq!(table.approx_disk_kb, 96);

        let queries = conn.queries();
        assert!(queries[0].contains("udt_name"));
        assert!(queries[0].contains("table_name = 'orders'"));
    }

    #[tokio::test]
    async fn test_missing_primary_key_is_fatal() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Mysql));
        conn.push_response(vec![vec![text("v"), text("int"), text("YES"), None, None]]);
        conn.push_response(vec![]);

        let err = load_table(conn, &config("mysql://h/db"), "db", "log")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("primary key"));
    }

    #[tokio::test]
    async fn test_catalog_literals_are_escaped() {
        let conn = FakeConnector::new("src", Dialect::Mysql);
        list_tables(&conn, "o'reilly").await.unwrap();
        assert!(conn.queries()[0].contains("'o''reilly'"));
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric(Some(&text("42.0000"))), 42);
        assert_eq!(parse_metric(Some(&None)), 0);
        assert_eq!(parse_metric(None), 0);
    }
}
