// ABOUTME: Row fetcher - reads the rows of one key range as encoded literals
// ABOUTME: Columns are selected by name following the source table's column order

use anyhow::{Context, Result};

use super::chunk::KeyRange;
use super::value::encode;
use crate::db::Dialect;
use crate::error::SyncError;
use crate::schema::{Column, ColumnKind, SqlType, Table};

/// One fetched row, values already encoded as target literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Leading primary key column
    pub primary_key: i64,
    /// Remaining primary key columns as literals, empty for single-column keys
    pub key_rest: Vec<Option<String>>,
    pub columns: Vec<Option<String>>,
}

impl Row {
    pub fn new(primary_key: i64, columns: Vec<Option<String>>) -> Self {
        Self {
            primary_key,
            key_rest: Vec::new(),
            columns,
        }
    }

    /// Merge order of rows within one fetch.
    pub fn sort_key(&self) -> (i64, &[Option<String>]) {
        (self.primary_key, &self.key_rest)
    }
}

/// Build the range query for `table` selecting `reference` columns by name.
///
/// The range applies to the leading primary key column; rows are ordered by
/// the full key.
///
/// Fails with [`SyncError::ShapeMismatch`] when a reference column is absent
/// and with [`SyncError::UnsupportedType`] when one cannot be encoded.
pub fn build_fetch_query(
    table: &Table,
    range: &KeyRange,
    reference: &[Column],
) -> Result<String, SyncError> {
    let dialect = table.dialect();
    let mut select = Vec::with_capacity(reference.len() + 1);
    let key = table.quoted_key_column();
    select.push(dialect.cast_bigint(&key));

    for column in reference {
        if column.kind() == ColumnKind::Unsupported {
            return Err(SyncError::UnsupportedType {
                table: table.name.clone(),
                column: column.name.clone(),
                type_name: column.type_name.clone(),
            });
        }
        let local = table.column(&column.name).ok_or_else(|| SyncError::ShapeMismatch {
            table: table.name.clone(),
            detail: format!(
                "column {} missing in {}",
                column.name,
                table.database_name()
            ),
        })?;

        let quoted = table.quote(&local.name);
        if dialect == Dialect::Postgres && local.sql_type == SqlType::Boolean {
            select.push(format!("CAST({} AS INT)", quoted));
        } else {
            select.push(quoted);
        }
    }

    Ok(format!(
        "SELECT {} FROM {} WHERE {} >= {} AND {} <= {} ORDER BY {}",
        select.join(", "),
        table.qualified_name(),
        key,
        range.from,
        key,
        range.to,
        table.quoted_primary_key()
    ))
}

/// Fetch the rows of `range`, ascending by key, encoded for `target`.
pub async fn fetch(
    table: &Table,
    range: &KeyRange,
    reference: &[Column],
    target: Dialect,
) -> Result<Vec<Row>> {
    let sql = build_fetch_query(table, range, reference)?;
    let rows = table
        .connector()
        .query(&sql)
        .await
        .with_context(|| format!("Failed to fetch {} [{}..{}]", table.name, range.from, range.to))?;

    // Positions of the trailing key columns among the reference columns
    let rest_positions: Vec<Option<usize>> = table
        .primary_key
        .iter()
        .skip(1)
        .map(|name| reference.iter().position(|c| &c.name == name))
        .collect();

    let mut fetched = Vec::with_capacity(rows.len());
    for mut raw in rows {
        let key_text = raw.first().cloned().flatten().unwrap_or_default();
        let primary_key = key_text.trim().parse::<i64>().map_err(|_| SyncError::InvalidKey {
            table: table.name.clone(),
            value: key_text.clone(),
        })?;

        raw.resize(reference.len() + 1, None);
        let columns: Vec<Option<String>> = reference
            .iter()
            .zip(raw.into_iter().skip(1))
            .map(|(column, value)| value.map(|v| encode(column.sql_type, &v, target)))
            .collect();
        let key_rest = rest_positions
            .iter()
            .map(|pos| pos.and_then(|i| columns[i].clone()))
            .collect();
        fetched.push(Row {
            primary_key,
            key_rest,
            columns,
        });
    }
    if !rest_positions.is_empty() {
        fetched.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{orders_table, text, FakeConnector};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_encodes_by_kind() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Mysql));
        conn.push_response(vec![
            vec![text("1"), text("1"), text("O'Neil"), text("10.0"), text("2024-01-02 03:04:05")],
            vec![text("2"), text("2"), None, text("2.5"), None],
        ]);
        let table = orders_table(conn.clone());
        let range = KeyRange { from: 1, to: 2, members: vec![1, 2] };

        let rows = fetch(&table, &range, &table.columns, Dialect::Postgres).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].columns,
            vec![
                text("1"),
                text("'O''Neil'"),
                text("10"),
                text("CAST('2024-01-02T03:04:05' AS TIMESTAMP)"),
            ]
        );
        assert_eq!(rows[1].primary_key, 2);
        assert_eq!(rows[1].columns[1], None);
        assert_eq!(
            conn.queries()[0],
            "SELECT CAST(`id` AS SIGNED), `id`, `customer`, `total`, `created` FROM `orders` \
             WHERE `id` >= 1 AND `id` <= 2 ORDER BY `id`"
        );
    }

    #[test]
    fn test_missing_column_is_shape_mismatch() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Postgres));
        let table = orders_table(conn);
        let mut reference = table.columns.clone();
        reference.push(Column::new("discount", "numeric", Dialect::Mysql, false, None, 0));

        let err = build_fetch_query(&table, &KeyRange::single(1), &reference).unwrap_err();
        assert!(matches!(err, SyncError::ShapeMismatch { .. }));
        assert!(err.is_skippable());
    }

    #[test]
    fn test_unsupported_column_rejected() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Postgres));
        let table = orders_table(conn);
        let reference = vec![Column::new("blob", "bytea", Dialect::Postgres, false, None, 0)];
        let err = build_fetch_query(&table, &KeyRange::single(1), &reference).unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedType { .. }));
    }

    #[tokio::test]
    async fn test_composite_key_fetch() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Postgres));
        let columns = vec![
            Column::new("order_id", "int4", Dialect::Postgres, true, None, 0),
            Column::new("line", "int4", Dialect::Postgres, true, None, 0),
            Column::new("sku", "varchar", Dialect::Postgres, false, None, 20),
        ];
        let table = Table::new(
            "order_lines",
            columns,
            vec!["order_id".to_string(), "line".to_string()],
            String::new(),
            conn.clone(),
        );
        conn.push_response(vec![
            vec![text("7"), text("7"), text("2"), text("b")],
            vec![text("7"), text("7"), text("1"), text("a")],
        ]);

        let rows = fetch(&table, &KeyRange::single(7), &table.columns, Dialect::Postgres)
            .await
            .unwrap();
        assert_eq!(
            conn.queries()[0],
            "SELECT CAST(\"order_id\" AS BIGINT), \"order_id\", \"line\", \"sku\" FROM \"order_lines\" \
             WHERE \"order_id\" >= 7 AND \"order_id\" <= 7 ORDER BY \"order_id\",\"line\""
        );
        assert_eq!(rows[0].key_rest, vec![text("1")]);
        assert_eq!(rows[1].key_rest, vec![text("2")]);
        assert_eq!(rows[0].columns[2], text("'a'"));
    }

    #[tokio::test]
    async fn test_fetch_dates_and_booleans_for_postgres() {
        let conn = Arc::new(FakeConnector::new("src", Dialect::Mysql));
        let columns = vec![
            Column::new("id", "int", Dialect::Mysql, true, None, 0),
            Column::new("day", "date", Dialect::Mysql, false, None, 0),
            Column::new("opens", "time", Dialect::Mysql, false, None, 0),
            Column::new("active", "bit", Dialect::Mysql, false, None, 0),
        ];
        let table = Table::new("shops", columns, vec!["id".to_string()], String::new(), conn.clone());
        conn.push_response(vec![vec![
            text("1"),
            text("1"),
            text("2024-05-21"),
            text("08:00:00"),
            text("\u{1}"),
        ]]);

        let rows = fetch(&table, &KeyRange::single(1), &table.columns, Dialect::Postgres)
            .await
            .unwrap();
        assert_eq!(
            rows[0].columns,
            vec![
                text("1"),
                text("CAST('2024-05-21' AS DATE)"),
                text("CAST('08:00:00' AS TIME)"),
                text("TRUE"),
            ]
        );
    }

    #[test]
    fn test_postgres_boolean_cast() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Postgres));
        let columns = vec![
            Column::new("id", "int4", Dialect::Postgres, true, None, 0),
            Column::new("active", "bool", Dialect::Postgres, false, None, 0),
        ];
        let table = Table::new("flags", columns, vec!["id".to_string()], String::new(), conn);
        let sql = build_fetch_query(&table, &KeyRange::single(3), &table.columns).unwrap();
        assert!(sql.contains("CAST(\"active\" AS INT)"));
        assert!(sql.contains("WHERE \"id\" >= 3 AND \"id\" <= 3"));
    }
}
