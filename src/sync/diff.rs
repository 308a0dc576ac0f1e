// ABOUTME: Sorted merge-diff of source and sink rows into inserts, updates and deletes
// ABOUTME: Pure planning plus rendering of the batched SQL statements

use std::cmp::Ordering;

use super::fetch::Row;
use crate::error::SyncError;
use crate::schema::Table;

/// Identity of one sink row: leading key plus the remaining key literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowKey {
    pub primary_key: i64,
    pub key_rest: Vec<Option<String>>,
}

impl RowKey {
    pub fn single(primary_key: i64) -> Self {
        Self {
            primary_key,
            key_rest: Vec::new(),
        }
    }

    fn of(row: &Row) -> Self {
        Self {
            primary_key: row.primary_key,
            key_rest: row.key_rest.clone(),
        }
    }
}

/// Columns to overwrite on one sink row, `(column index, new value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub key: RowKey,
    pub changes: Vec<(usize, Option<String>)>,
}

/// What one chunk needs to converge.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub inserts: Vec<Row>,
    pub updates: Vec<RowUpdate>,
    pub deletes: Vec<RowKey>,
    /// Rows present on both sides with equal values
    pub unchanged: usize,
}

impl ChunkPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// Merge two row lists sorted by [`Row::sort_key`].
///
/// Equal keys compare values position by position (NULL differs from any
/// value); keys only on the source become inserts, keys only on the sink
/// become deletes. Rows with differing value counts abort the whole chunk.
pub fn merge_diff(table: &str, source: &[Row], sink: &[Row]) -> Result<ChunkPlan, SyncError> {
    let mut plan = ChunkPlan::default();
    let mut i = 0;
    let mut j = 0;

    loop {
        let order = match (source.get(i), sink.get(j)) {
            (Some(f), Some(t)) => f.sort_key().cmp(&t.sort_key()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                let (f, t) = (&source[i], &sink[j]);
                if f.columns.len() != t.columns.len() {
                    return Err(SyncError::ShapeMismatch {
                        table: table.to_string(),
                        detail: format!(
                            "pk {} has {} source values but {} sink values",
                            f.primary_key,
                            f.columns.len(),
                            t.columns.len()
                        ),
                    });
                }
                let changes: Vec<(usize, Option<String>)> = f
                    .columns
                    .iter()
                    .zip(&t.columns)
                    .enumerate()
                    .filter(|(_, (a, b))| a != b)
                    .map(|(idx, (a, _))| (idx, a.clone()))
                    .collect();
                if changes.is_empty() {
                    plan.unchanged += 1;
                } else {
                    plan.updates.push(RowUpdate {
                        key: RowKey::of(t),
                        changes,
                    });
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                plan.inserts.push(source[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                plan.deletes.push(RowKey::of(&sink[j]));
                j += 1;
            }
        }
    }
    Ok(plan)
}

fn literal(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("NULL")
}

/// `"id"=5`, extended with the trailing key columns of composite keys.
fn key_predicate(sink: &Table, key: &RowKey) -> String {
    let mut predicate = format!("{}={}", sink.quoted_key_column(), key.primary_key);
    for (name, value) in sink.primary_key.iter().skip(1).zip(&key.key_rest) {
        match value {
            Some(v) => predicate.push_str(&format!(" AND {}={}", sink.quote(name), v)),
            None => predicate.push_str(&format!(" AND {} IS NULL", sink.quote(name))),
        }
    }
    predicate
}

/// One multi-row `INSERT` into the sink table.
pub fn build_insert_sql(sink: &Table, column_names: &[String], rows: &[Row]) -> String {
    let columns: Vec<String> = column_names.iter().map(|c| sink.quote(c)).collect();
    let values: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<&str> = row.columns.iter().map(literal).collect();
            format!("({})", values.join(","))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        sink.qualified_name(),
        columns.join(","),
        values.join(",")
    )
}

/// `UPDATE` naming only the differing columns.
pub fn build_update_sql(sink: &Table, column_names: &[String], update: &RowUpdate) -> String {
    let sets: Vec<String> = update
        .changes
        .iter()
        .map(|(idx, value)| format!("{}={}", sink.quote(&column_names[*idx]), literal(value)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {}",
        sink.qualified_name(),
        sets.join(","),
        key_predicate(sink, &update.key)
    )
}

/// One `DELETE` for all sink-only rows, `IN (...)` for single-column keys.
pub fn build_delete_sql(sink: &Table, keys: &[RowKey]) -> String {
    if keys.iter().all(|k| k.key_rest.is_empty()) {
        let keys: Vec<String> = keys.iter().map(|k| k.primary_key.to_string()).collect();
        return format!(
            "DELETE FROM {} WHERE {} IN ({})",
            sink.qualified_name(),
            sink.quoted_key_column(),
            keys.join(",")
        );
    }
    let predicates: Vec<String> = keys
        .iter()
        .map(|k| format!("({})", key_predicate(sink, k)))
        .collect();
    format!(
        "DELETE FROM {} WHERE {}",
        sink.qualified_name(),
        predicates.join(" OR ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;
    use crate::schema::Column;
    use crate::testing::{orders_table, text, FakeConnector};
    use std::sync::Arc;

    fn row(pk: i64, values: &[Option<&str>]) -> Row {
        Row::new(pk, values.iter().map(|v| v.map(str::to_string)).collect())
    }

    fn keyed(pk: i64, name: &str) -> Row {
        let id = pk.to_string();
        row(pk, &[Some(id.as_str()), Some(name)])
    }

    /// Apply a plan to in-memory sink rows the way the sink would.
    fn apply(sink: &mut Vec<Row>, plan: &ChunkPlan) {
        sink.retain(|r| !plan.deletes.contains(&RowKey::of(r)));
        for update in &plan.updates {
            if let Some(target) = sink.iter_mut().find(|r| RowKey::of(r) == update.key) {
                for (idx, value) in &update.changes {
                    target.columns[*idx] = value.clone();
                }
            }
        }
        sink.extend(plan.inserts.iter().cloned());
        sink.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    #[test]
    fn test_orders_scenario() {
        // Key 2 identical on both sides, key 5 differs in one column
        let source = vec![keyed(1, "'a'"), keyed(2, "'b'"), keyed(3, "'c'"), keyed(5, "'e'")];
        let sink = vec![keyed(1, "'a'"), keyed(2, "'b'"), keyed(4, "'d'"), keyed(5, "'x'")];

        let plan = merge_diff("orders", &source, &sink).unwrap();
        assert_eq!(plan.inserts, vec![keyed(3, "'c'")]);
        assert_eq!(
            plan.updates,
            vec![RowUpdate { key: RowKey::single(5), changes: vec![(1, text("'e'"))] }]
        );
        assert_eq!(plan.deletes, vec![RowKey::single(4)]);
        assert_eq!(plan.unchanged, 2);
    }

    #[test]
    fn test_applied_plan_converges() {
        let source = vec![
            keyed(1, "'a'"),
            row(2, &[Some("2"), None]),
            keyed(3, "'c'"),
            keyed(5, "'e'"),
            keyed(8, "'h'"),
        ];
        let mut sink = vec![
            keyed(1, "'a'"),
            keyed(2, "'b'"),
            keyed(4, "'d'"),
            keyed(5, "'x'"),
            keyed(9, "'i'"),
        ];

        let plan = merge_diff("orders", &source, &sink).unwrap();
        assert_eq!(plan.change_count(), 6);
        apply(&mut sink, &plan);
        assert_eq!(sink, source);

        let again = merge_diff("orders", &source, &sink).unwrap();
        assert!(again.is_empty());
        assert_eq!(again.unchanged, source.len());
    }

    #[test]
    fn test_identical_inputs_yield_empty_plan() {
        let rows = vec![keyed(1, "'a'"), keyed(9, "NULL-ish")];
        let plan = merge_diff("t", &rows, &rows).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.unchanged, 2);
    }

    #[test]
    fn test_one_side_empty() {
        let rows = vec![keyed(1, "'a'"), keyed(2, "'b'")];
        let plan = merge_diff("t", &rows, &[]).unwrap();
        assert_eq!(plan.inserts.len(), 2);
        let plan = merge_diff("t", &[], &rows).unwrap();
        assert_eq!(plan.deletes, vec![RowKey::single(1), RowKey::single(2)]);
    }

    #[test]
    fn test_null_differs_from_value() {
        let plan = merge_diff("t", &[row(1, &[None])], &[row(1, &[Some("''")])]).unwrap();
        assert_eq!(plan.updates[0].changes, vec![(0, None)]);
    }

    #[test]
    fn test_value_count_mismatch_aborts_chunk() {
        let err = merge_diff("t", &[row(1, &[Some("1")])], &[row(1, &[Some("1"), None])])
            .unwrap_err();
        assert!(err.is_skippable());
    }

    #[test]
    fn test_render_statements() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Postgres));
        let table = orders_table(conn);
        let names: Vec<String> = table.column_names().map(str::to_string).collect();

        let rows = vec![
            row(3, &[Some("3"), Some("'c'"), None, None]),
            row(4, &[Some("4"), Some("'d'"), Some("1.5"), None]),
        ];
        assert_eq!(
            build_insert_sql(&table, &names, &rows),
            "INSERT INTO \"orders\" (\"id\",\"customer\",\"total\",\"created\") \
             VALUES (3,'c',NULL,NULL),(4,'d',1.5,NULL)"
        );

        let update = RowUpdate {
            key: RowKey::single(2),
            changes: vec![(1, text("'b'")), (2, None)],
        };
        assert_eq!(
            build_update_sql(&table, &names, &update),
            "UPDATE \"orders\" SET \"customer\"='b',\"total\"=NULL WHERE \"id\"=2"
        );
        assert_eq!(
            build_delete_sql(&table, &[RowKey::single(4), RowKey::single(7)]),
            "DELETE FROM \"orders\" WHERE \"id\" IN (4,7)"
        );
    }

    #[test]
    fn test_boolean_insert_for_postgres_sink() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Postgres));
        let columns = vec![
            Column::new("id", "int4", Dialect::Postgres, true, None, 0),
            Column::new("active", "bool", Dialect::Postgres, false, None, 0),
        ];
        let table = Table::new("flags", columns, vec!["id".to_string()], String::new(), conn);
        let names: Vec<String> = table.column_names().map(str::to_string).collect();
        let active = table.columns[1].sql_type;
        let encode = |raw: &str| crate::sync::value::encode(active, raw, Dialect::Postgres);

        let rows = vec![
            row(1, &[Some("1"), Some(encode("1").as_str())]),
            row(2, &[Some("2"), Some(encode("0").as_str())]),
        ];
        assert_eq!(
            build_insert_sql(&table, &names, &rows),
            "INSERT INTO \"flags\" (\"id\",\"active\") VALUES (1,TRUE),(2,FALSE)"
        );
    }

    fn line(order: i64, line: &str, sku: &str) -> Row {
        let mut r = row(order, &[Some(order.to_string().as_str()), Some(line), Some(sku)]);
        r.key_rest = vec![Some(line.to_string())];
        r
    }

    #[test]
    fn test_composite_keys_merge_on_full_key() {
        let conn = Arc::new(FakeConnector::new("dst", Dialect::Mysql));
        let columns = vec![
            Column::new("order_id", "int", Dialect::Mysql, true, None, 0),
            Column::new("line", "int", Dialect::Mysql, true, None, 0),
            Column::new("sku", "varchar", Dialect::Mysql, false, None, 20),
        ];
        let table = Table::new(
            "order_lines",
            columns,
            vec!["order_id".to_string(), "line".to_string()],
            String::new(),
            conn,
        );
        let names: Vec<String> = table.column_names().map(str::to_string).collect();

        let source = vec![line(7, "1", "'a'"), line(7, "2", "'b'")];
        let mut sink = vec![line(7, "1", "'z'"), line(7, "3", "'c'")];
        let plan = merge_diff("order_lines", &source, &sink).unwrap();

        assert_eq!(plan.inserts, vec![line(7, "2", "'b'")]);
        assert_eq!(
            build_update_sql(&table, &names, &plan.updates[0]),
            "UPDATE `order_lines` SET `sku`='a' WHERE `order_id`=7 AND `line`=1"
        );
        assert_eq!(
            build_delete_sql(&table, &plan.deletes),
            "DELETE FROM `order_lines` WHERE (`order_id`=7 AND `line`=3)"
        );

        apply(&mut sink, &plan);
        assert!(merge_diff("order_lines", &source, &sink).unwrap().is_empty());
    }
}
