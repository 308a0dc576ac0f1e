// ABOUTME: Integration tests for bulk sync against live databases
// ABOUTME: Run only when TEST_SOURCE_URL and TEST_SINK_URL are set

use sqlmirror::config::{DatabaseConfig, SyncSettings};
use sqlmirror::error_log::SyncErrorLog;
use sqlmirror::{db, progress, Connector, Database, SyncEngine};
use std::env;
use std::sync::Arc;
use tempfile::TempDir;

const TABLE: &str = "sqlmirror_it_orders";

/// Helper to get test database configs from environment
fn get_test_configs() -> Option<(DatabaseConfig, DatabaseConfig)> {
    let source = env::var("TEST_SOURCE_URL").ok()?;
    let sink = env::var("TEST_SINK_URL").ok()?;
    let config = |name: &str, url: String| DatabaseConfig {
        name: name.to_string(),
        url,
        schema: String::new(),
        ignored_tables: vec![],
        accept_invalid_certs: true,
    };
    Some((config("it_source", source), config("it_sink", sink)))
}

async fn recreate_table(conn: &dyn Connector) -> anyhow::Result<()> {
    let table = conn.quote_identifier(TABLE);
    let _ = conn.execute(&format!("DROP TABLE IF EXISTS {}", table)).await;
    conn.execute(&format!(
        "CREATE TABLE {} ({} INT NOT NULL PRIMARY KEY, {} VARCHAR(40), {} DECIMAL(10,2))",
        table,
        conn.quote_identifier("id"),
        conn.quote_identifier("name"),
        conn.quote_identifier("amount")
    ))
    .await?;
    Ok(())
}

async fn insert_rows(conn: &dyn Connector, rows: &[(i64, &str)]) -> anyhow::Result<()> {
    let values: Vec<String> = rows
        .iter()
        .map(|(id, name)| format!("({}, '{}', {}.50)", id, name, id))
        .collect();
    for batch in values.chunks(50) {
        conn.execute(&format!(
            "INSERT INTO {} VALUES {}",
            conn.quote_identifier(TABLE),
            batch.join(",")
        ))
        .await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_bulk_sync_converges_and_is_idempotent() {
    let Some((source_config, sink_config)) = get_test_configs() else {
        println!("Skipping test: TEST_SOURCE_URL and TEST_SINK_URL not set");
        return;
    };

    let source_conn = db::connect(&source_config).await.expect("source connects");
    let sink_conn = db::connect(&sink_config).await.expect("sink connects");
    recreate_table(source_conn.as_ref()).await.unwrap();
    recreate_table(sink_conn.as_ref()).await.unwrap();

    // Key 120 exists only on the sink, inside the source's key span
    let source_rows: Vec<(i64, String)> = (1..=250)
        .filter(|id| *id != 120)
        .map(|id| (id, format!("name {}", id)))
        .collect();
    let source_refs: Vec<(i64, &str)> = source_rows.iter().map(|(id, n)| (*id, n.as_str())).collect();
    insert_rows(source_conn.as_ref(), &source_refs).await.unwrap();
    let sink_refs: Vec<(i64, &str)> = (1..=10).map(|id| (id, "stale")).chain([(120, "gone")]).collect();
    insert_rows(sink_conn.as_ref(), &sink_refs).await.unwrap();

    let source = Database::load(source_config.clone(), source_conn.clone(), TABLE)
        .await
        .unwrap();
    let sink = Database::load(sink_config.clone(), sink_conn.clone(), TABLE)
        .await
        .unwrap();

    let temp_dir = TempDir::new().unwrap();
    let (handle, _task) = progress::spawn(false);
    let error_log = Arc::new(SyncErrorLog::new(
        temp_dir.path().join("errors.log"),
        chrono_tz::UTC,
    ));
    let engine = SyncEngine::new(&SyncSettings::default(), handle, error_log);

    let summary = engine.sync_all(&source, &sink, TABLE, false).await.unwrap();
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.inserts, 239);
    assert_eq!(summary.updates, 10);
    assert_eq!(summary.deletes, 1);

    let again = engine.sync_all(&source, &sink, TABLE, false).await.unwrap();
    assert_eq!(again.changes(), 0);

    let count = sink_conn
        .query_i64(&format!("SELECT COUNT(*) FROM {}", sink_conn.quote_identifier(TABLE)))
        .await
        .unwrap();
    assert_eq!(count, Some(249));

    let cleanup = |conn: Arc<dyn Connector>| async move {
        let _ = conn
            .execute(&format!("DROP TABLE IF EXISTS {}", conn.quote_identifier(TABLE)))
            .await;
    };
    cleanup(source_conn).await;
    cleanup(sink_conn).await;
}
