// ABOUTME: compare-tables command - prints the DDL that brings the sink schema in line
// ABOUTME: Nothing is executed; destructive statements are only emitted as text

use anyhow::Result;

use super::Outcome;
use crate::config::AppConfig;
use crate::schema::compare::compare_schemas;
use crate::schema::Database;

fn describe(db: &Database) -> String {
    format!(
        "{}({}:{})",
        db.name(),
        db.config.database_name().unwrap_or_default(),
        db.dialect()
    )
}

/// Full script for the sink, `None` when the schemas already match.
pub fn render_report(source: &Database, sink: &Database) -> Option<String> {
    let (ddl, changed) = compare_schemas(source, sink);
    if !changed {
        return None;
    }

    let mut out = String::new();
    if let Some(preamble) = sink.dialect().session_preamble() {
        out.push_str(preamble);
        out.push('\n');
    }
    out.push_str(&format!(
        "-- compare-tables {} --> {}\n",
        describe(source),
        describe(sink)
    ));
    out.push_str(&ddl);
    Some(out)
}

/// Compare the schemas of all tables, or only `table`.
pub async fn compare_tables(config: &AppConfig, table: Option<&str>) -> Result<Outcome> {
    let pattern = table.unwrap_or("").trim();
    if pattern.is_empty() {
        tracing::info!("(compare-tables) all tables");
    } else {
        tracing::info!("(compare-tables) {}", pattern);
    }

    let source = Database::open(&config.source, pattern).await?;
    let sink = Database::open(&config.sink, pattern).await?;

    match render_report(&source, &sink) {
        Some(report) => {
            println!("{}", report);
            Ok(Outcome::Changed)
        }
        None => {
            tracing::info!("(compare-tables) no changes found");
            Ok(Outcome::InSync)
        }
    }
}
