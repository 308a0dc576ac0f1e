// ABOUTME: MySQL and MariaDB connector on mysql_async
// ABOUTME: Sessions run with ANSI_QUOTES and foreign key checks disabled

use anyhow::{Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Value};
use std::time::Instant;
use tokio::sync::Mutex;

use super::{Connector, Dialect, TextRow, VERIFY_INTERVAL};
use crate::config::DatabaseConfig;

const SESSION_SETUP: [&str; 2] = [
    "SET SESSION sql_mode = 'ANSI_QUOTES'",
    "SET FOREIGN_KEY_CHECKS = 0",
];

struct Session {
    conn: Option<Conn>,
    verified_at: Instant,
}

pub struct MysqlConnector {
    config: DatabaseConfig,
    dialect: Dialect,
    session: Mutex<Session>,
}

impl MysqlConnector {
    pub async fn connect(config: &DatabaseConfig, dialect: Dialect) -> Result<Self> {
        let conn = open_conn(config).await?;
        Ok(Self {
            config: config.clone(),
            dialect,
            session: Mutex::new(Session {
                conn: Some(conn),
                verified_at: Instant::now(),
            }),
        })
    }

    /// Lock the session, pinging it first if it has been idle a while.
    async fn session(&self) -> Result<tokio::sync::MutexGuard<'_, Session>> {
        let mut session = self.session.lock().await;
        let stale = session.verified_at.elapsed() >= VERIFY_INTERVAL;
        let alive = match session.conn.as_mut() {
            Some(conn) if stale => conn.ping().await.is_ok(),
            Some(_) => true,
            None => false,
        };
        if !alive {
            tracing::warn!("(db) connection to {} is stale, reconnecting", self.config.name);
            session.conn = Some(open_conn(&self.config).await?);
        }
        if stale || !alive {
            session.verified_at = Instant::now();
        }
        Ok(session)
    }
}

/// Connection options for a mysql:// or mariadb:// URL.
pub fn opts_from_config(config: &DatabaseConfig) -> Result<Opts> {
    let url = match config.url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("mariadb") => {
            format!("mysql://{}", rest)
        }
        _ => config.url.clone(),
    };
    let opts = Opts::from_url(&url)
        .with_context(|| format!("Invalid MySQL connection string: {}", config.display_url()))?;
    Ok(OptsBuilder::from_opts(opts).into())
}

async fn open_conn(config: &DatabaseConfig) -> Result<Conn> {
    let mut conn = Conn::new(opts_from_config(config)?)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {} at {}",
                config.name,
                config.display_url()
            )
        })?;
    for statement in SESSION_SETUP {
        conn.query_drop(statement).await?;
    }
    Ok(conn)
}

/// Text form of a protocol value, `None` for NULL.
pub(crate) fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let mut text = format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            );
            if *micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Some(text)
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let hours = u32::from(*hours) + days * 24;
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if *negative { "-" } else { "" },
                hours,
                minutes,
                seconds
            );
            if *micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Some(text)
        }
    }
}

fn no_session(name: &str) -> anyhow::Error {
    anyhow::anyhow!("No open session to {}", name)
}

#[async_trait]
impl Connector for MysqlConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str) -> Result<Vec<TextRow>> {
        let mut session = self.session().await?;
        let conn = session.conn.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        let rows: Vec<mysql_async::Row> = conn
            .query(sql)
            .await
            .with_context(|| format!("Query failed on {}: {}", self.config.name, sql))?;

        Ok(rows
            .iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.as_ref(i).and_then(value_to_text))
                    .collect()
            })
            .collect())
    }

    async fn for_each_key(&self, sql: &str, f: &mut (dyn FnMut(i64) + Send)) -> Result<u64> {
        let mut session = self.session().await?;
        let conn = session.conn.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        let mut result = conn
            .query_iter(sql)
            .await
            .with_context(|| format!("Key query failed on {}: {}", self.config.name, sql))?;

        let mut count = 0u64;
        let mut bad = 0u64;
        result
            .for_each(|row| match row.get_opt::<i64, _>(0) {
                Some(Ok(key)) => {
                    f(key);
                    count += 1;
                }
                _ => bad += 1,
            })
            .await?;
        result.drop_result().await?;

        if bad > 0 {
            tracing::warn!("(db) {} non-integer keys ignored on {}", bad, self.config.name);
        }
        Ok(count)
    }

    /// Affected rows are those reported for the last statement of the batch.
    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut session = self.session().await?;
        let conn = session.conn.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        conn.query_drop(sql).await?;
        Ok(conn.affected_rows())
    }

    async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.conn.take() {
            let _ = old.disconnect().await;
        }
        session.conn = Some(open_conn(&self.config).await?);
        session.verified_at = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            name: "src".to_string(),
            url: url.to_string(),
            schema: String::new(),
            ignored_tables: vec![],
            accept_invalid_certs: false,
        }
    }

    #[test]
    fn test_mariadb_scheme_accepted() {
        let opts = opts_from_config(&config("mariadb://app:pw@db1:3307/shop")).unwrap();
        assert_eq!(opts.ip_or_hostname(), "db1");
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.db_name().as_deref(), Some("shop"));
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::NULL), None);
        assert_eq!(value_to_text(&Value::Int(-4)).as_deref(), Some("-4"));
        assert_eq!(
            value_to_text(&Value::Bytes(b"it's".to_vec())).as_deref(),
            Some("it's")
        );
        assert_eq!(
            value_to_text(&Value::Date(2024, 1, 5, 7, 8, 9, 0)).as_deref(),
            Some("2024-01-05 07:08:09")
        );
        assert_eq!(
            value_to_text(&Value::Time(false, 1, 2, 3, 4, 0)).as_deref(),
            Some("26:03:04")
        );
    }
}
