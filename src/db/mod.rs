// ABOUTME: Database connectors - one serialized session per physical database
// ABOUTME: Defines the dialect tag, the Connector trait and the keepalive policy

pub mod mysql;
pub mod postgres;
pub mod sqlserver;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::error::SyncError;
use crate::schema::SqlType;

/// One result row with every value rendered as text, `None` for SQL NULL.
pub type TextRow = Vec<Option<String>>;

/// Reconnect attempts the keepalive makes before giving up.
pub const KEEPALIVE_RETRIES: u32 = 5;

/// Skip the connection validity check if one succeeded this recently.
pub const VERIFY_INTERVAL: Duration = Duration::from_secs(60);

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Mysql,
    MariaDb,
    SqlServer,
}

impl Dialect {
    /// Detect the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        let lower = url.trim().to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else if lower.starts_with("mysql://") {
            Ok(Dialect::Mysql)
        } else if lower.starts_with("mariadb://") {
            Ok(Dialect::MariaDb)
        } else if lower.starts_with("sqlserver://") || lower.starts_with("jdbc:sqlserver://") {
            Ok(Dialect::SqlServer)
        } else {
            bail!(
                "No supported database driver found for url: {}\n\
                 Expected postgresql://, mysql://, mariadb://, sqlserver:// or jdbc:sqlserver://",
                crate::config::sanitize_url(url)
            )
        }
    }

    pub fn is_mysql_family(self) -> bool {
        matches!(self, Dialect::Mysql | Dialect::MariaDb)
    }

    /// Quote an identifier (table, column name).
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Dialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
            Dialect::Mysql | Dialect::MariaDb => format!("`{}`", name.replace('`', "``")),
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
        }
    }

    /// Escape a value for use inside a single quoted catalog query literal.
    pub fn escape_literal(self, value: &str) -> String {
        let doubled = value.replace('\'', "''");
        if self.backslash_escapes() {
            doubled.replace('\\', "\\\\")
        } else {
            doubled
        }
    }

    /// Whether backslash starts an escape sequence inside string literals.
    pub fn backslash_escapes(self) -> bool {
        self.is_mysql_family()
    }

    /// Keyword used by ALTER TABLE to add a column.
    pub fn add_column_keyword(self) -> &'static str {
        match self {
            Dialect::SqlServer => "ADD",
            _ => "ADD COLUMN",
        }
    }

    /// Type name used when casting a literal of `sql_type` to a temporal value.
    pub fn temporal_type(self, sql_type: SqlType) -> &'static str {
        match (sql_type, self) {
            (SqlType::Date, _) => "DATE",
            (SqlType::Time, _) => "TIME",
            (_, Dialect::Postgres) => "TIMESTAMP",
            _ => "DATETIME",
        }
    }

    /// Expression casting a column to a 64-bit integer.
    pub fn cast_bigint(self, expr: &str) -> String {
        match self {
            Dialect::Mysql | Dialect::MariaDb => format!("CAST({} AS SIGNED)", expr),
            _ => format!("CAST({} AS BIGINT)", expr),
        }
    }

    /// Statement printed ahead of generated DDL so identifiers parse as quoted.
    pub fn session_preamble(self) -> Option<&'static str> {
        match self {
            Dialect::Mysql | Dialect::MariaDb => Some("SET SESSION sql_mode = 'ANSI_QUOTES';"),
            Dialect::SqlServer => Some("SET QUOTED_IDENTIFIER ON;"),
            Dialect::Postgres => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dialect::Postgres => "POSTGRES",
            Dialect::Mysql => "MYSQL",
            Dialect::MariaDb => "MARIADB",
            Dialect::SqlServer => "SQLSERVER",
        };
        f.write_str(name)
    }
}

/// Executes SQL against one physical database.
///
/// Implementations serialize every call on a single session and validate or
/// re-establish a stale session before surfacing an error to the caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Display name of this database.
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Run a query and return all rows as text.
    async fn query(&self, sql: &str) -> Result<Vec<TextRow>>;

    /// Stream the first column of a query as integers, calling `f` per row.
    ///
    /// Returns the number of rows seen.
    async fn for_each_key(&self, sql: &str, f: &mut (dyn FnMut(i64) + Send)) -> Result<u64>;

    /// Execute one or more `;` separated statements, returning affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Drop the current session and open a new one.
    async fn reconnect(&self) -> Result<()>;

    /// Run a trivial query to keep the session alive and verify its result.
    async fn keepalive(&self) -> Result<()> {
        keepalive(self).await
    }

    fn quote_identifier(&self, name: &str) -> String {
        self.dialect().quote_identifier(name)
    }

    /// Query a single integer, `None` when no row or NULL came back.
    async fn query_i64(&self, sql: &str) -> Result<Option<i64>> {
        let rows = self.query(sql).await?;
        match rows.first().and_then(|row| row.first()).cloned().flatten() {
            Some(value) => Ok(Some(value.trim().parse::<i64>().map_err(|e| {
                anyhow::anyhow!("Expected integer from {:?}, got {:?}: {}", sql, value, e)
            })?)),
            None => Ok(None),
        }
    }
}

/// Keepalive with a bounded reconnect budget.
///
/// `select 1+2+3` must return 6; anything else (or an error) triggers a
/// reconnect. After [`KEEPALIVE_RETRIES`] failed reconnects the error is fatal.
pub async fn keepalive<C: Connector + ?Sized>(conn: &C) -> Result<()> {
    let mut retries = 0;
    loop {
        tracing::debug!("(db) keepalive {}", conn.name());
        let outcome = match conn.query_i64("select 1+2+3").await {
            Ok(Some(6)) => return Ok(()),
            Ok(other) => format!("expected 6 but got {:?}", other),
            Err(e) => format!("{:#}", e),
        };

        if retries >= KEEPALIVE_RETRIES {
            return Err(SyncError::Connection {
                name: conn.name().to_string(),
                reason: format!(
                    "{} keepalive reconnect attempts failed, giving up: {}",
                    KEEPALIVE_RETRIES, outcome
                ),
            }
            .into());
        }
        retries += 1;
        tracing::warn!(
            "(db) keepalive to {} failed ({}), reconnect attempt {}",
            conn.name(),
            outcome,
            retries
        );
        if let Err(e) = conn.reconnect().await {
            tracing::error!("(db) reconnect to {} failed: {:#}", conn.name(), e);
        }
    }
}

/// Open a connector for the configured database.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn Connector>> {
    let dialect = config.dialect()?;
    tracing::info!(
        "(db) connecting {} ({}:{}) {}",
        config.name,
        config.database_name().unwrap_or_default(),
        dialect,
        config.display_url()
    );
    let conn: Arc<dyn Connector> = match dialect {
        Dialect::Postgres => Arc::new(postgres::PostgresConnector::connect(config).await?),
        Dialect::Mysql | Dialect::MariaDb => {
            Arc::new(mysql::MysqlConnector::connect(config, dialect).await?)
        }
        Dialect::SqlServer => Arc::new(sqlserver::SqlServerConnector::connect(config).await?),
    };
    Ok(conn)
}
