// ABOUTME: SQL Server connector on tiberius over a tokio TCP stream
// ABOUTME: Accepts sqlserver:// URLs and JDBC connection strings

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use std::time::Instant;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{Connector, Dialect, TextRow, VERIFY_INTERVAL};
use crate::config::DatabaseConfig;

type SqlClient = Client<Compat<TcpStream>>;

struct Session {
    client: Option<SqlClient>,
    verified_at: Instant,
}

pub struct SqlServerConnector {
    config: DatabaseConfig,
    session: Mutex<Session>,
}

impl SqlServerConnector {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let client = open_client(config).await?;
        Ok(Self {
            config: config.clone(),
            session: Mutex::new(Session {
                client: Some(client),
                verified_at: Instant::now(),
            }),
        })
    }

    async fn session(&self) -> Result<tokio::sync::MutexGuard<'_, Session>> {
        let mut session = self.session.lock().await;
        let stale = session.verified_at.elapsed() >= VERIFY_INTERVAL;
        let alive = match session.client.as_mut() {
            Some(client) if stale => match client.simple_query("SELECT 1").await {
                Ok(stream) => stream.into_results().await.is_ok(),
                Err(_) => false,
            },
            Some(_) => true,
            None => false,
        };
        if !alive {
            tracing::warn!("(db) connection to {} is stale, reconnecting", self.config.name);
            session.client = Some(open_client(&self.config).await?);
        }
        if stale || !alive {
            session.verified_at = Instant::now();
        }
        Ok(session)
    }
}

/// Build a tiberius config from `sqlserver://user:pw@host:port/db` or a JDBC string.
pub fn tiberius_config(config: &DatabaseConfig) -> Result<Config> {
    let mut tib_config = if config.url.starts_with("jdbc:") {
        Config::from_jdbc_string(&config.url).context("Invalid JDBC connection string")?
    } else {
        let url = url::Url::parse(&config.url).context("Invalid SQL Server URL")?;
        let mut tib_config = Config::new();
        tib_config.host(url.host_str().unwrap_or("localhost"));
        tib_config.port(url.port().unwrap_or(1433));
        let database = url.path().trim_start_matches('/');
        if !database.is_empty() {
            tib_config.database(database);
        }
        let username = if url.username().is_empty() {
            "sa"
        } else {
            url.username()
        };
        tib_config.authentication(AuthMethod::sql_server(username, url.password().unwrap_or("")));
        tib_config
    };
    if config.accept_invalid_certs {
        tib_config.trust_cert();
    }
    Ok(tib_config)
}

async fn open_client(config: &DatabaseConfig) -> Result<SqlClient> {
    let tib_config = tiberius_config(config)?;
    let tcp = TcpStream::connect(tib_config.get_addr())
        .await
        .with_context(|| format!("Failed to connect to {} at {}", config.name, config.display_url()))?;
    tcp.set_nodelay(true)?;

    let mut client = Client::connect(tib_config, tcp.compat_write())
        .await
        .with_context(|| format!("Failed to authenticate to {}", config.name))?;
    client
        .simple_query("SET QUOTED_IDENTIFIER ON")
        .await?
        .into_results()
        .await?;
    Ok(client)
}

const TEMPORAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Text form of a TDS value. Binary and XML payloads come back as `None`,
/// such columns are rejected before any fetch.
fn cell_to_text(data: &ColumnData<'static>) -> Result<Option<String>> {
    let text = match data {
        ColumnData::U8(v) => v.map(|v| v.to_string()),
        ColumnData::I16(v) => v.map(|v| v.to_string()),
        ColumnData::I32(v) => v.map(|v| v.to_string()),
        ColumnData::I64(v) => v.map(|v| v.to_string()),
        ColumnData::F32(v) => v.map(|v| v.to_string()),
        ColumnData::F64(v) => v.map(|v| v.to_string()),
        ColumnData::Bit(v) => v.map(|v| if v { "1" } else { "0" }.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => v.as_ref().map(|g| g.to_string()),
        ColumnData::Numeric(v) => v.as_ref().map(|n| n.to_string()),
        ColumnData::Binary(_) | ColumnData::Xml(_) => None,
        ColumnData::Date(_) => NaiveDate::from_sql(data)?.map(|d| d.format("%Y-%m-%d").to_string()),
        ColumnData::Time(_) => NaiveTime::from_sql(data)?.map(|t| t.format("%H:%M:%S%.f").to_string()),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)?
            .map(|t| t.naive_local().format(TEMPORAL_FORMAT).to_string()),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map(|t| t.format(TEMPORAL_FORMAT).to_string())
        }
        #[allow(unreachable_patterns)]
        _ => None,
    };
    Ok(text)
}

fn no_session(name: &str) -> anyhow::Error {
    anyhow::anyhow!("No open session to {}", name)
}

#[async_trait]
impl Connector for SqlServerConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn query(&self, sql: &str) -> Result<Vec<TextRow>> {
        let mut session = self.session().await?;
        let client = session.client.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        let rows = client
            .simple_query(sql)
            .await
            .with_context(|| format!("Query failed on {}: {}", self.config.name, sql))?
            .into_first_result()
            .await?;

        rows.into_iter()
            .map(|row| row.into_iter().map(|cell| cell_to_text(&cell)).collect::<Result<TextRow>>())
            .collect()
    }

    async fn for_each_key(&self, sql: &str, f: &mut (dyn FnMut(i64) + Send)) -> Result<u64> {
        let mut session = self.session().await?;
        let client = session.client.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        let mut stream = client
            .simple_query(sql)
            .await
            .with_context(|| format!("Key query failed on {}: {}", self.config.name, sql))?
            .into_row_stream();

        let mut count = 0;
        while let Some(row) = stream.try_next().await? {
            if let Some(key) = row.try_get::<i64, _>(0)? {
                f(key);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut session = self.session().await?;
        let client = session.client.as_mut().ok_or_else(|| no_session(&self.config.name))?;
        let result = client.execute(sql, &[]).await?;
        Ok(result.total())
    }

    async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.client.take() {
            let _ = old.close().await;
        }
        session.client = Some(open_client(&self.config).await?);
        session.verified_at = Instant::now();
        Ok(())
    }
}
