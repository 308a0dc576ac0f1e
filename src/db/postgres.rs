// ABOUTME: PostgreSQL connector on tokio-postgres with native-tls
// ABOUTME: Serializes all calls on one client and reconnects stale sessions

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{pin_mut, TryStreamExt};
use postgres_native_tls::MakeTlsConnector;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_postgres::{Client, SimpleQueryMessage};

use super::{Connector, Dialect, TextRow, VERIFY_INTERVAL};
use crate::config::DatabaseConfig;

struct Session {
    client: Client,
    verified_at: Instant,
}

pub struct PostgresConnector {
    config: DatabaseConfig,
    session: Mutex<Session>,
}

impl PostgresConnector {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let client = open_client(config).await?;
        Ok(Self {
            config: config.clone(),
            session: Mutex::new(Session {
                client,
                verified_at: Instant::now(),
            }),
        })
    }

    /// Lock the session, validating it first if it has been idle a while.
    async fn session(&self) -> Result<tokio::sync::MutexGuard<'_, Session>> {
        let mut session = self.session.lock().await;
        if session.client.is_closed() || session.verified_at.elapsed() >= VERIFY_INTERVAL {
            let alive = !session.client.is_closed()
                && session.client.simple_query("SELECT 1").await.is_ok();
            if !alive {
                tracing::warn!("(db) connection to {} is stale, reconnecting", self.config.name);
                session.client = open_client(&self.config).await?;
            }
            session.verified_at = Instant::now();
        }
        Ok(session)
    }
}

async fn open_client(config: &DatabaseConfig) -> Result<Client> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(&config.url, tls)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {} at {}",
                config.name,
                config.display_url()
            )
        })?;

    let name = config.name.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("(db) connection error on {}: {}", name, e);
        }
    });

    Ok(client)
}

#[async_trait]
impl Connector for PostgresConnector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn query(&self, sql: &str) -> Result<Vec<TextRow>> {
        let session = self.session().await?;
        let messages = session
            .client
            .simple_query(sql)
            .await
            .with_context(|| format!("Query failed on {}: {}", self.config.name, sql))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
        }
        Ok(rows)
    }

    async fn for_each_key(&self, sql: &str, f: &mut (dyn FnMut(i64) + Send)) -> Result<u64> {
        let session = self.session().await?;
        let stream = session
            .client
            .query_raw(sql, Vec::<String>::new())
            .await
            .with_context(|| format!("Key query failed on {}: {}", self.config.name, sql))?;
        pin_mut!(stream);

        let mut count = 0;
        while let Some(row) = stream.try_next().await? {
            let key: Option<i64> = row.try_get(0)?;
            if let Some(key) = key {
                f(key);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let session = self.session().await?;
        let messages = session.client.simple_query(sql).await?;
        let affected = messages
            .iter()
            .map(|message| match message {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        Ok(affected)
    }

    async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session.client = open_client(&self.config).await?;
        session.verified_at = Instant::now();
        Ok(())
    }
}
