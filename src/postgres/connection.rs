// ABOUTME: Source PostgreSQL connection setup with native TLS
// ABOUTME: Builds tokio-postgres config from SourceConfig and drives the connection task

use anyhow::{Context, Result};
use async_trait::async_trait;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::Client;

use crate::config::{SourceConfig, SslModeSetting};
use crate::replication::guardian::Connector;

const APPLICATION_NAME: &str = "search-replicator";

/// Translate our config into a tokio-postgres connection config.
pub fn pg_config(source: &SourceConfig) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&source.host)
        .port(source.port)
        .dbname(&source.dbname)
        .user(&source.user)
        .application_name(APPLICATION_NAME)
        .connect_timeout(Duration::from_secs(source.connect_timeout_secs))
        .ssl_mode(match source.sslmode {
            SslModeSetting::Disable => SslMode::Disable,
            SslModeSetting::Prefer => SslMode::Prefer,
            SslModeSetting::Require => SslMode::Require,
        });
    if let Some(password) = &source.password {
        config.password(password);
    }
    config
}

/// Open a connection and spawn its driver task.
///
/// Dropping the returned client closes the connection.
pub async fn connect(source: &SourceConfig) -> Result<Client> {
    let tls = TlsConnector::builder()
        .danger_accept_invalid_certs(source.accept_invalid_certs)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(tls);

    let (client, connection) = pg_config(source).connect(tls).await.with_context(|| {
        format!(
            "Failed to connect to PostgreSQL at {}:{}/{}",
            source.host, source.port, source.dbname
        )
    })?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// Opens source connections for a [`Guardian`](crate::replication::guardian::Guardian).
pub struct PostgresConnector {
    source: SourceConfig,
}

impl PostgresConnector {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    type Connection = Client;

    fn endpoint(&self) -> String {
        format!(
            "postgresql {}@{}:{}/{}",
            self.source.user, self.source.host, self.source.port, self.source.dbname
        )
    }

    async fn connect(&self) -> Result<Client> {
        connect(&self.source).await
    }
}
