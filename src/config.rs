// ABOUTME: Replicator configuration: defaults, optional TOML file, CLI/env overrides
// ABOUTME: Built once at startup and passed by reference to every component

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{expand_home, validate_postgres_identifier};

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub sync: SyncConfig,
    pub backoff: BackoffConfig,
}

/// TLS negotiation mode for the source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SslModeSetting {
    Disable,
    #[default]
    Prefer,
    Require,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    /// Schema namespace holding the film_work/person/genre tables
    pub schema: String,
    pub sslmode: SslModeSetting,
    /// Accept self-signed server certificates (testing only)
    pub accept_invalid_certs: bool,
    pub connect_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "movies_database".to_string(),
            user: "app".to_string(),
            password: None,
            schema: "content".to_string(),
            sslmode: SslModeSetting::default(),
            accept_invalid_certs: false,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Base URL of the Elasticsearch HTTP API
    pub url: String,
    pub index: String,
    /// JSON file with the index settings and mappings used on creation
    pub schema_file: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            index: "movies".to_string(),
            schema_file: PathBuf::from("init_schema_es.json"),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rows pulled from the source per batch
    pub batch_size: usize,
    /// Sleep between passes
    pub poll_interval_secs: u64,
    /// Where the cursor is persisted
    pub state_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval_secs: 30,
            state_path: PathBuf::from("storage.json"),
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Reconnect backoff constants shared by both connection guardians.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
    /// Attempt counter wraps back to 1 when it reaches this value
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts: 15,
        }
    }
}

/// Command-line/environment overrides layered on top of the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Path to a TOML config file
    #[arg(long = "config", env = "REPLICATOR_CONFIG", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Source PostgreSQL host
    #[arg(long = "db-host", env = "DB_HOST")]
    pub db_host: Option<String>,
    /// Source PostgreSQL port
    #[arg(long = "db-port", env = "DB_PORT")]
    pub db_port: Option<u16>,
    /// Source database name
    #[arg(long = "db-name", env = "DB_NAME")]
    pub db_name: Option<String>,
    /// Source database user
    #[arg(long = "db-user", env = "DB_USER")]
    pub db_user: Option<String>,
    /// Source database password
    #[arg(long = "db-password", env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,
    /// Schema namespace of the source tables
    #[arg(long = "db-schema", env = "DB_SCHEMA")]
    pub db_schema: Option<String>,
    /// TLS mode for the source connection
    #[arg(long = "db-sslmode", env = "DB_SSLMODE", value_enum)]
    pub db_sslmode: Option<SslModeSetting>,
    /// Accept self-signed TLS certificates (insecure - use only for testing)
    #[arg(long = "accept-invalid-certs", default_value_t = false)]
    pub accept_invalid_certs: bool,

    /// Elasticsearch base URL
    #[arg(long = "elastic-url", env = "ELASTIC_URL")]
    pub elastic_url: Option<String>,
    /// Target index name
    #[arg(long = "index", env = "ELASTIC_INDEX")]
    pub index: Option<String>,
    /// Index schema (settings + mappings) JSON file
    #[arg(long = "index-schema", env = "ELASTIC_SCHEMA_FILE", value_name = "PATH")]
    pub index_schema: Option<PathBuf>,

    /// Rows per batch
    #[arg(long = "batch-size", env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,
    /// Seconds to sleep between passes
    #[arg(long = "poll-interval-secs", env = "POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,
    /// Cursor state file
    #[arg(long = "state-path", env = "STATE_PATH", value_name = "PATH")]
    pub state_path: Option<PathBuf>,

    /// Initial reconnect delay in milliseconds
    #[arg(long = "backoff-base-ms")]
    pub backoff_base_ms: Option<u64>,
    /// Reconnect delay growth factor
    #[arg(long = "backoff-factor")]
    pub backoff_factor: Option<f64>,
    /// Reconnect delay ceiling in milliseconds
    #[arg(long = "backoff-max-ms")]
    pub backoff_max_ms: Option<u64>,
    /// Attempts before the backoff counter wraps
    #[arg(long = "backoff-max-attempts")]
    pub backoff_max_attempts: Option<u32>,
}

impl ReplicatorConfig {
    /// Build the effective configuration: defaults, then file, then overrides.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match &overrides.config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.source.schema = config.source.schema.trim().to_string();
        config.sink.schema_file = expand_home(config.sink.schema_file)?;
        config.sync.state_path = expand_home(config.sync.state_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file. Missing sections and keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }

        set(&mut self.source.host, &overrides.db_host);
        set(&mut self.source.port, &overrides.db_port);
        set(&mut self.source.dbname, &overrides.db_name);
        set(&mut self.source.user, &overrides.db_user);
        if overrides.db_password.is_some() {
            self.source.password = overrides.db_password.clone();
        }
        set(&mut self.source.schema, &overrides.db_schema);
        set(&mut self.source.sslmode, &overrides.db_sslmode);
        if overrides.accept_invalid_certs {
            self.source.accept_invalid_certs = true;
        }

        set(&mut self.sink.url, &overrides.elastic_url);
        set(&mut self.sink.index, &overrides.index);
        set(&mut self.sink.schema_file, &overrides.index_schema);

        set(&mut self.sync.batch_size, &overrides.batch_size);
        set(&mut self.sync.poll_interval_secs, &overrides.poll_interval_secs);
        set(&mut self.sync.state_path, &overrides.state_path);

        set(&mut self.backoff.base_delay_ms, &overrides.backoff_base_ms);
        set(&mut self.backoff.factor, &overrides.backoff_factor);
        set(&mut self.backoff.max_delay_ms, &overrides.backoff_max_ms);
        set(&mut self.backoff.max_attempts, &overrides.backoff_max_attempts);
    }

    pub fn validate(&self) -> Result<()> {
        validate_postgres_identifier(&self.source.schema)
            .context("Invalid source schema name")?;

        if self.sync.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }

        let sink_url = url::Url::parse(&self.sink.url)
            .with_context(|| format!("Invalid Elasticsearch URL '{}'", self.sink.url))?;
        if !matches!(sink_url.scheme(), "http" | "https") {
            bail!(
                "Elasticsearch URL must use http or https, got '{}'",
                sink_url.scheme()
            );
        }

        let index = &self.sink.index;
        if index.is_empty()
            || index.starts_with(['_', '-', '+'])
            || index.chars().any(|c| {
                c.is_ascii_uppercase() || matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|' | ' ' | ',' | '#' | ':')
            })
        {
            bail!("Invalid index name '{}'", index);
        }

        if self.backoff.base_delay_ms == 0 || self.backoff.max_delay_ms == 0 {
            bail!("Backoff delays must be positive");
        }
        if !(self.backoff.factor.is_finite() && self.backoff.factor > 0.0) {
            bail!("Backoff factor must be a positive number");
        }
        if self.backoff.max_attempts < 2 {
            bail!("backoff max_attempts must be at least 2");
        }

        Ok(())
    }
}
