// ABOUTME: HTTP client for the Elasticsearch-compatible search index
// ABOUTME: Ping, index existence/creation, and bulk submission over reqwest

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use super::bulk::BulkResponse;
use super::loader::BulkLoader;
use crate::replication::guardian::Connector;
use crate::utils::sanitize_url;

#[derive(Clone)]
pub struct ElasticClient {
    http: Client,
    base_url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl ElasticClient {
    /// Build a client. Credentials embedded in the URL are sent as basic auth.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Elasticsearch URL '{}'", sanitize_url(base_url)))?;

        let credentials = if base_url.username().is_empty() {
            None
        } else {
            Some((
                base_url.username().to_string(),
                base_url.password().map(str::to_string),
            ))
        };
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Failed to build URL for '{}'", path))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let mut request = self.http.request(method, self.url(path)?);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }
        Ok(request)
    }

    /// Check that the cluster answers.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .request(reqwest::Method::GET, "/")?
            .send()
            .await
            .with_context(|| format!("Failed to reach Elasticsearch at {}", self.base_url))?;

        if !response.status().is_success() {
            bail!(
                "Elasticsearch at {} answered ping with status {}",
                self.base_url,
                response.status()
            );
        }
        Ok(())
    }

    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::HEAD, index)?
            .send()
            .await
            .with_context(|| format!("Failed to check whether index '{}' exists", index))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => bail!(
                "Unexpected status {} checking index '{}'",
                status,
                index
            ),
        }
    }

    /// Create an index from a settings/mappings document.
    ///
    /// Losing a creation race to another writer is not an error.
    pub async fn create_index(&self, index: &str, definition: &serde_json::Value) -> Result<()> {
        let response = self
            .request(reqwest::Method::PUT, index)?
            .json(definition)
            .send()
            .await
            .with_context(|| format!("Failed to create index '{}'", index))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception")
        {
            tracing::debug!("Index '{}' was created concurrently", index);
            return Ok(());
        }
        bail!(
            "Index creation for '{}' failed with status {}: {}",
            index,
            status,
            body
        );
    }

    /// Submit an NDJSON bulk body.
    pub async fn bulk(&self, body: String) -> Result<BulkResponse> {
        let response = self
            .request(reqwest::Method::POST, "_bulk")?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("Failed to submit bulk request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Bulk request failed with status {}: {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse bulk response")
    }
}

/// Opens (pings) the search index endpoint for a [`Guardian`](crate::replication::guardian::Guardian)
/// and hands back a loader bound to it.
pub struct ElasticConnector {
    url: String,
    timeout: Duration,
}

impl ElasticConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for ElasticConnector {
    type Connection = BulkLoader;

    fn endpoint(&self) -> String {
        format!("elasticsearch {}", sanitize_url(&self.url))
    }

    async fn connect(&self) -> Result<BulkLoader> {
        let client = ElasticClient::new(&self.url, self.timeout)?;
        client.ping().await?;
        Ok(BulkLoader::new(client))
    }
}
