// ABOUTME: Bulk loader - ensures the target index exists and upserts document batches
// ABOUTME: Per-document bulk failures are reported back, not swallowed

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use super::bulk::{Batch, BulkOutcome};
use super::client::ElasticClient;

/// Destination for transformed documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Create `index` from the schema file unless it already exists.
    async fn ensure_index(&self, index: &str, schema_path: &Path) -> Result<()>;

    /// Upsert every document of the batch in one request, keyed by id.
    async fn bulk_upsert(&self, batch: &Batch) -> Result<BulkOutcome>;
}

pub struct BulkLoader {
    client: ElasticClient,
}

impl BulkLoader {
    pub fn new(client: ElasticClient) -> Self {
        Self { client }
    }
}

/// Read an index definition (settings + mappings) from a JSON file.
pub async fn load_index_schema(path: &Path) -> Result<serde_json::Value> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read index schema from {:?}", path))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse index schema from {:?}", path))
}

#[async_trait]
impl DocumentSink for BulkLoader {
    async fn ensure_index(&self, index: &str, schema_path: &Path) -> Result<()> {
        if self.client.index_exists(index).await? {
            return Ok(());
        }

        let definition = load_index_schema(schema_path).await?;
        self.client.create_index(index, &definition).await?;
        tracing::info!("Created index '{}' from {:?}", index, schema_path);
        Ok(())
    }

    async fn bulk_upsert(&self, batch: &Batch) -> Result<BulkOutcome> {
        if batch.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let body = batch.to_ndjson()?;
        let response = self
            .client
            .bulk(body)
            .await
            .with_context(|| format!("Bulk upsert of {} documents failed", batch.len()))?;

        if !response.errors {
            return Ok(BulkOutcome::all_succeeded(batch.len()));
        }
        Ok(BulkOutcome::from_response(batch.len(), &response))
    }
}
