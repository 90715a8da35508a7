// ABOUTME: SyncDaemon - drives extract/transform/load passes and advances the cursor
// ABOUTME: Polls forever: connect, replicate all eligible changes, persist, sleep

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio_postgres::Client;

use super::extractor::{BatchSource, ChangeExtractor};
use super::guardian::{Backoff, Connector, Guardian};
use super::state::{Cursor, StateStore};
use super::transform::transform;
use crate::config::{ReplicatorConfig, SinkConfig};
use crate::elastic::{Batch, DocumentSink, ElasticConnector};
use crate::postgres::PostgresConnector;

/// Statistics from one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassStats {
    pub batches: u64,
    pub rows_read: u64,
    pub documents_loaded: u64,
    pub documents_failed: u64,
    pub records_skipped: u64,
    pub duration_ms: u64,
    /// Cursor after the pass completed
    pub cursor: Cursor,
}

impl PassStats {
    pub fn is_caught_up(&self) -> bool {
        self.rows_read == 0
    }
}

/// Replicate every batch `source` yields, then close the window.
///
/// `cursor` is the position `source` was opened at. After each loaded batch
/// the offset advances by the rows consumed (loaded or skipped) and state is
/// persisted. Once the source is exhausted it is closed, the watermark moves
/// to the newest modification time seen and the offset resets to 0.
///
/// A batch whose bulk upsert fails outright, or where retryable failures
/// (429, 5xx) are a majority, aborts the pass with the cursor left at the
/// previous batch so the next pass retries it. Permanently rejected documents
/// are logged and passed over.
pub async fn run_pass<S, K>(
    mut source: S,
    sink: &K,
    state: &mut StateStore,
    cursor: Cursor,
    sink_config: &SinkConfig,
) -> Result<PassStats>
where
    S: BatchSource,
    K: DocumentSink + ?Sized,
{
    let start = Instant::now();
    let mut stats = PassStats::default();
    let mut offset = cursor.offset;
    let mut observed_max = None;

    while let Some(records) = source.next_batch().await? {
        stats.batches += 1;
        let consumed = records.len() as u64;
        stats.rows_read += consumed;

        let mut batch = Batch::new(sink_config.index.as_str());
        let mut last_modified = None;
        for record in records {
            let row_modified = record.modified();
            match transform(record) {
                Ok(transformed) => {
                    last_modified = Some(transformed.modified);
                    batch.push(transformed.document);
                }
                Err(e) => {
                    // Skipped rows still count as consumed
                    last_modified = Some(row_modified);
                    stats.records_skipped += 1;
                    tracing::warn!("Skipping invalid record: {}", e);
                }
            }
        }

        if !batch.is_empty() {
            sink.ensure_index(&sink_config.index, &sink_config.schema_file)
                .await?;
            let outcome = sink.bulk_upsert(&batch).await?;

            for failure in &outcome.failures {
                tracing::error!(
                    id = %failure.id,
                    status = failure.status,
                    kind = %failure.kind,
                    "Document rejected by index: {}",
                    failure.reason
                );
            }
            stats.documents_loaded += outcome.succeeded as u64;
            stats.documents_failed += outcome.failed() as u64;

            if !outcome.is_acceptable() {
                bail!(
                    "Bulk upsert hit retryable failures for {} of {} documents at offset {}; batch will be retried",
                    outcome.retryable(),
                    outcome.submitted,
                    offset
                );
            }
            if outcome.failed() > 0 {
                tracing::warn!(
                    "{} of {} documents rejected at offset {}; continuing past them",
                    outcome.failed(),
                    outcome.submitted,
                    offset
                );
            }
        }

        offset += consumed;
        state.record_batch(offset, last_modified);
        state.persist().await?;
        observed_max = observed_max.max(last_modified);

        tracing::debug!(
            batch = stats.batches,
            rows = consumed,
            offset,
            "Batch replicated"
        );
    }

    source.close().await?;

    stats.cursor = state.complete_pass(observed_max);
    state.persist().await?;
    stats.duration_ms = start.elapsed().as_millis() as u64;

    if stats.is_caught_up() {
        tracing::debug!("No changes since {}", cursor.watermark);
    } else {
        tracing::info!(
            "Replicated {} rows in {} batches ({} loaded, {} rejected, {} skipped); watermark {} -> {}",
            stats.rows_read,
            stats.batches,
            stats.documents_loaded,
            stats.documents_failed,
            stats.records_skipped,
            cursor.watermark,
            stats.cursor.watermark
        );
    }

    Ok(stats)
}

/// A source connection that can replicate the changes eligible under a cursor.
#[async_trait]
pub trait ChangeFeed: Send {
    /// Open the change stream for `cursor` and run one pass of it into `sink`.
    async fn replicate<K>(
        &mut self,
        config: &ReplicatorConfig,
        cursor: Cursor,
        sink: &K,
        state: &mut StateStore,
    ) -> Result<PassStats>
    where
        K: DocumentSink + ?Sized;
}

#[async_trait]
impl ChangeFeed for Client {
    async fn replicate<K>(
        &mut self,
        config: &ReplicatorConfig,
        cursor: Cursor,
        sink: &K,
        state: &mut StateStore,
    ) -> Result<PassStats>
    where
        K: DocumentSink + ?Sized,
    {
        let extractor = ChangeExtractor::start(
            self,
            &config.source.schema,
            &cursor,
            config.sync.batch_size,
        )
        .await?;
        run_pass(extractor, sink, state, cursor, &config.sink).await
    }
}

/// Long-running replicator.
///
/// Each pass:
/// 1. Acquires a source connection (retrying forever)
/// 2. Loads or initializes the cursor
/// 3. Acquires a sink connection (retrying forever)
/// 4. Replicates every eligible change batch by batch
/// 5. Closes the source and advances the watermark
pub struct SyncDaemon<S: Connector, K: Connector> {
    config: ReplicatorConfig,
    state: StateStore,
    source: Guardian<S>,
    sink: Guardian<K>,
}

impl SyncDaemon<PostgresConnector, ElasticConnector> {
    /// Daemon for the configured PostgreSQL source and Elasticsearch sink.
    pub async fn new(config: ReplicatorConfig) -> Self {
        let source = PostgresConnector::new(config.source.clone());
        let sink = ElasticConnector::new(
            config.sink.url.clone(),
            Duration::from_secs(config.sink.request_timeout_secs),
        );
        Self::with_connectors(config, source, sink).await
    }
}

impl<S, K> SyncDaemon<S, K>
where
    S: Connector,
    S::Connection: ChangeFeed,
    K: Connector,
    K::Connection: DocumentSink,
{
    pub async fn with_connectors(config: ReplicatorConfig, source: S, sink: K) -> Self {
        let backoff = Backoff::from_config(&config.backoff);
        let state = StateStore::open(&config.sync.state_path).await;

        Self {
            source: Guardian::new(source, backoff.clone()),
            sink: Guardian::new(sink, backoff),
            config,
            state,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn source_guardian(&self) -> &Guardian<S> {
        &self.source
    }

    pub fn sink_guardian(&self) -> &Guardian<K> {
        &self.sink
    }

    /// Run a single pass over all currently eligible changes.
    ///
    /// Both connections are released when the pass ends, successfully or not.
    pub async fn run_once(&mut self) -> Result<PassStats> {
        let mut connection = self.source.acquire().await;
        let result = self.pass(&mut connection).await;

        drop(connection);
        self.source.release();
        self.sink.release();
        result
    }

    async fn pass(&mut self, connection: &mut S::Connection) -> Result<PassStats> {
        // Persisted before the sink is contacted, so a fresh start is durable
        // even while the sink stays unreachable
        let cursor = self.state.ensure_cursor().await?;
        let sink = self.sink.acquire().await;
        connection
            .replicate(&self.config, cursor, &sink, &mut self.state)
            .await
    }

    /// Run passes forever, sleeping the poll interval between them.
    ///
    /// Pass failures are logged and retried on the next pass; this never
    /// returns on its own.
    pub async fn run(&mut self) -> Result<()> {
        let poll_interval = self.config.sync.poll_interval();
        tracing::info!(
            "Starting SyncDaemon with poll_interval={:?}, batch_size={}, index='{}'",
            poll_interval,
            self.config.sync.batch_size,
            self.config.sink.index
        );

        let mut passes = 0u64;
        loop {
            passes += 1;
            match self.run_once().await {
                Ok(stats) => {
                    tracing::info!(
                        "Pass {} completed: {} rows, {} loaded in {}ms (watermark {}, offset {})",
                        passes,
                        stats.rows_read,
                        stats.documents_loaded,
                        stats.duration_ms,
                        stats.cursor.watermark,
                        stats.cursor.offset
                    );
                }
                Err(e) => {
                    tracing::error!("Pass {} failed: {:#}", passes, e);
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
