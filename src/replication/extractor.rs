// ABOUTME: Change extractor - reads film works modified after the watermark in batches
// ABOUTME: One query execution per pass, pulled through a portal batch_size rows at a time

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_postgres::{Client, IsolationLevel, Portal, Row, Transaction};

use super::models::{PersonRole, RowStamp, SourceRecord};
use super::state::Cursor;
use crate::utils::quote_ident;

/// An ordered, finite sequence of record batches.
#[async_trait]
pub trait BatchSource: Send {
    /// Next batch, or `None` once the sequence is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<SourceRecord>>>;

    /// Release the underlying query/transaction.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

fn person_names(role: PersonRole, alias: &str) -> String {
    format!(
        "COALESCE(ARRAY_AGG(DISTINCT p.full_name) \
         FILTER (WHERE pfw.role = '{role}' AND p.id IS NOT NULL), \
         ARRAY[]::text[]) AS {alias}",
        role = role.as_str(),
        alias = alias
    )
}

fn person_refs(role: PersonRole, alias: &str) -> String {
    format!(
        "COALESCE(JSONB_AGG(DISTINCT JSONB_BUILD_OBJECT('id', p.id, 'name', p.full_name)) \
         FILTER (WHERE pfw.role = '{role}' AND p.id IS NOT NULL), \
         '[]'::jsonb) AS {alias}",
        role = role.as_str(),
        alias = alias
    )
}

/// Build the change query for the given (already validated) schema.
///
/// Parameters: `$1` watermark (exclusive), `$2` rows of the window to skip.
/// Rows are ordered by `(modified, id)` so re-issuing with the same
/// parameters yields the same sequence.
pub fn build_change_query(schema: &str) -> String {
    let schema = quote_ident(schema);
    let columns = [
        "fw.id".to_string(),
        "fw.rating AS imdb_rating".to_string(),
        "fw.title".to_string(),
        "fw.description".to_string(),
        "fw.modified::timestamptz AS modified".to_string(),
        "COALESCE(ARRAY_AGG(DISTINCT g.name) FILTER (WHERE g.id IS NOT NULL), ARRAY[]::text[]) AS genres"
            .to_string(),
        person_names(PersonRole::Director, "directors"),
        person_names(PersonRole::Actor, "actors_names"),
        person_names(PersonRole::Writer, "writers_names"),
        person_refs(PersonRole::Actor, "actors"),
        person_refs(PersonRole::Writer, "writers"),
    ];

    format!(
        "SELECT {columns} \
         FROM {schema}.film_work AS fw \
         LEFT OUTER JOIN {schema}.person_film_work AS pfw ON pfw.film_work_id = fw.id \
         LEFT OUTER JOIN {schema}.person AS p ON p.id = pfw.person_id \
         LEFT OUTER JOIN {schema}.genre_film_work AS gfw ON gfw.film_work_id = fw.id \
         LEFT OUTER JOIN {schema}.genre AS g ON g.id = gfw.genre_id \
         WHERE fw.modified > $1::timestamptz \
         GROUP BY fw.id \
         ORDER BY fw.modified, fw.id \
         OFFSET $2",
        columns = columns.join(", "),
        schema = schema
    )
}

/// Decode one change-query row.
pub fn record_from_row(row: &Row) -> Result<SourceRecord> {
    Ok(SourceRecord {
        stamp: RowStamp::new(
            row.try_get("id").context("Failed to decode id")?,
            row.try_get("modified").context("Failed to decode modified")?,
        ),
        title: row.try_get("title").context("Failed to decode title")?,
        description: row
            .try_get("description")
            .context("Failed to decode description")?,
        imdb_rating: row
            .try_get("imdb_rating")
            .context("Failed to decode imdb_rating")?,
        genres: row.try_get("genres").context("Failed to decode genres")?,
        directors: row
            .try_get("directors")
            .context("Failed to decode directors")?,
        actors_names: row
            .try_get("actors_names")
            .context("Failed to decode actors_names")?,
        writers_names: row
            .try_get("writers_names")
            .context("Failed to decode writers_names")?,
        actors: row.try_get("actors").context("Failed to decode actors")?,
        writers: row.try_get("writers").context("Failed to decode writers")?,
    })
}

/// Reads the changes eligible under one cursor.
///
/// The query runs in a read-only repeatable-read transaction so every batch
/// comes from the same snapshot. Dropping the extractor without `close`
/// rolls the transaction back, which is harmless for a read.
pub struct ChangeExtractor<'a> {
    transaction: Transaction<'a>,
    portal: Portal,
    batch_size: usize,
    rows_read: u64,
    exhausted: bool,
}

impl<'a> ChangeExtractor<'a> {
    /// Issue the change query for `cursor`.
    pub async fn start(
        client: &'a mut Client,
        schema: &str,
        cursor: &Cursor,
        batch_size: usize,
    ) -> Result<Self> {
        let transaction = client
            .build_transaction()
            .isolation_level(IsolationLevel::RepeatableRead)
            .read_only(true)
            .start()
            .await
            .context("Failed to start read transaction on source")?;

        let offset = i64::try_from(cursor.offset).context("Cursor offset out of range")?;
        let query = build_change_query(schema);
        let portal = transaction
            .bind(query.as_str(), &[&cursor.watermark, &offset])
            .await
            .with_context(|| {
                format!(
                    "Failed to execute change query (watermark {}, offset {})",
                    cursor.watermark, cursor.offset
                )
            })?;

        tracing::debug!(
            watermark = %cursor.watermark,
            offset = cursor.offset,
            batch_size,
            "change query issued"
        );

        Ok(Self {
            transaction,
            portal,
            batch_size: batch_size.max(1),
            rows_read: 0,
            exhausted: false,
        })
    }
}

#[async_trait]
impl<'a> BatchSource for ChangeExtractor<'a> {
    async fn next_batch(&mut self) -> Result<Option<Vec<SourceRecord>>> {
        if self.exhausted {
            return Ok(None);
        }

        let max_rows = i32::try_from(self.batch_size).unwrap_or(i32::MAX);
        let rows = self
            .transaction
            .query_portal(&self.portal, max_rows)
            .await
            .context("Failed to fetch change batch")?;

        if rows.len() < self.batch_size {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        self.rows_read += rows.len() as u64;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(records))
    }

    async fn close(self) -> Result<()> {
        tracing::debug!(rows = self.rows_read, "change query closed");
        self.transaction
            .commit()
            .await
            .context("Failed to close source read transaction")
    }
}
