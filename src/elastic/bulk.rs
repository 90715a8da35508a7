// ABOUTME: Bulk request/response types for the search index
// ABOUTME: Builds NDJSON upsert bodies keyed by document id and summarizes per-item failures

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::replication::models::FilmDocument;

/// The `{"index": {...}}` control line preceding each document.
///
/// `index` (not `create`) so re-delivery of an id overwrites the stored copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexAction {
    index: ActionMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ActionMeta {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_id")]
    id: Uuid,
}

impl IndexAction {
    pub fn new(index: &str, id: Uuid) -> Self {
        Self {
            index: ActionMeta {
                index: index.to_string(),
                id,
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.index.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    pub action: IndexAction,
    pub document: FilmDocument,
}

/// Ordered documents destined for one index, each paired with its action line.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    index: String,
    entries: Vec<BulkEntry>,
}

impl Batch {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, document: FilmDocument) {
        let action = IndexAction::new(&self.index, document.id);
        self.entries.push(BulkEntry { action, document });
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn entries(&self) -> &[BulkEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newline-delimited JSON body for the `_bulk` endpoint (trailing newline included).
    pub fn to_ndjson(&self) -> Result<String> {
        let mut body = String::new();
        for entry in &self.entries {
            body.push_str(
                &serde_json::to_string(&entry.action).context("Failed to serialize bulk action")?,
            );
            body.push('\n');
            body.push_str(
                &serde_json::to_string(&entry.document)
                    .with_context(|| format!("Failed to serialize document {}", entry.document.id))?,
            );
            body.push('\n');
        }
        Ok(body)
    }
}

/// Response body of a `_bulk` call.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponse {
    pub errors: bool,
    /// One entry per action, keyed by action name (`index`, `create`, ...)
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub status: u16,
    pub error: Option<BulkItemError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemError {
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: Option<String>,
}

/// A document the index refused.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: String,
    pub status: u16,
    pub kind: String,
    pub reason: String,
}

impl BulkFailure {
    /// Overload or server-side failure (429, 5xx) that may succeed on resubmit.
    ///
    /// Anything else (mapping errors, bad documents) fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        self.status == 429 || self.status >= 500
    }
}

/// Per-document result of one bulk call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkOutcome {
    pub submitted: usize,
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkOutcome {
    pub fn all_succeeded(submitted: usize) -> Self {
        Self {
            submitted,
            succeeded: submitted,
            failures: Vec::new(),
        }
    }

    pub fn from_response(submitted: usize, response: &BulkResponse) -> Self {
        let mut outcome = Self {
            submitted,
            ..Self::default()
        };
        for item in response.items.iter().flat_map(|entry| entry.values()) {
            if item.error.is_none() && (200..300).contains(&item.status) {
                outcome.succeeded += 1;
                continue;
            }
            let (kind, reason) = match &item.error {
                Some(err) => (err.kind.clone(), err.reason.clone().unwrap_or_default()),
                None => ("unknown".to_string(), format!("status {}", item.status)),
            };
            outcome.failures.push(BulkFailure {
                id: item.id.clone().unwrap_or_else(|| "<unknown>".to_string()),
                status: item.status,
                kind,
                reason,
            });
        }
        outcome
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Failures that may succeed if the batch is submitted again.
    pub fn retryable(&self) -> usize {
        self.failures.iter().filter(|f| f.is_retryable()).count()
    }

    /// Whether the batch counts as loaded.
    ///
    /// Permanent rejections never block: they are logged and the cursor moves
    /// past them. The batch is refused only when retryable failures make up a
    /// majority of the submitted documents.
    pub fn is_acceptable(&self) -> bool {
        self.retryable() * 2 <= self.submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn document(id: Uuid, title: &str) -> FilmDocument {
        FilmDocument {
            id,
            imdb_rating: Some(7.1),
            genre: vec!["Drama".to_string()],
            title: title.to_string(),
            description: None,
            director: vec![],
            actors_names: vec![],
            writers_names: vec![],
            actors: vec![],
            writers: vec![],
        }
    }

    #[test]
    fn test_ndjson_pairs_action_with_document() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut batch = Batch::new("movies");
        batch.push(document(a, "First"));
        batch.push(document(b, "Second"));

        let body = batch.to_ndjson().unwrap();
        assert!(body.ends_with('\n'));
        let lines: Vec<Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            json!({"index": {"_index": "movies", "_id": a.to_string()}})
        );
        assert_eq!(lines[1]["id"], json!(a.to_string()));
        assert_eq!(lines[1]["title"], json!("First"));
        assert_eq!(lines[2]["index"]["_id"], json!(b.to_string()));
        assert_eq!(lines[3]["title"], json!("Second"));
    }

    #[test]
    fn test_action_id_matches_document_id() {
        let id = Uuid::new_v4();
        let mut batch = Batch::new("movies");
        batch.push(document(id, "Only"));
        assert_eq!(batch.entries()[0].action.id(), id);
        assert_eq!(batch.index(), "movies");
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_outcome_from_mixed_response() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 12,
            "errors": true,
            "items": [
                {"index": {"_index": "movies", "_id": "a", "status": 200, "result": "updated"}},
                {"index": {"_index": "movies", "_id": "b", "status": 201, "result": "created"}},
                {"index": {"_index": "movies", "_id": "c", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "failed to parse field [imdb_rating]"}}}
            ]
        }))
        .unwrap();

        let outcome = BulkOutcome::from_response(3, &response);
        assert_eq!(outcome.submitted, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.failures[0].id, "c");
        assert_eq!(outcome.failures[0].status, 400);
        assert_eq!(outcome.failures[0].kind, "mapper_parsing_exception");
        assert!(outcome.failures[0].reason.contains("imdb_rating"));
        assert!(outcome.is_acceptable());
    }

    fn failure(status: u16, kind: &str) -> BulkFailure {
        BulkFailure {
            id: "x".to_string(),
            status,
            kind: kind.to_string(),
            reason: "rejected".to_string(),
        }
    }

    #[test]
    fn test_failure_retryability() {
        assert!(failure(429, "es_rejected_execution_exception").is_retryable());
        assert!(failure(503, "unavailable_shards_exception").is_retryable());
        assert!(!failure(400, "mapper_parsing_exception").is_retryable());
        assert!(!failure(409, "version_conflict_engine_exception").is_retryable());
    }

    #[test]
    fn test_retryable_majority_refuses_batch() {
        let overloaded = BulkOutcome {
            submitted: 3,
            succeeded: 1,
            failures: vec![
                failure(429, "es_rejected_execution_exception"),
                failure(429, "es_rejected_execution_exception"),
            ],
        };
        assert_eq!(overloaded.retryable(), 2);
        assert!(!overloaded.is_acceptable());

        let single = BulkOutcome {
            submitted: 1,
            succeeded: 0,
            failures: vec![failure(503, "unavailable_shards_exception")],
        };
        assert!(!single.is_acceptable());

        let minority = BulkOutcome {
            submitted: 3,
            succeeded: 2,
            failures: vec![failure(429, "es_rejected_execution_exception")],
        };
        assert!(minority.is_acceptable());
        assert!(BulkOutcome::all_succeeded(5).is_acceptable());
    }

    #[test]
    fn test_permanent_rejections_never_refuse_batch() {
        let all_rejected = BulkOutcome {
            submitted: 2,
            succeeded: 0,
            failures: vec![
                failure(400, "mapper_parsing_exception"),
                failure(400, "mapper_parsing_exception"),
            ],
        };
        assert_eq!(all_rejected.retryable(), 0);
        assert!(all_rejected.is_acceptable());

        let single = BulkOutcome {
            submitted: 1,
            succeeded: 0,
            failures: vec![failure(400, "illegal_argument_exception")],
        };
        assert!(single.is_acceptable());
    }
}
