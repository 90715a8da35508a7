// ABOUTME: Source-row and target-document shapes for film work replication
// ABOUTME: Entity kinds share a composed identity/timestamp stamp instead of inheritance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity and modification time carried by every replicated entity row.
///
/// The id is optional at this layer because rows are read before validation;
/// the transformer rejects rows without one.
#[derive(Debug, Clone, PartialEq)]
pub struct RowStamp {
    pub id: Option<Uuid>,
    pub modified: DateTime<Utc>,
}

impl RowStamp {
    pub fn new(id: Option<Uuid>, modified: DateTime<Utc>) -> Self {
        Self { id, modified }
    }
}

/// Role a person plays in a film work, stored in `person_film_work.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonRole {
    Actor,
    Writer,
    Director,
}

impl PersonRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonRole::Actor => "actor",
            PersonRole::Writer => "writer",
            PersonRole::Director => "director",
        }
    }
}

/// One denormalized film work row as returned by the change query.
///
/// Relation columns are `None` when the driver returned SQL NULL; the query
/// already coalesces to empty arrays, but the transformer does not rely on it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub stamp: RowStamp,
    pub title: Option<String>,
    pub description: Option<String>,
    pub imdb_rating: Option<f64>,
    pub genres: Option<Vec<String>>,
    pub directors: Option<Vec<String>>,
    pub actors_names: Option<Vec<String>>,
    pub writers_names: Option<Vec<String>>,
    /// JSON array of `{id, name}` objects
    pub actors: Option<serde_json::Value>,
    /// JSON array of `{id, name}` objects
    pub writers: Option<serde_json::Value>,
}

impl SourceRecord {
    /// A record with only identity and timestamp set; every other column absent.
    pub fn bare(id: Option<Uuid>, modified: DateTime<Utc>) -> Self {
        Self {
            stamp: RowStamp::new(id, modified),
            title: None,
            description: None,
            imdb_rating: None,
            genres: None,
            directors: None,
            actors_names: None,
            writers_names: None,
            actors: None,
            writers: None,
        }
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.stamp.modified
    }
}

/// A person reference nested in the target document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// The document written to the search index, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmDocument {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
}
