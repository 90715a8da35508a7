// ABOUTME: Maps raw change-query rows into index documents
// ABOUTME: Normalizes absent relations to empty lists and validates required fields

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::models::{FilmDocument, PersonRef, SourceRecord};

/// Why a single source row could not become a document.
///
/// Validation failures drop the row, never the batch.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("record is missing required field `{field}` (id: {})", display_id(.id))]
    MissingField {
        field: &'static str,
        id: Option<Uuid>,
    },
    #[error("record has invalid field `{field}` (id: {}): {reason}", display_id(.id))]
    InvalidField {
        field: &'static str,
        id: Option<Uuid>,
        reason: String,
    },
}

fn display_id(id: &Option<Uuid>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

/// A valid document plus the modification time of the row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub document: FilmDocument,
    pub modified: DateTime<Utc>,
}

/// Convert one source row into a target document.
pub fn transform(record: SourceRecord) -> Result<Transformed, ValidationError> {
    let modified = record.stamp.modified;
    let id = record.stamp.id.ok_or(ValidationError::MissingField {
        field: "id",
        id: None,
    })?;

    let title = match record.title {
        Some(title) if !title.trim().is_empty() => title,
        _ => {
            return Err(ValidationError::MissingField {
                field: "title",
                id: Some(id),
            })
        }
    };

    if let Some(rating) = record.imdb_rating {
        if !rating.is_finite() {
            return Err(ValidationError::InvalidField {
                field: "imdb_rating",
                id: Some(id),
                reason: format!("rating must be a finite number, got {}", rating),
            });
        }
    }

    let document = FilmDocument {
        id,
        imdb_rating: record.imdb_rating,
        genre: record.genres.unwrap_or_default(),
        title,
        description: record.description,
        director: record.directors.unwrap_or_default(),
        actors_names: record.actors_names.unwrap_or_default(),
        writers_names: record.writers_names.unwrap_or_default(),
        actors: person_refs("actors", id, record.actors)?,
        writers: person_refs("writers", id, record.writers)?,
    };

    Ok(Transformed { document, modified })
}

/// Decode a JSON array of `{id, name}` objects; SQL NULL and JSON null become empty.
fn person_refs(
    field: &'static str,
    id: Uuid,
    value: Option<serde_json::Value>,
) -> Result<Vec<PersonRef>, ValidationError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(value) => {
            serde_json::from_value(value).map_err(|e| ValidationError::InvalidField {
                field,
                id: Some(id),
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn modified() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 16, 20, 14, 9).unwrap()
    }

    fn full_record(id: Uuid) -> SourceRecord {
        let actor = Uuid::new_v4();
        SourceRecord {
            title: Some("Star Wars".to_string()),
            description: Some("A long time ago".to_string()),
            imdb_rating: Some(8.6),
            genres: Some(vec!["Action".to_string(), "Sci-Fi".to_string()]),
            directors: Some(vec!["George Lucas".to_string()]),
            actors_names: Some(vec!["Mark Hamill".to_string()]),
            writers_names: Some(vec!["George Lucas".to_string()]),
            actors: Some(json!([{"id": actor, "name": "Mark Hamill"}])),
            writers: Some(json!([])),
            ..SourceRecord::bare(Some(id), modified())
        }
    }

    #[test]
    fn test_transform_full_record() {
        let id = Uuid::new_v4();
        let transformed = transform(full_record(id)).unwrap();

        assert_eq!(transformed.modified, modified());
        let doc = transformed.document;
        assert_eq!(doc.id, id);
        assert_eq!(doc.title, "Star Wars");
        assert_eq!(doc.imdb_rating, Some(8.6));
        assert_eq!(doc.genre, vec!["Action", "Sci-Fi"]);
        assert_eq!(doc.director, vec!["George Lucas"]);
        assert_eq!(doc.actors.len(), 1);
        assert_eq!(doc.actors[0].name, "Mark Hamill");
        assert!(doc.writers.is_empty());
    }

    #[test]
    fn test_absent_relations_become_empty_collections() {
        let id = Uuid::new_v4();
        let record = SourceRecord {
            title: Some("Lonely Film".to_string()),
            actors: Some(serde_json::Value::Null),
            ..SourceRecord::bare(Some(id), modified())
        };

        let doc = transform(record).unwrap().document;
        assert!(doc.genre.is_empty());
        assert!(doc.director.is_empty());
        assert!(doc.actors_names.is_empty());
        assert!(doc.writers_names.is_empty());
        assert!(doc.actors.is_empty());
        assert!(doc.writers.is_empty());
        assert_eq!(doc.imdb_rating, None);

        // Serialized form carries empty arrays, never null or missing keys
        let value = serde_json::to_value(&doc).unwrap();
        for field in [
            "genre",
            "director",
            "actors_names",
            "writers_names",
            "actors",
            "writers",
        ] {
            assert_eq!(value[field], json!([]), "field {} should be []", field);
        }
    }

    #[test]
    fn test_missing_id_is_rejected() {
        let record = SourceRecord {
            title: Some("No Identity".to_string()),
            ..SourceRecord::bare(None, modified())
        };
        assert_eq!(
            transform(record),
            Err(ValidationError::MissingField {
                field: "id",
                id: None
            })
        );
    }

    #[test]
    fn test_blank_title_is_rejected() {
        let id = Uuid::new_v4();
        let record = SourceRecord {
            title: Some("   ".to_string()),
            ..SourceRecord::bare(Some(id), modified())
        };
        let err = transform(record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                field: "title",
                id: Some(id)
            }
        );
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_malformed_person_refs_are_rejected() {
        let id = Uuid::new_v4();
        let record = SourceRecord {
            writers: Some(json!([{"id": "not-a-uuid", "name": "Nobody"}])),
            ..full_record(id)
        };
        match transform(record) {
            Err(ValidationError::InvalidField { field, id: got, .. }) => {
                assert_eq!(field, "writers");
                assert_eq!(got, Some(id));
            }
            other => panic!("expected invalid writers, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_rating_is_rejected() {
        let id = Uuid::new_v4();
        let record = SourceRecord {
            imdb_rating: Some(f64::INFINITY),
            ..full_record(id)
        };
        assert!(matches!(
            transform(record),
            Err(ValidationError::InvalidField {
                field: "imdb_rating",
                ..
            })
        ));
    }
}
