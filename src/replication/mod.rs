// ABOUTME: Incremental replication engine from PostgreSQL film works to the search index
// ABOUTME: Cursor state, change extraction, transformation, reconnect guardians, and the daemon

pub mod daemon;
pub mod extractor;
pub mod guardian;
pub mod models;
pub mod state;
pub mod transform;

pub use daemon::{run_pass, ChangeFeed, PassStats, SyncDaemon};
pub use extractor::{build_change_query, BatchSource, ChangeExtractor};
pub use guardian::{Backoff, ConnectionState, Connector, Guardian};
pub use models::{FilmDocument, PersonRef, PersonRole, RowStamp, SourceRecord};
pub use state::{initial_watermark, Cursor, JsonFileStorage, StateStore};
pub use transform::{transform, Transformed, ValidationError};
