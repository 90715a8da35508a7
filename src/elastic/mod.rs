// ABOUTME: Search index sink - HTTP client, bulk request types, and the bulk loader
// ABOUTME: Targets the Elasticsearch REST API (_bulk, index create/exists)

pub mod bulk;
pub mod client;
pub mod loader;

pub use bulk::{Batch, BulkFailure, BulkOutcome, BulkResponse, IndexAction};
pub use client::{ElasticClient, ElasticConnector};
pub use loader::{load_index_schema, BulkLoader, DocumentSink};
