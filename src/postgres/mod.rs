// ABOUTME: PostgreSQL source connectivity
// ABOUTME: Re-exports connection helpers used by the sync daemon

pub mod connection;

pub use connection::{connect, pg_config, PostgresConnector};
