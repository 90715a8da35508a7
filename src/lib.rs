// ABOUTME: Library root for search-replicator
// ABOUTME: Exposes config, source/sink connectivity, and the replication engine

pub mod config;
pub mod elastic;
pub mod postgres;
pub mod replication;
pub mod utils;
