//! Security-scan findings stored as a repo → commit → file → finding graph.
//!
//! Findings are deduplicated by their scanner fingerprint; re-ingesting a
//! known fingerprint only refreshes its `updated_at`.

pub mod config;
pub mod db;
pub mod engine;
pub mod explain;
pub mod models;

pub use config::Config;
pub use db::{DbHandle, StoreError};
pub use engine::ingest::{ingest_batch, IngestError, IngestMode, IngestReport, ItemFailure};
