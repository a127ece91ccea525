//! Background ingestion: webhook batches are queued and ingested off the
//! request path.

pub mod worker;

pub use worker::{IngestTicket, IngestWorker, WorkerConfig, WorkerError};
