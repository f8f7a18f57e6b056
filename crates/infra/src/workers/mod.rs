//! Background workers driving the ingest pipeline.

pub mod ingest_worker;

pub use ingest_worker::{IngestWorker, WorkerHandle};
