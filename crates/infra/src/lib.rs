//! Infrastructure layer: stores, ingest pipeline, config and transports.
//!
//! Control flow of one batch:
//!
//! ```text
//! record source → DedupLedger (filter) → summarize → AggregateStore (merge)
//!               → DedupLedger (mark) → ChangeNotifier → subscribers
//! ```

pub mod aggregate_store;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod ingest;
pub mod ledger;
pub mod notifier;
pub mod reader;
pub mod retry;
pub mod schema;
pub mod workers;


pub use aggregate_store::{AggregateStore, InMemoryAggregateStore, PostgresAggregateStore};
pub use config::{ConfigError, FleetStatsConfig};
pub use error::StoreError;
pub use ingest::{
    BatchOutcome, BatchProcessor, IngestError, IngestOptions, MergeOrder, ReconciliationStage, RejectedRecord,
};
pub use ledger::{DedupLedger, InMemoryDedupLedger, PostgresDedupLedger, ProcessedAid};
pub use notifier::ChangeNotifier;
pub use reader::AggregateProjectionReader;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use workers::{IngestWorker, WorkerHandle};
