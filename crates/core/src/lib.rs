//! `fleetstats-core`: fleet statistics domain primitives.
//!
//! This crate contains **pure domain** logic (no infrastructure concerns):
//! record validation, the batch summarizer, the commutative merge algebra of
//! the global aggregate, and the read-time projection served to consumers.

pub mod aggregate;
pub mod error;
pub mod record;
pub mod summary;
pub mod view;

pub use aggregate::{FleetAggregate, HpStats, FLEET_AGGREGATE_ID};
pub use error::{DomainError, DomainResult, RecordRejection};
pub use record::{decade_label, Aid, VehicleRecord};
pub use summary::{summarize, BatchSummary, HpSummary};
pub use view::{decade_display_key, FleetAggregateView, HpStatsView};
