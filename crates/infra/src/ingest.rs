//! Ingest boundary: `process_batch` ties ledger, summarizer, merger and
//! notifier together.
//!
//! ## Ordering and failure bias
//!
//! The ledger mark and the aggregate merge are two separate atomic writes.
//! Which one goes first is a configuration decision ([`MergeOrder`]):
//!
//! | Order | Crash between the writes | Lost race on the ledger |
//! |-------|--------------------------|-------------------------|
//! | `MergeThenMark` (default) | redelivery merges again: over-count | identifier counted twice: over-count, reported |
//! | `MarkThenMerge` | identifier excluded forever: under-count | identifier excluded from this batch's summary |
//!
//! Both "second write failed" cases surface as
//! [`IngestError::ReconciliationRequired`] and are logged with
//! `alert = "fleet_stats_reconciliation"`.
//!
//! Reads (`filter_unprocessed`, `load`) and ledger marks are idempotent and
//! retried with backoff. The merge is not idempotent: it gets a single
//! bounded attempt.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fleetstats_core::{Aid, BatchSummary, FleetAggregate, FleetAggregateView, VehicleRecord, summarize};
use fleetstats_events::{AggregateChanged, EventBus, Subscription};

use crate::aggregate_store::AggregateStore;
use crate::error::StoreError;
use crate::ledger::DedupLedger;
use crate::notifier::ChangeNotifier;
use crate::reader::AggregateProjectionReader;
use crate::retry::{RetryPolicy, run_with_retry};

/// Log field value carried by every reconciliation alert.
pub const RECONCILIATION_ALERT: &str = "fleet_stats_reconciliation";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOrder {
    #[default]
    MergeThenMark,
    MarkThenMerge,
}

impl MergeOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOrder::MergeThenMark => "merge_then_mark",
            MergeOrder::MarkThenMerge => "mark_then_merge",
        }
    }
}

impl fmt::Display for MergeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge_then_mark" => Ok(MergeOrder::MergeThenMark),
            "mark_then_merge" => Ok(MergeOrder::MarkThenMerge),
            other => Err(format!(
                "unknown merge order '{other}' (expected merge_then_mark or mark_then_merge)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub merge_order: MergeOrder,
    /// Bound on each individual store call.
    pub store_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            merge_order: MergeOrder::default(),
            store_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// A record dropped before summarization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    /// Position in the submitted batch.
    pub index: usize,
    pub aid: Option<String>,
    pub code: &'static str,
    pub message: String,
}

/// What happened to a submitted batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Records whose contribution was merged by this call.
    pub accepted: usize,
    /// Records skipped because their identifier was already processed
    /// (earlier in the batch, by an earlier batch, or by a racing worker).
    pub duplicates: usize,
    pub rejected: Vec<RejectedRecord>,
    /// Merged records whose ledger entry was inserted by someone else
    /// first. Only possible with `MergeThenMark`.
    pub overcounted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStage {
    /// The merge committed, then marking the ledger failed.
    MarkAfterMerge,
    /// The ledger mark committed, then the merge failed.
    MergeAfterMark,
}

impl fmt::Display for ReconciliationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconciliationStage::MarkAfterMerge => f.write_str("mark after merge"),
            ReconciliationStage::MergeAfterMark => f.write_str("merge after mark"),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// The batch was not accounted for. Resubmitting it is absorbed by the
    /// ledger, except after a timed-out `MergeThenMark` merge: that statement
    /// may still have committed, and resubmission then over-counts.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// One of the two writes committed and the other did not.
    #[error("reconciliation required ({stage}) for {} identifiers: {source}", identifiers.len())]
    ReconciliationRequired {
        stage: ReconciliationStage,
        identifiers: Vec<Aid>,
        #[source]
        source: StoreError,
    },
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Store(e) if e.is_transient())
    }
}

/// Ingest driver for one deployment, shared by its workers behind an `Arc`.
#[derive(Debug)]
pub struct BatchProcessor<L, S, B> {
    ledger: L,
    store: S,
    reader: AggregateProjectionReader<S>,
    notifier: ChangeNotifier<B>,
    options: IngestOptions,
}

impl<L, S, B> BatchProcessor<L, S, B>
where
    L: DedupLedger,
    S: AggregateStore + Clone,
    B: EventBus<AggregateChanged>,
{
    pub fn new(ledger: L, store: S, bus: B, options: IngestOptions) -> Self {
        let reader = AggregateProjectionReader::new(store.clone(), options.retry.clone(), options.store_timeout);
        Self {
            ledger,
            store,
            reader,
            notifier: ChangeNotifier::new(bus),
            options,
        }
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Create the ledger uniqueness constraint and the aggregate key index.
    /// Safe to call on every start.
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        run_with_retry(&self.options.retry, self.options.store_timeout, "ensure_ledger_indexes", || {
            self.ledger.ensure_indexes()
        })
        .await?;
        run_with_retry(&self.options.retry, self.options.store_timeout, "ensure_aggregate_indexes", || {
            self.store.ensure_indexes()
        })
        .await?;
        info!("fleet statistics stores bootstrapped");
        Ok(())
    }

    /// Current statistics (zero view before the first merge).
    pub async fn statistics(&self) -> Result<FleetAggregateView, StoreError> {
        self.reader.read().await
    }

    /// Push subscription to post-merge snapshots.
    pub fn subscribe(&self) -> Subscription<AggregateChanged> {
        self.notifier.subscribe()
    }

    pub async fn process_batch(&self, records: &[VehicleRecord]) -> Result<BatchOutcome, IngestError> {
        let mut outcome = BatchOutcome::default();

        // Validate, then keep the first occurrence of every identifier.
        let mut seen = HashSet::with_capacity(records.len());
        let mut candidates: Vec<(Aid, &VehicleRecord)> = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match record.validate() {
                Ok(aid) => {
                    if seen.insert(aid.clone()) {
                        candidates.push((aid, record));
                    } else {
                        outcome.duplicates += 1;
                    }
                }
                Err(rejection) => {
                    warn!(index, aid = ?record.aid, reason = rejection.code(), "rejected malformed record");
                    outcome.rejected.push(RejectedRecord {
                        index,
                        aid: record.aid.clone(),
                        code: rejection.code(),
                        message: rejection.to_string(),
                    });
                }
            }
        }

        if candidates.is_empty() {
            return Ok(outcome);
        }

        let aids: Vec<Aid> = candidates.iter().map(|(aid, _)| aid.clone()).collect();
        let fresh: HashSet<Aid> = run_with_retry(
            &self.options.retry,
            self.options.store_timeout,
            "filter_unprocessed",
            || self.ledger.filter_unprocessed(&aids),
        )
        .await?
        .into_iter()
        .collect();

        let survivors: Vec<(Aid, &VehicleRecord)> = candidates
            .into_iter()
            .filter(|(aid, _)| fresh.contains(aid))
            .collect();
        outcome.duplicates += aids.len() - survivors.len();

        if survivors.is_empty() {
            debug!(duplicates = outcome.duplicates, "batch contained no new identifiers");
            return Ok(outcome);
        }

        match self.options.merge_order {
            MergeOrder::MergeThenMark => self.merge_then_mark(survivors, &mut outcome).await?,
            MergeOrder::MarkThenMerge => self.mark_then_merge(survivors, &mut outcome).await?,
        }

        info!(
            accepted = outcome.accepted,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected.len(),
            overcounted = outcome.overcounted,
            merge_order = %self.options.merge_order,
            "batch processed"
        );
        Ok(outcome)
    }

    async fn merge_then_mark(
        &self,
        survivors: Vec<(Aid, &VehicleRecord)>,
        outcome: &mut BatchOutcome,
    ) -> Result<(), IngestError> {
        let summary = summarize(survivors.iter().map(|(_, r)| *r));
        let merged = self.merge_once(&summary).await?;

        outcome.accepted = survivors.len();

        let aids: Vec<Aid> = survivors.into_iter().map(|(aid, _)| aid).collect();
        let marked = run_with_retry(
            &self.options.retry,
            self.options.store_timeout,
            "mark_processed",
            || self.ledger.mark_processed(&aids),
        )
        .await;

        // The merge committed either way.
        self.notifier.announce(FleetAggregateView::project(&merged));

        let inserted = match marked {
            Ok(inserted) => inserted,
            Err(source) => {
                error!(
                    alert = RECONCILIATION_ALERT,
                    stage = %ReconciliationStage::MarkAfterMerge,
                    identifiers = ?aids,
                    error = %source,
                    "aggregate merged but ledger mark failed; redelivery will over-count"
                );
                return Err(IngestError::ReconciliationRequired {
                    stage: ReconciliationStage::MarkAfterMerge,
                    identifiers: aids,
                    source,
                });
            }
        };

        if inserted.len() < aids.len() {
            let inserted: HashSet<&Aid> = inserted.iter().collect();
            let lost: Vec<&Aid> = aids.iter().filter(|a| !inserted.contains(a)).collect();
            outcome.overcounted = lost.len();
            warn!(
                alert = RECONCILIATION_ALERT,
                identifiers = ?lost,
                "identifiers merged by a racing worker as well; aggregate over-counted"
            );
        }

        Ok(())
    }

    async fn mark_then_merge(
        &self,
        survivors: Vec<(Aid, &VehicleRecord)>,
        outcome: &mut BatchOutcome,
    ) -> Result<(), IngestError> {
        let aids: Vec<Aid> = survivors.iter().map(|(aid, _)| aid.clone()).collect();
        let inserted: HashSet<Aid> = run_with_retry(
            &self.options.retry,
            self.options.store_timeout,
            "mark_processed",
            || self.ledger.mark_processed(&aids),
        )
        .await?
        .into_iter()
        .collect();

        // Identifiers another worker inserted first belong to its summary.
        let owned: Vec<(Aid, &VehicleRecord)> = survivors
            .into_iter()
            .filter(|(aid, _)| inserted.contains(aid))
            .collect();
        outcome.duplicates += aids.len() - owned.len();

        if owned.is_empty() {
            return Ok(());
        }

        let summary = summarize(owned.iter().map(|(_, r)| *r));
        let merged = match self.merge_once(&summary).await {
            Ok(merged) => merged,
            Err(source) => {
                let identifiers: Vec<Aid> = owned.into_iter().map(|(aid, _)| aid).collect();
                error!(
                    alert = RECONCILIATION_ALERT,
                    stage = %ReconciliationStage::MergeAfterMark,
                    identifiers = ?identifiers,
                    error = %source,
                    "ledger marked but aggregate merge failed; these identifiers are under-counted"
                );
                return Err(IngestError::ReconciliationRequired {
                    stage: ReconciliationStage::MergeAfterMark,
                    identifiers,
                    source,
                });
            }
        };

        outcome.accepted = owned.len();
        self.notifier.announce(FleetAggregateView::project(&merged));
        Ok(())
    }

    async fn merge_once(&self, summary: &BatchSummary) -> Result<FleetAggregate, StoreError> {
        run_with_retry(&RetryPolicy::no_retry(), self.options.store_timeout, "merge_aggregate", || {
            self.store.merge(summary)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate_store::InMemoryAggregateStore;
    use crate::ledger::InMemoryDedupLedger;
    use async_trait::async_trait;
    use fleetstats_events::InMemoryEventBus;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    type Processor = BatchProcessor<
        Arc<InMemoryDedupLedger>,
        Arc<InMemoryAggregateStore>,
        Arc<InMemoryEventBus<AggregateChanged>>,
    >;

    fn quick_options(merge_order: MergeOrder) -> IngestOptions {
        IngestOptions {
            merge_order,
            store_timeout: Duration::from_secs(1),
            retry: RetryPolicy::fixed(3, Duration::from_millis(1)),
        }
    }

    fn processor(merge_order: MergeOrder) -> Processor {
        BatchProcessor::new(
            Arc::new(InMemoryDedupLedger::new()),
            Arc::new(InMemoryAggregateStore::new()),
            Arc::new(InMemoryEventBus::new()),
            quick_options(merge_order),
        )
    }

    fn rec(aid: &str, t: &str, year: i32, sc: &str, hp: f64) -> VehicleRecord {
        VehicleRecord::new(aid)
            .with_type(t)
            .with_model_year(year)
            .with_speed_class(sc)
            .with_horsepower(hp)
    }

    fn reference_batch() -> Vec<VehicleRecord> {
        vec![
            rec("v1", "SUV", 1995, "Normal", 150.0),
            rec("v2", "Sedan", 2012, "Rapido", 200.0),
        ]
    }

    #[tokio::test]
    async fn reference_scenario() {
        let p = processor(MergeOrder::MergeThenMark);
        let out = p.process_batch(&reference_batch()).await.unwrap();
        assert_eq!(out.accepted, 2);
        assert_eq!(out.duplicates, 0);

        let view = p.statistics().await.unwrap();
        assert_eq!(view.total_vehicles, 2);
        assert_eq!(view.vehicles_by_type.get("SUV"), Some(&1));
        assert_eq!(view.vehicles_by_type.get("Sedan"), Some(&1));
        assert_eq!(view.vehicles_by_decade.get("decade1990s"), Some(&1));
        assert_eq!(view.vehicles_by_decade.get("decade2010s"), Some(&1));
        assert_eq!(view.hp_stats.min, 150.0);
        assert_eq!(view.hp_stats.max, 200.0);
        assert_eq!(view.hp_stats.sum, 350.0);
        assert_eq!(view.hp_stats.count, 2);
        assert_eq!(view.hp_stats.avg, 175.0);
    }

    #[tokio::test]
    async fn reingesting_a_batch_changes_nothing() {
        for order in [MergeOrder::MergeThenMark, MergeOrder::MarkThenMerge] {
            let p = processor(order);
            p.process_batch(&reference_batch()).await.unwrap();
            let before = p.statistics().await.unwrap();

            let again = p.process_batch(&reference_batch()).await.unwrap();
            assert_eq!(again.accepted, 0);
            assert_eq!(again.duplicates, 2);

            let after = p.statistics().await.unwrap();
            assert_eq!(before, after, "merge order {order}");
        }
    }

    #[tokio::test]
    async fn malformed_records_do_not_fail_the_batch() {
        let p = processor(MergeOrder::MergeThenMark);
        let batch = vec![
            rec("v1", "SUV", 1995, "Normal", 150.0),
            VehicleRecord {
                aid: None,
                ..rec("x", "SUV", 2000, "Lento", 90.0)
            },
            rec("  ", "SUV", 2000, "Lento", 90.0),
            rec("v9", "SUV", 2000, "Lento", -5.0),
        ];

        let out = p.process_batch(&batch).await.unwrap();
        assert_eq!(out.accepted, 1);
        assert_eq!(out.rejected.len(), 3);
        assert_eq!(out.rejected[0].index, 1);
        assert_eq!(out.rejected[0].code, "missing_aid");
        assert_eq!(out.rejected[2].code, "invalid_horsepower");
        assert_eq!(out.rejected[2].aid.as_deref(), Some("v9"));

        assert_eq!(p.statistics().await.unwrap().total_vehicles, 1);
    }

    #[tokio::test]
    async fn in_batch_duplicates_count_once() {
        let p = processor(MergeOrder::MergeThenMark);
        let batch = vec![
            rec("v1", "SUV", 1995, "Normal", 150.0),
            rec("v1", "Sedan", 2012, "Rapido", 999.0),
        ];

        let out = p.process_batch(&batch).await.unwrap();
        assert_eq!(out.accepted, 1);
        assert_eq!(out.duplicates, 1);

        let view = p.statistics().await.unwrap();
        assert_eq!(view.total_vehicles, 1);
        assert_eq!(view.vehicles_by_type.get("SUV"), Some(&1));
        assert_eq!(view.hp_stats.max, 150.0);
    }

    #[tokio::test]
    async fn empty_and_fully_duplicate_batches_announce_nothing() {
        let p = processor(MergeOrder::MergeThenMark);
        p.process_batch(&reference_batch()).await.unwrap();

        let sub = p.subscribe();
        p.process_batch(&[]).await.unwrap();
        p.process_batch(&reference_batch()).await.unwrap();

        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn each_merge_is_announced_with_the_post_merge_view() {
        let p = processor(MergeOrder::MergeThenMark);
        let sub = p.subscribe();

        p.process_batch(&reference_batch()).await.unwrap();

        let event = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(event.view.total_vehicles, 2);
        assert_eq!(event.view.hp_stats.avg, 175.0);
    }

    /// Ledger that lets every identifier through the filter, as if another
    /// worker's mark landed between our check and our insert.
    struct RacingLedger {
        inner: InMemoryDedupLedger,
    }

    #[async_trait]
    impl DedupLedger for RacingLedger {
        async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            Ok(aids.to_vec())
        }

        async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            self.inner.mark_processed(aids).await
        }

        async fn ensure_indexes(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    async fn racing_processor(
        order: MergeOrder,
    ) -> BatchProcessor<RacingLedger, Arc<InMemoryAggregateStore>, Arc<InMemoryEventBus<AggregateChanged>>> {
        let inner = InMemoryDedupLedger::new();
        // The racing winner already recorded v1.
        inner.mark_processed(&[Aid::new("v1").unwrap()]).await.unwrap();

        BatchProcessor::new(
            RacingLedger { inner },
            Arc::new(InMemoryAggregateStore::new()),
            Arc::new(InMemoryEventBus::new()),
            quick_options(order),
        )
    }

    #[tokio::test]
    async fn lost_race_is_excluded_under_mark_then_merge() {
        let p = racing_processor(MergeOrder::MarkThenMerge).await;

        let out = p.process_batch(&reference_batch()).await.unwrap();
        assert_eq!(out.accepted, 1);
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.overcounted, 0);

        let view = p.statistics().await.unwrap();
        assert_eq!(view.total_vehicles, 1);
        assert_eq!(view.vehicles_by_type.get("Sedan"), Some(&1));
        assert!(!view.vehicles_by_type.contains_key("SUV"));
    }

    #[tokio::test]
    async fn lost_race_is_reported_under_merge_then_mark() {
        let p = racing_processor(MergeOrder::MergeThenMark).await;

        let out = p.process_batch(&reference_batch()).await.unwrap();
        assert_eq!(out.accepted, 2);
        assert_eq!(out.overcounted, 1);
        assert_eq!(p.statistics().await.unwrap().total_vehicles, 2);
    }

    /// Ledger whose first `failures` filter calls are transient errors.
    struct FlakyLedger {
        inner: InMemoryDedupLedger,
        failures: AtomicU32,
    }

    #[async_trait]
    impl DedupLedger for FlakyLedger {
        async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.filter_unprocessed(aids).await
        }

        async fn mark_processed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            self.inner.mark_processed(aids).await
        }

        async fn ensure_indexes(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn transient_ledger_failures_are_retried() {
        let p = BatchProcessor::new(
            FlakyLedger {
                inner: InMemoryDedupLedger::new(),
                failures: AtomicU32::new(2),
            },
            Arc::new(InMemoryAggregateStore::new()),
            Arc::new(InMemoryEventBus::new()),
            quick_options(MergeOrder::MergeThenMark),
        );

        let out = p.process_batch(&reference_batch()).await.unwrap();
        assert_eq!(out.accepted, 2);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_surfaces_a_store_error() {
        let p = BatchProcessor::new(
            FlakyLedger {
                inner: InMemoryDedupLedger::new(),
                failures: AtomicU32::new(10),
            },
            Arc::new(InMemoryAggregateStore::new()),
            Arc::new(InMemoryEventBus::new()),
            quick_options(MergeOrder::MergeThenMark),
        );

        let err = p.process_batch(&reference_batch()).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(p.statistics().await.unwrap().total_vehicles, 0);
    }

    /// Aggregate store whose merge always fails.
    #[derive(Clone)]
    struct FailingStore;

    #[async_trait]
    impl AggregateStore for FailingStore {
        async fn merge(&self, _summary: &BatchSummary) -> Result<FleetAggregate, StoreError> {
            Err(StoreError::Database("disk full".into()))
        }

        async fn load(&self) -> Result<Option<FleetAggregate>, StoreError> {
            Ok(None)
        }

        async fn ensure_indexes(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn merge_failure_after_mark_requires_reconciliation() {
        let ledger = Arc::new(InMemoryDedupLedger::new());
        let p = BatchProcessor::new(
            ledger.clone(),
            FailingStore,
            Arc::new(InMemoryEventBus::new()),
            quick_options(MergeOrder::MarkThenMerge),
        );

        let err = p.process_batch(&reference_batch()).await.unwrap_err();
        match err {
            IngestError::ReconciliationRequired {
                stage, identifiers, ..
            } => {
                assert_eq!(stage, ReconciliationStage::MergeAfterMark);
                assert_eq!(identifiers.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.len(), 2);
    }

    /// Ledger whose marks never succeed. Notes whether an announcement was
    /// already out when a mark was attempted.
    struct UnmarkableLedger {
        inner: InMemoryDedupLedger,
        early_updates: Mutex<Subscription<AggregateChanged>>,
        announced_before_mark: AtomicBool,
    }

    #[async_trait]
    impl DedupLedger for UnmarkableLedger {
        async fn filter_unprocessed(&self, aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            self.inner.filter_unprocessed(aids).await
        }

        async fn mark_processed(&self, _aids: &[Aid]) -> Result<Vec<Aid>, StoreError> {
            if self.early_updates.lock().unwrap().try_recv().is_ok() {
                self.announced_before_mark.store(true, Ordering::SeqCst);
            }
            Err(StoreError::Unavailable("ledger offline".into()))
        }

        async fn ensure_indexes(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn mark_failure_after_merge_still_announces_afterwards() {
        let bus = Arc::new(InMemoryEventBus::<AggregateChanged>::new());
        let ledger = Arc::new(UnmarkableLedger {
            inner: InMemoryDedupLedger::new(),
            early_updates: Mutex::new(bus.subscribe()),
            announced_before_mark: AtomicBool::new(false),
        });
        let p = BatchProcessor::new(
            ledger.clone(),
            Arc::new(InMemoryAggregateStore::new()),
            bus,
            quick_options(MergeOrder::MergeThenMark),
        );
        let updates = p.subscribe();

        let err = p.process_batch(&reference_batch()).await.unwrap_err();
        match err {
            IngestError::ReconciliationRequired {
                stage, identifiers, ..
            } => {
                assert_eq!(stage, ReconciliationStage::MarkAfterMerge);
                assert_eq!(identifiers.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(!ledger.announced_before_mark.load(Ordering::SeqCst));
        let event = updates.try_recv().unwrap();
        assert_eq!(event.view.total_vehicles, 2);
        assert_eq!(p.statistics().await.unwrap().total_vehicles, 2);
    }

    #[tokio::test]
    async fn merge_failure_before_mark_leaves_batch_retryable() {
        let ledger = Arc::new(InMemoryDedupLedger::new());
        let p = BatchProcessor::new(
            ledger.clone(),
            FailingStore,
            Arc::new(InMemoryEventBus::new()),
            quick_options(MergeOrder::MergeThenMark),
        );

        let err = p.process_batch(&reference_batch()).await.unwrap_err();
        assert!(matches!(err, IngestError::Store(StoreError::Database(_))));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let p = processor(MergeOrder::MergeThenMark);
        p.bootstrap().await.unwrap();
        p.bootstrap().await.unwrap();
    }

    #[test]
    fn merge_order_parses_config_values() {
        assert_eq!("merge_then_mark".parse::<MergeOrder>().unwrap(), MergeOrder::MergeThenMark);
        assert_eq!(" MARK_THEN_MERGE ".parse::<MergeOrder>().unwrap(), MergeOrder::MarkThenMerge);
        assert!("both".parse::<MergeOrder>().is_err());
        assert_eq!(MergeOrder::default(), MergeOrder::MergeThenMark);
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<VehicleRecord>> {
        prop::collection::vec(
            (
                0u32..40,
                prop::sample::select(vec!["SUV", "PickUp", "Sedan"]),
                1970i32..2030,
                0u32..1500,
            )
                .prop_map(|(id, t, y, hp)| rec(&format!("v{id}"), t, y, "Normal", f64::from(hp))),
            0..12,
        )
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Resubmitting any batch leaves the statistics unchanged, and the
        /// total equals the number of distinct identifiers ever seen.
        #[test]
        fn ingest_is_idempotent(batches in prop::collection::vec(batch_strategy(), 1..5)) {
            let rt = runtime();
            rt.block_on(async {
                let p = processor(MergeOrder::MergeThenMark);
                let mut distinct = HashSet::new();

                for b in &batches {
                    p.process_batch(b).await.unwrap();
                    let once = p.statistics().await.unwrap();
                    p.process_batch(b).await.unwrap();
                    let twice = p.statistics().await.unwrap();
                    assert_eq!(once, twice);

                    distinct.extend(b.iter().filter_map(|r| r.aid.clone()));
                }

                assert_eq!(p.statistics().await.unwrap().total_vehicles, distinct.len() as u64);
            });
        }

        /// Disjoint batches give the same counters in either order.
        #[test]
        fn ingest_order_does_not_matter(a in batch_strategy(), b in batch_strategy()) {
            let rt = runtime();
            rt.block_on(async {
                // Make the identifier sets disjoint.
                let b: Vec<_> = b
                    .into_iter()
                    .map(|r| VehicleRecord { aid: r.aid.map(|id| format!("b-{id}")), ..r })
                    .collect();

                let forward = processor(MergeOrder::MergeThenMark);
                forward.process_batch(&a).await.unwrap();
                forward.process_batch(&b).await.unwrap();

                let backward = processor(MergeOrder::MergeThenMark);
                backward.process_batch(&b).await.unwrap();
                backward.process_batch(&a).await.unwrap();

                let mut f = forward.statistics().await.unwrap();
                let mut r = backward.statistics().await.unwrap();
                f.last_updated = None;
                r.last_updated = None;
                assert_eq!(f, r);
            });
        }
    }
}
