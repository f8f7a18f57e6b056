use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use fleetstats_events::{AggregateChanged, Event, EventBus, Subscription, VehicleBatch};

use crate::aggregate_store::AggregateStore;
use crate::ingest::{BatchProcessor, IngestError};
use crate::ledger::DedupLedger;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// True once the worker thread has exited, e.g. because its source
    /// disconnected.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A batch already being processed is finished first.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Record-source driver: pulls `VehicleBatch`es off a bus and feeds them to
/// a shared [`BatchProcessor`].
///
/// Many workers (threads, processes, machines) may consume the same source;
/// the dedup ledger keeps their contributions exactly-once.
#[derive(Debug)]
pub struct IngestWorker;

impl IngestWorker {
    /// Spawn a worker thread. Async store calls run on `runtime`.
    pub fn spawn<SB, L, S, B>(
        name: &'static str,
        source: SB,
        processor: Arc<BatchProcessor<L, S, B>>,
        runtime: Handle,
    ) -> std::io::Result<WorkerHandle>
    where
        SB: EventBus<VehicleBatch> + 'static,
        L: DedupLedger + 'static,
        S: AggregateStore + Clone + 'static,
        B: EventBus<AggregateChanged> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<VehicleBatch> = source.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, &processor, &runtime))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<L, S, B>(
    name: &'static str,
    sub: Subscription<VehicleBatch>,
    shutdown_rx: mpsc::Receiver<()>,
    processor: &BatchProcessor<L, S, B>,
    runtime: &Handle,
) where
    L: DedupLedger,
    S: AggregateStore + Clone,
    B: EventBus<AggregateChanged>,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(batch) => ingest(name, &batch, processor, runtime),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Feed one delivery to the processor, re-submitting it wholesale while the
/// failure is transient and the processor's retry budget allows.
///
/// The source does not redeliver on its own, so a batch that exhausts the
/// budget is dropped with an `error!`.
fn ingest<L, S, B>(name: &'static str, batch: &VehicleBatch, processor: &BatchProcessor<L, S, B>, runtime: &Handle)
where
    L: DedupLedger,
    S: AggregateStore + Clone,
    B: EventBus<AggregateChanged>,
{
    let batch_id = batch.batch_id;
    let policy = &processor.options().retry;
    let mut attempt = 0u32;

    loop {
        match runtime.block_on(processor.process_batch(&batch.records)) {
            Ok(outcome) => {
                info!(
                    worker = name,
                    event = batch.event_type(),
                    %batch_id,
                    queued_ms = (Utc::now() - batch.occurred_at()).num_milliseconds(),
                    resubmissions = attempt,
                    accepted = outcome.accepted,
                    duplicates = outcome.duplicates,
                    rejected = outcome.rejected.len(),
                    "batch ingested"
                );
                return;
            }
            // Under merge-then-mark a timed-out merge may have committed, so
            // re-submitting can over-count; the ledger absorbs every other case.
            Err(err) if err.is_transient() && policy.should_retry(attempt) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    worker = name,
                    %batch_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "batch not ingested; re-submitting"
                );
                thread::sleep(delay);
            }
            Err(err @ IngestError::Store(_)) => {
                error!(worker = name, %batch_id, resubmissions = attempt, error = %err, "batch dropped after store failures");
                return;
            }
            Err(err) => {
                error!(worker = name, %batch_id, error = %err, "batch partially ingested");
                return;
            }
        }
    }
}
