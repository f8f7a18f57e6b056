use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;

use fleetstats_core::{FleetAggregateView, VehicleRecord};
use fleetstats_events::{AggregateChanged, Event, InMemoryEventBus, Subscription};
use fleetstats_infra::{
    BatchOutcome, BatchProcessor, FleetStatsConfig, InMemoryAggregateStore, InMemoryDedupLedger, IngestError,
    StoreError,
};

#[cfg(feature = "redis")]
use fleetstats_infra::{PostgresAggregateStore, PostgresDedupLedger, event_bus::RedisPubSubBus};
#[cfg(feature = "redis")]
use sqlx::postgres::PgPoolOptions;

type InMemoryProcessor = BatchProcessor<
    Arc<InMemoryDedupLedger>,
    Arc<InMemoryAggregateStore>,
    Arc<InMemoryEventBus<AggregateChanged>>,
>;

#[cfg(feature = "redis")]
type PersistentProcessor = BatchProcessor<
    Arc<PostgresDedupLedger>,
    Arc<PostgresAggregateStore>,
    Arc<RedisPubSubBus<AggregateChanged>>,
>;

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        processor: Arc<InMemoryProcessor>,
    },
    #[cfg(feature = "redis")]
    Persistent {
        processor: Arc<PersistentProcessor>,
    },
}

impl AppServices {
    pub async fn bootstrap(&self) -> Result<(), StoreError> {
        match self {
            AppServices::InMemory { processor } => processor.bootstrap().await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { processor } => processor.bootstrap().await,
        }
    }

    pub async fn process_batch(&self, records: &[VehicleRecord]) -> Result<BatchOutcome, IngestError> {
        match self {
            AppServices::InMemory { processor } => processor.process_batch(records).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { processor } => processor.process_batch(records).await,
        }
    }

    pub async fn statistics(&self) -> Result<FleetAggregateView, StoreError> {
        match self {
            AppServices::InMemory { processor } => processor.statistics().await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { processor } => processor.statistics().await,
        }
    }

    pub fn subscribe(&self) -> Subscription<AggregateChanged> {
        match self {
            AppServices::InMemory { processor } => processor.subscribe(),
            #[cfg(feature = "redis")]
            AppServices::Persistent { processor } => processor.subscribe(),
        }
    }
}

pub async fn build_services(config: &FleetStatsConfig) -> anyhow::Result<AppServices> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
            return Ok(build_in_memory_services(config));
        }
    }

    Ok(build_in_memory_services(config))
}

pub fn build_in_memory_services(config: &FleetStatsConfig) -> AppServices {
    let processor = BatchProcessor::new(
        Arc::new(InMemoryDedupLedger::new()),
        Arc::new(InMemoryAggregateStore::new()),
        Arc::new(InMemoryEventBus::new()),
        config.ingest_options(),
    );

    AppServices::InMemory {
        processor: Arc::new(processor),
    }
}

#[cfg(feature = "redis")]
async fn build_persistent_services(config: &FleetStatsConfig) -> anyhow::Result<AppServices> {
    use anyhow::Context;

    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(config.store_timeout)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    let bus = RedisPubSubBus::<AggregateChanged>::new(&config.redis_url, config.channel.clone())
        .context("failed to create Redis pub/sub bus")?;

    let processor = BatchProcessor::new(
        Arc::new(PostgresDedupLedger::new(pool.clone())),
        Arc::new(PostgresAggregateStore::new(pool)),
        Arc::new(bus),
        config.ingest_options(),
    );

    tracing::info!(channel = %config.channel, "persistent stores connected");

    Ok(AppServices::Persistent {
        processor: Arc::new(processor),
    })
}

/// SSE stream of post-merge snapshots, one `FleetStatisticsUpdated` event
/// per announcement.
///
/// The subscription is taken before returning, so any merge committed after
/// the response headers go out is delivered.
pub fn fleet_statistics_sse(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = services.subscribe();
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    // Blocking bridge: std mpsc subscription -> async stream.
    tokio::task::spawn_blocking(move || {
        loop {
            match subscription.recv_timeout(Duration::from_millis(500)) {
                Ok(changed) => {
                    let data = match serde_json::to_string(&changed.view) {
                        Ok(s) => s,
                        Err(_) => continue,
                    };
                    let event = SseEvent::default()
                        .event(changed.event_type())
                        .id(changed.event_id.to_string())
                        .data(data);
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
