//! Service wiring: stores, broker and the account-deletion consumer.
//!
//! `USE_PERSISTENT_STORES=false` (default) runs everything in memory;
//! `true` uses Postgres for journals and Redis Streams for deletion events.

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use journal_events::{AccountDeletionEvent, BrokerClient, InMemoryBroker, SubscriptionHandle};
use journal_infra::broker::RedisStreamsBroker;
use journal_infra::config::AppConfig;
use journal_infra::consumers::AccountDeletionConsumer;
use journal_infra::services::{JournalCreator, JournalQueries};
use journal_infra::store::{InMemoryJournalStore, JournalStore, PostgresJournalStore};

/// Consumer group shared by all replicas of this service.
const CONSUMER_GROUP: &str = "journal-service";

pub type DynStore = Arc<dyn JournalStore>;

/// Broker the deletion consumer is registered on.
#[derive(Clone)]
pub enum DeletionBroker {
    InMemory(InMemoryBroker<AccountDeletionEvent>),
    Redis(RedisStreamsBroker<AccountDeletionEvent>),
}

impl DeletionBroker {
    /// Publish a deletion event (used by tooling and tests; upstream services
    /// normally publish these).
    pub async fn publish(&self, queue: &str, event: AccountDeletionEvent) -> anyhow::Result<()> {
        match self {
            DeletionBroker::InMemory(b) => b.publish(queue, event).await?,
            DeletionBroker::Redis(b) => b.publish(queue, event).await?,
        }
        Ok(())
    }
}

/// Request-path services shared by all handlers.
pub struct AppServices {
    pub creator: JournalCreator<DynStore>,
    pub queries: JournalQueries<DynStore>,
    pub broker: DeletionBroker,
    pub deletion_queue: String,
}

/// Fully wired services plus the running deletion consumer.
pub struct Wiring {
    pub services: Arc<AppServices>,
    pub deletion_consumer: SubscriptionHandle,
}

impl Wiring {
    /// Stop the deletion consumer and wait for it.
    pub async fn shutdown(self) {
        self.deletion_consumer.shutdown().await;
    }
}

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Wiring> {
    if config.use_persistent_stores {
        return build_persistent_services(config).await;
    }

    build_in_memory_services(&config.deletion_queue, config.max_deliveries).await
}

pub async fn build_in_memory_services(queue: &str, max_deliveries: u32) -> anyhow::Result<Wiring> {
    let store: DynStore = Arc::new(InMemoryJournalStore::new());
    let broker = InMemoryBroker::with_policy(max_deliveries, std::time::Duration::from_millis(100));

    let deletion_consumer = AccountDeletionConsumer::new(store.clone())
        .register(&broker, queue)
        .await
        .context("failed to register account deletion consumer")?;

    info!(queue = %queue, "in-memory services ready");
    Ok(wire(store, DeletionBroker::InMemory(broker), queue, deletion_consumer))
}

async fn build_persistent_services(config: &AppConfig) -> anyhow::Result<Wiring> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;

    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    let postgres = PostgresJournalStore::new(pool);
    postgres
        .ensure_schema()
        .await
        .context("failed to create journal schema")?;
    let store: DynStore = Arc::new(postgres);

    let consumer_name = std::env::var("HOSTNAME").unwrap_or_else(|_| "journal-api".to_string());
    let broker = RedisStreamsBroker::new(&config.redis_url, CONSUMER_GROUP, consumer_name)
        .context("failed to create Redis Streams broker")?
        .with_max_deliveries(config.max_deliveries);

    let deletion_consumer = AccountDeletionConsumer::new(store.clone())
        .register(&broker, &config.deletion_queue)
        .await
        .context("failed to register account deletion consumer")?;

    info!(queue = %config.deletion_queue, "persistent services ready");
    Ok(wire(
        store,
        DeletionBroker::Redis(broker),
        &config.deletion_queue,
        deletion_consumer,
    ))
}

fn wire(
    store: DynStore,
    broker: DeletionBroker,
    queue: &str,
    deletion_consumer: SubscriptionHandle,
) -> Wiring {
    let services = AppServices {
        creator: JournalCreator::new(store.clone()),
        queries: JournalQueries::new(store),
        broker,
        deletion_queue: queue.to_string(),
    };

    Wiring {
        services: Arc::new(services),
        deletion_consumer,
    }
}
