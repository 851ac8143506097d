//! Shared harness: a full engine wired against the mock venue, an
//! in-memory SQLite store, and a capturing publisher. Balance updates are
//! driven through the coordinator's manual injection path so tests stay
//! deterministic.

use riskguard::application::coordinator::{Coordinator, CoordinatorConfig};
use riskguard::application::enforcement::{ActionExecutor, ActionSlotRegistry, EnforcementConfig};
use riskguard::application::feed::{FeedConfig, FeedMode, FeedMultiplexer};
use riskguard::domain::events::EventSequence;
use riskguard::domain::ports::{ExchangeAdapter, NotificationPublisher, UserDirectory};
use riskguard::domain::repositories::AccountStateStore;
use riskguard::domain::risk::{RiskLimit, RiskLimits};
use riskguard::domain::types::{ClientRecord, Credentials, Venue};
use riskguard::infrastructure::directory::InMemoryUserDirectory;
use riskguard::infrastructure::mock::{CapturingPublisher, MockExchange};
use riskguard::infrastructure::persistence::{Database, SqliteAccountStore};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const CLIENT: &str = "client-1";

pub struct TestEngine {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<dyn AccountStateStore>,
    pub exchange: Arc<MockExchange>,
    pub publisher: Arc<CapturingPublisher>,
    pub directory: Arc<InMemoryUserDirectory>,
    pub executor: Arc<ActionExecutor>,
    pub events: EventSequence,
}

impl TestEngine {
    /// Push one balance through the full pipeline and wait for it to be
    /// processed.
    pub async fn feed_balance(&self, balance: Decimal) {
        self.coordinator
            .inject_manual_balance(CLIENT, balance)
            .await
            .expect("inject balance");
        assert!(
            self.coordinator
                .quiesce(CLIENT, Duration::from_secs(5))
                .await,
            "pipeline did not quiesce"
        );
    }

    pub async fn feed_sequence(&self, balances: &[Decimal]) {
        for balance in balances {
            self.feed_balance(*balance).await;
        }
    }
}

pub async fn engine_with_limits(
    initial_balance: Decimal,
    daily_risk: RiskLimit,
    max_risk: RiskLimit,
) -> TestEngine {
    let database = Database::new("sqlite::memory:").await.expect("database");
    let events = EventSequence::default();

    let store: Arc<dyn AccountStateStore> =
        Arc::new(SqliteAccountStore::new(database, events.clone()));
    let publisher = Arc::new(CapturingPublisher::new());
    let publisher_port: Arc<dyn NotificationPublisher> = publisher.clone();

    let directory = Arc::new(InMemoryUserDirectory::new());
    directory
        .register(
            ClientRecord {
                client_id: CLIENT.to_string(),
                venue: Venue::Futures,
                initial_balance,
                daily_risk,
                max_risk,
            },
            Credentials::new("test-key", "test-secret"),
        )
        .await;
    let directory_port: Arc<dyn UserDirectory> = directory.clone();

    let exchange = Arc::new(MockExchange::new(Venue::Futures, initial_balance));
    let mut adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert(Venue::Futures, exchange.clone());

    let slots = Arc::new(ActionSlotRegistry::new());
    let executor = Arc::new(ActionExecutor::new(
        adapters.clone(),
        directory_port.clone(),
        store.clone(),
        publisher_port.clone(),
        slots,
        events.clone(),
        EnforcementConfig {
            close_retry_max: 3,
            retry_base_delay: Duration::from_millis(10),
        },
    ));

    // Poll interval far beyond test duration: updates are injected
    // manually, the feed task just idles.
    let feed = FeedMultiplexer::new(
        directory_port.clone(),
        events.clone(),
        FeedConfig {
            mode: FeedMode::Poll,
            poll_interval: Duration::from_secs(3600),
            stale_threshold: Duration::from_secs(7200),
            reconnect_ceiling: Duration::from_secs(60),
        },
    );

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        directory_port,
        adapters,
        executor.clone(),
        publisher_port,
        feed,
        events.clone(),
        CoordinatorConfig {
            queue_depth: 64,
            stop_grace: Duration::from_secs(5),
        },
    ));

    coordinator
        .start_monitoring(CLIENT)
        .await
        .expect("start monitoring");

    TestEngine {
        coordinator,
        store,
        exchange,
        publisher,
        directory,
        executor,
        events,
    }
}

/// Default scenario setup: 10000 initial, daily ABSOLUTE 200, max
/// PERCENTAGE 10 (threshold 1000).
pub async fn engine() -> TestEngine {
    engine_with_limits(
        Decimal::from(10000),
        RiskLimit::Absolute(Decimal::from(200)),
        RiskLimit::Percentage(Decimal::from(10)),
    )
    .await
}

#[allow(dead_code)]
pub fn limits(daily: RiskLimit, max: RiskLimit) -> RiskLimits {
    RiskLimits {
        daily_risk: daily,
        max_risk: max,
    }
}
