//! Riskguard server - risk monitoring and enforcement engine
//!
//! Watches registered client accounts at the configured venues, enforces
//! daily and maximum loss limits, and exposes the admin control plane.
//!
//! # Usage
//! ```sh
//! DATABASE_URL=sqlite://data/riskguard.db cargo run
//! ```
//!
//! # Environment Variables
//! - `MONITORING_MODE` - `stream` or `poll` (default: poll)
//! - `POLL_INTERVAL_SECS` - balance poll cadence (default: 10)
//! - `DAILY_RESET_TIME` - UTC reset instant, HH:MM (default: 00:01)
//! - `HTTP_BIND_ADDR` - admin API bind address (default: 0.0.0.0:8080)
//! - `FUTURES_*` / `SPOT_*` - venue routing (base/demo/ws URLs, demo switch)

use anyhow::Result;
use riskguard::application::coordinator::{Coordinator, CoordinatorConfig};
use riskguard::application::enforcement::{ActionExecutor, ActionSlotRegistry, EnforcementConfig};
use riskguard::application::feed::{FeedConfig, FeedMultiplexer};
use riskguard::application::scheduler::{Scheduler, SchedulerConfig};
use riskguard::config::Config;
use riskguard::domain::events::EventSequence;
use riskguard::domain::ports::{ExchangeAdapter, NotificationPublisher, UserDirectory};
use riskguard::domain::repositories::AccountStateStore;
use riskguard::domain::types::Venue;
use riskguard::infrastructure::bus::NotificationBus;
use riskguard::infrastructure::directory::InMemoryUserDirectory;
use riskguard::infrastructure::exchange::{FuturesVenueAdapter, SpotVenueAdapter};
use riskguard::infrastructure::persistence::{Database, SqliteAccountStore};
use riskguard::interfaces::http::{AppState, router};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Riskguard {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Mode={:?}, PollInterval={:?}, Reset={}",
        config.monitoring.mode, config.monitoring.poll_interval, config.monitoring.reset_time
    );

    let database = Database::new(&config.database_url).await?;
    let events = EventSequence::starting_at(database.max_event_id().await? + 1);

    let store: Arc<dyn AccountStateStore> =
        Arc::new(SqliteAccountStore::new(database.clone(), events.clone()));
    let bus = Arc::new(NotificationBus::new(
        database.clone(),
        config.monitoring.bus_message_ttl,
        NotificationBus::DEFAULT_RETRY_MAX,
    ));
    let publisher: Arc<dyn NotificationPublisher> = bus.clone();
    let directory = Arc::new(InMemoryUserDirectory::new());
    let directory_port: Arc<dyn UserDirectory> = directory.clone();

    let mut adapters: HashMap<Venue, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert(
        Venue::Futures,
        Arc::new(FuturesVenueAdapter::new(
            config.venues.futures.effective_url().to_string(),
            config.venues.futures.ws_url.clone(),
        )),
    );
    adapters.insert(
        Venue::Spot,
        Arc::new(SpotVenueAdapter::new(
            config.venues.spot.effective_url().to_string(),
        )),
    );

    let slots = Arc::new(ActionSlotRegistry::new());
    let executor = Arc::new(ActionExecutor::new(
        adapters.clone(),
        directory_port.clone(),
        store.clone(),
        publisher.clone(),
        slots,
        events.clone(),
        EnforcementConfig {
            close_retry_max: config.monitoring.close_retry_max,
            ..Default::default()
        },
    ));

    let feed = FeedMultiplexer::new(
        directory_port.clone(),
        events.clone(),
        FeedConfig {
            mode: config.monitoring.mode,
            poll_interval: config.monitoring.poll_interval,
            stale_threshold: config.monitoring.stale_threshold,
            reconnect_ceiling: std::time::Duration::from_secs(60),
        },
    );

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        directory_port,
        adapters,
        executor,
        publisher.clone(),
        feed,
        events.clone(),
        CoordinatorConfig {
            queue_depth: config.monitoring.queue_depth,
            stop_grace: config.monitoring.stop_grace,
        },
    ));

    let scheduler = Arc::new(Scheduler::new(
        store,
        publisher,
        events,
        SchedulerConfig {
            reset_time: config.monitoring.reset_time,
            stale_check_interval: config.monitoring.stale_check_interval,
            stale_threshold: config.monitoring.stale_threshold,
        },
    ));
    let scheduler_handle = scheduler.start();

    let app_state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        directory,
    });
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.http_bind_addr).await?;
    info!("Admin API listening on {}", config.http_bind_addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Admin API server failed: {}", e);
        }
    });

    info!("Riskguard running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping sessions...");

    scheduler_handle.shutdown();
    coordinator.shutdown().await;
    server.abort();

    info!("Shutdown complete.");
    Ok(())
}
