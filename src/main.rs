use std::sync::Arc;

use rail_alerts::clock::SystemClock;
use rail_alerts::commands::CommandHandler;
use rail_alerts::config::AppConfig;
use rail_alerts::feed::ConsoleFeed;
use rail_alerts::replica::{spawn_listener, ReplicaSynchronizer};
use rail_alerts::store::{AlertStore, PgAlertStore};
use rail_alerts::sweeper::EscalationSweeper;
use rail_alerts::{db, kafka};
use tokio::sync::broadcast;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Rail Alerts Service...");

    // Init DB
    let pool = db::init_pool(&config.database_url, &config.pool_settings()).await?;
    let pg_store = PgAlertStore::new(pool, config.notify_channel.clone());
    pg_store.ensure_schema().await?;
    info!("Connected to database");

    let store: Arc<dyn AlertStore> = Arc::new(pg_store);
    let clock = Arc::new(SystemClock);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Replica + feed
    let synchronizer = Arc::new(ReplicaSynchronizer::new(
        store.clone(),
        config.sync_settings(),
    ));
    let replica = synchronizer.replica();
    let feed_task = spawn_listener(
        &replica,
        Arc::new(ConsoleFeed::new(clock.clone(), config.escalation_policy())),
        shutdown_tx.subscribe(),
    );
    let sync_task = {
        let synchronizer = synchronizer.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { synchronizer.run(shutdown).await })
    };

    // Escalation
    let sweeper = Arc::new(EscalationSweeper::new(
        store.clone(),
        replica.clone(),
        clock,
        config.escalation_policy(),
    ));
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_tx.subscribe()));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = signal_tx.send(());
        }
    });

    // Start Kafka (intake + operator commands)
    let handler = CommandHandler::new(store.clone(), replica);
    let consumed = kafka::start_kafka_consumer(&config, store, handler, shutdown_tx.subscribe()).await;

    let _ = shutdown_tx.send(());
    let _ = tokio::join!(feed_task, sync_task, sweeper_task);
    info!("Rail Alerts Service stopped");

    consumed
}
