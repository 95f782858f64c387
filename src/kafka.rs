use crate::commands::CommandHandler;
use crate::config::AppConfig;
use crate::processor::{command_processor, intake_processor};
use crate::store::AlertStore;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Trips after `max_retries` consecutive receive failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: u32,
    max_retries: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(max_retries: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            max_retries,
            cooldown,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive_failures >= self.max_retries
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

/// Starts the Kafka consumer for the intake and command topics with SASL/SCRAM
/// authentication and a circuit breaker. Returns on shutdown.
pub async fn start_kafka_consumer(
    config: &AppConfig,
    store: Arc<dyn AlertStore>,
    handler: CommandHandler,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!(
        "Initializing Kafka consumer for topics: {}, {}",
        config.kafka_intake_topic, config.kafka_command_topic
    );

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        // SASL Configuration
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);

    let consumer: StreamConsumer = client_config.create()?;

    consumer.subscribe(&[
        config.kafka_intake_topic.as_str(),
        config.kafka_command_topic.as_str(),
    ])?;
    info!(
        "Subscribed to topics: {}, {}",
        config.kafka_intake_topic, config.kafka_command_topic
    );

    let mut breaker = CircuitBreaker::new(
        config.kafka_max_retries,
        Duration::from_secs(config.kafka_circuit_breaker_cooldown),
    );

    loop {
        if breaker.is_tripped() {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {:?}...",
                config.kafka_max_retries,
                breaker.cooldown()
            );
            tokio::select! {
                _ = tokio::time::sleep(breaker.cooldown()) => {}
                _ = shutdown.recv() => break,
            }
            breaker.record_success();
            info!("Circuit breaker reset. Resuming consumption.");
        }

        let received = tokio::select! {
            _ = shutdown.recv() => break,
            received = consumer.recv() => received,
        };

        match received {
            Ok(m) => {
                breaker.record_success();

                let payload = match m.payload() {
                    None => {
                        warn!("Received empty payload from Kafka");
                        continue;
                    }
                    Some(p) => p.to_vec(),
                };

                // Process the message in a background task to not block the consumer loop
                if m.topic() == config.kafka_command_topic {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            command_processor::process_command(&handler, &payload).await
                        {
                            error!("Error processing operator command: {}", e);
                        }
                    });
                } else {
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            intake_processor::process_submission(store.as_ref(), &payload).await
                        {
                            error!("Error processing submission: {}", e);
                        }
                    });
                }
            }
            Err(e) => {
                let failures = breaker.record_failure();
                error!(
                    "Kafka error: {}. Incrementing failure count ({} / {})",
                    e, failures, config.kafka_max_retries
                );

                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    info!("Kafka consumer stopped");
    Ok(())
}
