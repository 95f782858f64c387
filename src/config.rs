use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::db::PoolSettings;
use crate::replica::SyncSettings;
use crate::store::postgres::is_valid_channel_name;
use crate::sweeper::EscalationPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_intake_topic: String,
    pub kafka_command_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub notify_channel: String,
    pub escalation_grace_secs: i64,
    pub sweep_interval_secs: u64,
    pub resubscribe_delay_secs: u64,
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let db_host = env_or("DB_HOST", "localhost");
        let db_port = env_or("DB_PORT", "5432");
        let db_name = env_or("DB_DATABASE", "rail_alerts");
        let db_user = env_or("DB_USER", "rail");
        let db_pwd = env_or("DB_PWD", "rail");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let config = Self {
            kafka_bootstrap_servers: env_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            kafka_intake_topic: env_or("KAFKA_INTAKE_TOPIC", "rail-alerts-intake"),
            kafka_command_topic: env_or("KAFKA_COMMAND_TOPIC", "rail-alerts-commands"),
            kafka_group_id: env_or("KAFKA_GROUP_ID", "rail-alerts-consumer"),
            kafka_auto_offset_reset: env_or("KAFKA_AUTO_OFFSET_RESET", "latest"),
            kafka_sasl_mechanism: env_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256"),
            kafka_username: env::var("KAFKA_USERNAME").unwrap_or_default(),
            kafka_password: env::var("KAFKA_PASSWORD").unwrap_or_default(),
            kafka_security_protocol: env_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            kafka_max_retries: env_parsed("KAFKA_MAX_RETRIES", 5),
            kafka_circuit_breaker_cooldown: env_parsed("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300),
            database_url,
            db_max_connections: env_parsed("DB_MAX_CONNECTIONS", 20),
            db_acquire_timeout_secs: env_parsed("DB_ACQUIRE_TIMEOUT_SECS", 5),
            notify_channel: env_or("ALERTS_NOTIFY_CHANNEL", "alerts_changed"),
            escalation_grace_secs: env_parsed("ESCALATION_GRACE_SECS", 120),
            sweep_interval_secs: env_parsed("SWEEP_INTERVAL_SECS", 5),
            resubscribe_delay_secs: env_parsed("RESUBSCRIBE_DELAY_SECS", 2),
            log_level: env_or("LOG_LEVEL", "info"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.escalation_grace_secs <= 0 || self.sweep_interval_secs == 0 {
            anyhow::bail!("ESCALATION_GRACE_SECS and SWEEP_INTERVAL_SECS must be positive");
        }
        if self.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be positive");
        }
        if !is_valid_channel_name(&self.notify_channel) {
            anyhow::bail!(
                "ALERTS_NOTIFY_CHANNEL '{}' must be a plain identifier (letters, digits, '_')",
                self.notify_channel
            );
        }
        Ok(())
    }

    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            grace: chrono::Duration::seconds(self.escalation_grace_secs),
            interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.db_max_connections,
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            resubscribe_delay: Duration::from_secs(self.resubscribe_delay_secs),
        }
    }
}
