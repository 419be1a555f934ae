/// Collector configuration, read from `COLLECTOR_*` environment variables
///
/// Database settings come from `db-pool` (`DATABASE_URL`, `DB_*`).
use crate::runtime::ConsumerPlan;
use event_log::{ConsumerConfig, KafkaLogConfig, StreamConfig};
use event_schema::Source;
use idempotent_consumer::ConsumerSettings;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    /// Durable consumer names are `<group_prefix>-<source>`
    #[serde(default = "default_group_prefix")]
    pub group_prefix: String,
    /// Comma-separated sources to consume
    #[serde(default = "default_sources")]
    pub sources: String,
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,
    /// Must exceed `processing_timeout_ms`
    #[serde(default = "default_ack_wait_ms")]
    pub ack_wait_ms: u64,
    #[serde(default = "default_fetch_wait_ms")]
    pub fetch_wait_ms: u64,
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
    /// Run embedded migrations at startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8081
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_prefix() -> String {
    "event-collector".to_string()
}

fn default_sources() -> String {
    "facebook,tiktok".to_string()
}

fn default_processing_timeout_ms() -> u64 {
    30_000
}

fn default_max_deliver() -> u32 {
    5
}

fn default_ack_wait_ms() -> u64 {
    60_000
}

fn default_fetch_wait_ms() -> u64 {
    1_000
}

fn default_dead_letter_topic() -> String {
    "events.dead_letter".to_string()
}

fn default_run_migrations() -> bool {
    true
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            kafka_brokers: default_kafka_brokers(),
            group_prefix: default_group_prefix(),
            sources: default_sources(),
            processing_timeout_ms: default_processing_timeout_ms(),
            max_deliver: default_max_deliver(),
            ack_wait_ms: default_ack_wait_ms(),
            fetch_wait_ms: default_fetch_wait_ms(),
            dead_letter_topic: default_dead_letter_topic(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("COLLECTOR_").from_env()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_deliver == 0 {
            return Err("COLLECTOR_MAX_DELIVER must be at least 1".to_string());
        }
        if self.processing_timeout_ms == 0 {
            return Err("COLLECTOR_PROCESSING_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.ack_wait_ms <= self.processing_timeout_ms {
            return Err(format!(
                "COLLECTOR_ACK_WAIT_MS ({}) must exceed COLLECTOR_PROCESSING_TIMEOUT_MS ({})",
                self.ack_wait_ms, self.processing_timeout_ms
            ));
        }
        if self.group_prefix.trim().is_empty() {
            return Err("COLLECTOR_GROUP_PREFIX must not be empty".to_string());
        }
        self.source_list().map(|_| ())
    }

    /// Parsed, de-duplicated source list
    pub fn source_list(&self) -> Result<Vec<Source>, String> {
        let mut sources = Vec::new();
        for name in self.sources.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let source: Source = name
                .parse()
                .map_err(|_| format!("COLLECTOR_SOURCES: unknown source '{}'", name))?;
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        if sources.is_empty() {
            return Err("COLLECTOR_SOURCES must name at least one source".to_string());
        }
        Ok(sources)
    }

    pub fn consumer_config(&self, source: Source) -> ConsumerConfig {
        ConsumerConfig {
            max_deliver: self.max_deliver,
            ack_wait: Duration::from_millis(self.ack_wait_ms),
            ..ConsumerConfig::for_source(source, &self.group_prefix)
        }
    }

    /// Stream and durable consumer for every configured source
    pub fn consumer_plans(&self) -> Result<Vec<ConsumerPlan>, String> {
        Ok(self
            .source_list()?
            .into_iter()
            .map(|source| ConsumerPlan {
                source,
                stream: StreamConfig::for_source(source),
                consumer: self.consumer_config(source),
            })
            .collect())
    }

    pub fn consumer_settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            processing_timeout: Duration::from_millis(self.processing_timeout_ms),
            fetch_wait: Duration::from_millis(self.fetch_wait_ms),
            ..Default::default()
        }
    }

    pub fn kafka_config(&self) -> KafkaLogConfig {
        KafkaLogConfig {
            brokers: self.kafka_brokers.clone(),
            client_id: self.group_prefix.clone(),
            dead_letter_topic: self.dead_letter_topic.clone(),
            ..Default::default()
        }
    }
}
