/// Gateway configuration, read from `GATEWAY_*` environment variables
use resilience::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_http_host")]
    pub http_host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,
    /// Valid events per ingress sub-batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent publishes per bulk publish round
    #[serde(default = "default_publish_chunk_size")]
    pub publish_chunk_size: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    #[serde(default = "default_publish_initial_backoff_ms")]
    pub publish_initial_backoff_ms: u64,
    #[serde(default = "default_publish_max_backoff_ms")]
    pub publish_max_backoff_ms: u64,
    /// Pause between bulk publish rounds
    #[serde(default = "default_publish_delay_ms")]
    pub publish_delay_ms: u64,
    /// Pause between ingress sub-batches
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_bulk_events")]
    pub max_bulk_events: usize,
    #[serde(default = "default_json_limit_bytes")]
    pub json_limit_bytes: usize,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_publish_chunk_size() -> usize {
    100
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

fn default_publish_max_attempts() -> u32 {
    3
}

fn default_publish_initial_backoff_ms() -> u64 {
    2_000
}

fn default_publish_max_backoff_ms() -> u64 {
    30_000
}

fn default_publish_delay_ms() -> u64 {
    5
}

fn default_batch_delay_ms() -> u64 {
    10
}

fn default_max_bulk_events() -> usize {
    50_000
}

fn default_json_limit_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            kafka_brokers: default_kafka_brokers(),
            batch_size: default_batch_size(),
            publish_chunk_size: default_publish_chunk_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            publish_max_attempts: default_publish_max_attempts(),
            publish_initial_backoff_ms: default_publish_initial_backoff_ms(),
            publish_max_backoff_ms: default_publish_max_backoff_ms(),
            publish_delay_ms: default_publish_delay_ms(),
            batch_delay_ms: default_batch_delay_ms(),
            max_bulk_events: default_max_bulk_events(),
            json_limit_bytes: default_json_limit_bytes(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("GATEWAY_").from_env()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("GATEWAY_BATCH_SIZE must be greater than 0".to_string());
        }
        if self.publish_chunk_size == 0 {
            return Err("GATEWAY_PUBLISH_CHUNK_SIZE must be greater than 0".to_string());
        }
        if self.publish_max_attempts == 0 {
            return Err("GATEWAY_PUBLISH_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.publish_timeout_ms == 0 {
            return Err("GATEWAY_PUBLISH_TIMEOUT_MS must be greater than 0".to_string());
        }
        if self.publish_initial_backoff_ms > self.publish_max_backoff_ms {
            return Err(
                "GATEWAY_PUBLISH_INITIAL_BACKOFF_MS must not exceed GATEWAY_PUBLISH_MAX_BACKOFF_MS"
                    .to_string(),
            );
        }
        if self.max_bulk_events == 0 {
            return Err("GATEWAY_MAX_BULK_EVENTS must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.publish_max_attempts,
            initial_backoff: Duration::from_millis(self.publish_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.publish_max_backoff_ms),
            ..Default::default()
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}
