//! Provision the source streams and the dead-letter topic
//!
//! Usage:
//!   stream-init            create or update all topics
//!   stream-init --dry-run  print what would be provisioned

use std::env;
use std::time::Duration;

use event_log::{KafkaEventLog, KafkaLogConfig, RetentionPolicy, StreamConfig};
use event_schema::Source;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Deserialize)]
struct StreamInitConfig {
    #[serde(default = "default_brokers")]
    kafka_brokers: String,
    #[serde(default = "default_dead_letter_topic")]
    dead_letter_topic: String,
    #[serde(default = "default_partitions")]
    partitions: i32,
    #[serde(default = "default_replication")]
    replication_factor: i32,
    #[serde(default = "default_max_age_hours")]
    max_age_hours: u64,
    #[serde(default = "default_max_bytes")]
    max_bytes: u64,
    #[serde(default = "default_max_messages")]
    max_messages: u64,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_dead_letter_topic() -> String {
    "events.dead_letter".to_string()
}

fn default_partitions() -> i32 {
    3
}

fn default_replication() -> i32 {
    1
}

fn default_max_age_hours() -> u64 {
    24 * 7
}

fn default_max_bytes() -> u64 {
    RetentionPolicy::default().max_bytes
}

fn default_max_messages() -> u64 {
    RetentionPolicy::default().max_messages
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rdkafka=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let dry_run = match env::args().nth(1).as_deref() {
        None => false,
        Some("--dry-run") => true,
        Some(other) => {
            eprintln!("Unknown argument: {}", other);
            eprintln!("Usage:");
            eprintln!("  stream-init [--dry-run]");
            std::process::exit(1);
        }
    };

    let config: StreamInitConfig = envy::prefixed("STREAM_").from_env()?;
    let retention = RetentionPolicy {
        max_age: Duration::from_secs(config.max_age_hours * 3600),
        max_bytes: config.max_bytes,
        max_messages: config.max_messages,
    };

    let mut plan: Vec<(String, Vec<String>)> = Source::ALL
        .iter()
        .map(|source| {
            let stream = StreamConfig::for_source(*source).with_retention(retention.clone());
            (stream.name, StreamConfig::source_subjects(*source))
        })
        .collect();
    plan.push((
        "DEAD_LETTER".to_string(),
        vec![config.dead_letter_topic.clone()],
    ));

    for (stream, topics) in &plan {
        info!(stream = %stream, topics = ?topics, "Planned stream");
    }

    if dry_run {
        return Ok(());
    }

    let log = KafkaEventLog::new(KafkaLogConfig {
        brokers: config.kafka_brokers.clone(),
        client_id: "stream-init".to_string(),
        dead_letter_topic: config.dead_letter_topic.clone(),
        ..Default::default()
    })?;

    for (stream, topics) in &plan {
        log.ensure_topics(
            topics,
            &retention,
            config.partitions,
            config.replication_factor,
        )
        .await?;
        info!(stream = %stream, "Stream provisioned");
    }

    println!("Provisioned {} streams on {}", plan.len(), config.kafka_brokers);
    Ok(())
}
