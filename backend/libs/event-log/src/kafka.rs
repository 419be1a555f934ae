//! Kafka adapter for the durable log
//!
//! Mapping onto Kafka:
//! - subject → topic (`events.facebook.top`), keyed by subject so one subject
//!   stays on one partition and keeps its order
//! - stream → regex subscription over the stream's subject filters
//! - durable consumer → consumer group, manual offset commits
//! - nak → re-publish to the same subject with `delivery-attempt + 1`, commit
//! - exhaustion / term → publish to the dead-letter topic, commit
//! - retention age / bytes → `retention.ms` / `retention.bytes` topic configs
//!
//! Kafka has no per-message ack wait. Uncommitted deliveries are redelivered
//! after a restart or rebalance instead.

use crate::subject::filter_to_regex;
use crate::{
    ConsumerConfig, DeadLetterReason, Delivery, DurableLog, Headers, LogError, LogResult,
    NakOutcome, PublishAck, RetentionPolicy, StreamConfig, Subscription,
    DEAD_LETTER_REASON_HEADER, DELIVERY_ATTEMPT_HEADER, ORIGINAL_SUBJECT_HEADER,
};
use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, NewTopic, ResourceSpecifier, TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct KafkaLogConfig {
    pub brokers: String,
    pub client_id: String,
    /// Topic receiving exhausted and terminated messages
    pub dead_letter_topic: String,
    /// How long a produce may wait in the local queue
    pub queue_timeout: Duration,
    pub metadata_timeout: Duration,
}

impl Default for KafkaLogConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: "funnel-pipeline".to_string(),
            dead_letter_topic: "events.dead_letter".to_string(),
            queue_timeout: Duration::from_secs(5),
            metadata_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct KafkaEventLog {
    producer: FutureProducer,
    config: KafkaLogConfig,
}

impl KafkaEventLog {
    pub fn new(config: KafkaLogConfig) -> LogResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", &config.client_id)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", "30000")
            .set("compression.type", "lz4")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka producer: {}", e);
                LogError::Kafka(e)
            })?;

        info!(brokers = %config.brokers, "Kafka event log initialized");

        Ok(Self { producer, config })
    }

    pub fn config(&self) -> &KafkaLogConfig {
        &self.config
    }

    /// Create the topics behind a stream, or align retention on existing ones
    ///
    /// `max_messages` has no Kafka equivalent and is only logged.
    pub async fn ensure_topics(
        &self,
        topics: &[String],
        retention: &RetentionPolicy,
        partitions: i32,
        replication: i32,
    ) -> LogResult<()> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .create()?;
        let options = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));

        let retention_ms = retention.max_age.as_millis().to_string();
        let retention_bytes = retention.max_bytes.to_string();

        warn!(
            max_messages = retention.max_messages,
            "Kafka has no message-count retention; only age and byte ceilings are applied"
        );

        let new_topics: Vec<NewTopic> = topics
            .iter()
            .map(|topic| {
                NewTopic::new(topic, partitions, TopicReplication::Fixed(replication))
                    .set("retention.ms", &retention_ms)
                    .set("retention.bytes", &retention_bytes)
                    .set("cleanup.policy", "delete")
            })
            .collect();

        let mut existing = Vec::new();
        for result in admin.create_topics(&new_topics, &options).await? {
            match result {
                Ok(topic) => info!(topic = %topic, "Created topic"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => existing.push(topic),
                Err((topic, code)) => {
                    return Err(LogError::Admin {
                        resource: topic,
                        reason: code.to_string(),
                    })
                }
            }
        }

        if existing.is_empty() {
            return Ok(());
        }

        let alterations: Vec<AlterConfig> = existing
            .iter()
            .map(|topic| {
                AlterConfig::new(ResourceSpecifier::Topic(topic))
                    .set("retention.ms", &retention_ms)
                    .set("retention.bytes", &retention_bytes)
            })
            .collect();

        for result in admin.alter_configs(&alterations, &options).await? {
            match result {
                Ok(resource) => debug!(resource = ?resource, "Updated topic retention"),
                Err((resource, code)) => {
                    return Err(LogError::Admin {
                        resource: format!("{:?}", resource),
                        reason: code.to_string(),
                    })
                }
            }
        }

        info!(topics = existing.len(), "Updated retention on existing topics");
        Ok(())
    }

    async fn send(
        producer: &FutureProducer,
        topic: &str,
        key: &str,
        payload: &[u8],
        headers: &Headers,
        queue_timeout: Duration,
    ) -> LogResult<(i32, i64)> {
        let mut owned = OwnedHeaders::new();
        for (k, v) in headers {
            owned = owned.insert(Header {
                key: k.as_str(),
                value: Some(v.as_bytes()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(owned);

        producer
            .send(record, Timeout::After(queue_timeout))
            .await
            .map_err(|(e, _)| {
                warn!(topic = %topic, error = %e, "Kafka send failed");
                LogError::Kafka(e)
            })
    }
}

#[async_trait]
impl DurableLog for KafkaEventLog {
    async fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> LogResult<PublishAck> {
        let (partition, offset) = Self::send(
            &self.producer,
            subject,
            subject,
            &payload,
            &headers,
            self.config.queue_timeout,
        )
        .await?;

        debug!(subject = %subject, partition, offset, "Published to Kafka");

        Ok(PublishAck {
            stream: subject.to_string(),
            partition,
            sequence: offset.max(0) as u64,
        })
    }

    async fn subscribe(
        &self,
        stream: &StreamConfig,
        consumer: &ConsumerConfig,
    ) -> LogResult<Box<dyn Subscription>> {
        let kafka_consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &consumer.durable_name)
            .set("bootstrap.servers", &self.config.brokers)
            .set("client.id", &self.config.client_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .set("enable.partition.eof", "false")
            .set("topic.metadata.refresh.interval.ms", "30000")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                LogError::Kafka(e)
            })?;

        let filters: Vec<String> = match &consumer.filter_subject {
            Some(filter) => vec![filter.clone()],
            None => stream.subjects.clone(),
        };
        let patterns: Vec<String> = filters.iter().map(|f| filter_to_regex(f)).collect();
        let pattern_refs: Vec<&str> = patterns.iter().map(String::as_str).collect();

        kafka_consumer.subscribe(&pattern_refs).map_err(|e| {
            error!("Failed to subscribe to {:?}: {}", patterns, e);
            LogError::Kafka(e)
        })?;

        info!(
            stream = %stream.name,
            group = %consumer.durable_name,
            patterns = ?patterns,
            "Kafka subscription started"
        );

        Ok(Box::new(KafkaSubscription {
            consumer: kafka_consumer,
            producer: self.producer.clone(),
            stream: stream.name.clone(),
            max_deliver: consumer.max_deliver.max(1),
            dead_letter_topic: self.config.dead_letter_topic.clone(),
            queue_timeout: self.config.queue_timeout,
        }))
    }

    async fn health_check(&self) -> bool {
        let producer = self.producer.clone();
        let timeout = self.config.metadata_timeout;

        let result = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| !metadata.brokers().is_empty())
        })
        .await;

        match result {
            Ok(Ok(has_brokers)) => has_brokers,
            Ok(Err(e)) => {
                warn!("Kafka health check failed: {}", e);
                false
            }
            Err(e) => {
                warn!("Kafka health check task failed: {}", e);
                false
            }
        }
    }
}

struct KafkaSubscription {
    consumer: StreamConsumer,
    producer: FutureProducer,
    stream: String,
    max_deliver: u32,
    dead_letter_topic: String,
    queue_timeout: Duration,
}

impl KafkaSubscription {
    fn to_delivery(&self, message: &BorrowedMessage<'_>) -> Delivery {
        let mut headers = Headers::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        let attempt = headers
            .get(DELIVERY_ATTEMPT_HEADER)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        Delivery {
            stream: self.stream.clone(),
            subject: message.topic().to_string(),
            partition: message.partition(),
            sequence: message.offset().max(0) as u64,
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            attempt,
        }
    }

    fn commit(&self, delivery: &Delivery) -> LogResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &delivery.subject,
            delivery.partition,
            Offset::Offset(delivery.sequence as i64 + 1),
        )?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: DeadLetterReason) -> LogResult<()> {
        let mut headers = delivery.headers.clone();
        headers.insert(
            DEAD_LETTER_REASON_HEADER.to_string(),
            reason.as_header_value(),
        );
        headers.insert(
            ORIGINAL_SUBJECT_HEADER.to_string(),
            delivery.subject.clone(),
        );
        headers.insert(
            DELIVERY_ATTEMPT_HEADER.to_string(),
            delivery.attempt.to_string(),
        );

        KafkaEventLog::send(
            &self.producer,
            &self.dead_letter_topic,
            &delivery.subject,
            &delivery.payload,
            &headers,
            self.queue_timeout,
        )
        .await?;

        warn!(
            subject = %delivery.subject,
            attempts = delivery.attempt,
            reason = %reason.as_header_value(),
            dlq = %self.dead_letter_topic,
            "Message dead-lettered"
        );
        Ok(())
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn fetch(&mut self, wait: Duration) -> LogResult<Option<Delivery>> {
        match tokio::time::timeout(wait, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(self.to_delivery(&message))),
            Ok(Err(KafkaError::PartitionEOF(_))) => Ok(None),
            Ok(Err(e)) => {
                error!(stream = %self.stream, "Kafka consumer error: {}", e);
                Err(LogError::Kafka(e))
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> LogResult<()> {
        self.commit(delivery)
    }

    async fn nak(&mut self, delivery: &Delivery) -> LogResult<NakOutcome> {
        let outcome = if delivery.attempt >= self.max_deliver {
            self.dead_letter(delivery, DeadLetterReason::MaxDeliverExceeded)
                .await?;
            NakOutcome::DeadLettered
        } else {
            let mut headers = delivery.headers.clone();
            headers.insert(
                DELIVERY_ATTEMPT_HEADER.to_string(),
                (delivery.attempt + 1).to_string(),
            );
            KafkaEventLog::send(
                &self.producer,
                &delivery.subject,
                &delivery.subject,
                &delivery.payload,
                &headers,
                self.queue_timeout,
            )
            .await?;
            NakOutcome::Redelivering
        };

        // Offset only moves once the redelivery copy is durable
        self.commit(delivery)?;
        Ok(outcome)
    }

    async fn term(&mut self, delivery: &Delivery, reason: &str) -> LogResult<()> {
        self.dead_letter(delivery, DeadLetterReason::Terminated(reason.to_string()))
            .await?;
        self.commit(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KafkaLogConfig::default();
        assert_eq!(config.dead_letter_topic, "events.dead_letter");
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_producer_creation_is_lazy() {
        // librdkafka connects in the background; construction must not block on brokers
        let log = KafkaEventLog::new(KafkaLogConfig {
            brokers: "127.0.0.1:1".to_string(),
            metadata_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        assert!(log.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires Kafka broker"]
    async fn test_health_check_against_local_broker() {
        let brokers =
            std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let log = KafkaEventLog::new(KafkaLogConfig {
            brokers,
            ..Default::default()
        })
        .unwrap();
        assert!(log.health_check().await);
    }
}
