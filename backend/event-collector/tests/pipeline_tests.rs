//! Consumer runtime against the in-memory log and sink

use event_collector::runtime::{join_consumers, spawn_consumers, ConsumerLiveness};
use event_collector::sink::InMemoryEventSink;
use event_collector::{CollectorConfig, EventMaterializer, MaterializingHandler};
use event_log::{DeadLetterReason, DurableLog, Headers, InMemoryEventLog, StreamConfig};
use event_schema::{testing, FunnelStage, PublishEnvelope, Source, CORRELATION_ID_HEADER};
use idempotent_consumer::{ConsumerSettings, ConsumerStats};
use pipeline_metrics::AtomicPipelineMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Pipeline {
    log: InMemoryEventLog,
    sink: InMemoryEventSink,
    metrics: Arc<AtomicPipelineMetrics>,
}

impl Pipeline {
    async fn new() -> Self {
        Self {
            log: InMemoryEventLog::with_streams(
                Source::ALL.iter().map(|s| StreamConfig::for_source(*s)),
            )
            .await,
            sink: InMemoryEventSink::new(),
            metrics: Arc::new(AtomicPipelineMetrics::new()),
        }
    }

    async fn publish(&self, envelope: &PublishEnvelope) {
        let mut headers = Headers::new();
        headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            envelope.correlation_id.clone(),
        );
        self.log
            .publish(&envelope.subject(), envelope.to_bytes().unwrap(), headers)
            .await
            .unwrap();
    }

    /// Run the configured consumers until `done` holds, then shut them down
    async fn run_until(
        &self,
        config: CollectorConfig,
        done: impl Fn(&Pipeline) -> bool,
    ) -> ConsumerStats {
        let handler = Arc::new(MaterializingHandler::new(Arc::new(EventMaterializer::new(
            Arc::new(self.sink.clone()),
        ))));
        let plans = config.consumer_plans().unwrap();
        let liveness = Arc::new(ConsumerLiveness::new(&plans));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = spawn_consumers(
            Arc::new(self.log.clone()),
            handler,
            self.metrics.clone(),
            plans,
            ConsumerSettings {
                fetch_wait: Duration::from_millis(20),
                ..config.consumer_settings()
            },
            liveness,
            shutdown_rx,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while !done(self) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pipeline did not settle");

        shutdown_tx.send(true).unwrap();
        join_consumers(tasks).await
    }
}

fn config(sources: &str, max_deliver: u32) -> CollectorConfig {
    CollectorConfig {
        sources: sources.to_string(),
        max_deliver,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_redelivered_event_is_recorded_once() {
    let pipeline = Pipeline::new().await;
    let envelope = PublishEnvelope::new(testing::facebook_purchase("fb-1", "99.99"), "corr-1");

    // Original publish plus two redeliveries of the same logical message
    for _ in 0..3 {
        pipeline.publish(&envelope).await;
    }

    let stats = pipeline
        .run_until(config("facebook", 5), |p| {
            p.metrics
                .snapshot(Source::Facebook, FunnelStage::Bottom)
                .processed
                == 3
        })
        .await;

    assert_eq!(stats.acked, 3);
    assert_eq!(pipeline.sink.processed_count().await, 1);
    assert_eq!(pipeline.sink.revenue_count().await, 1);

    let record = pipeline.sink.processed("fb-1").await.unwrap();
    assert_eq!(record.correlation_id, "corr-1");
    let revenue = pipeline.sink.revenue("fb-1").await.unwrap();
    assert_eq!(revenue.amount, 99.99);
}

#[tokio::test]
async fn test_latest_event_owns_the_demographic_snapshot() {
    let pipeline = Pipeline::new().await;
    let first = testing::facebook_user_event("e1", "user-7", 30, "2025-01-15T10:00:00Z");
    let second = testing::facebook_user_event("e2", "user-7", 31, "2025-01-15T12:00:00Z");

    pipeline.publish(&PublishEnvelope::new(first.clone(), "c1")).await;
    pipeline.publish(&PublishEnvelope::new(second, "c2")).await;
    // Late redelivery of the older event
    pipeline.publish(&PublishEnvelope::new(first, "c1")).await;

    pipeline
        .run_until(config("facebook", 5), |p| {
            p.metrics.snapshot(Source::Facebook, FunnelStage::Top).processed == 3
        })
        .await;

    assert_eq!(pipeline.sink.demographics_count().await, 1);
    let snapshot = pipeline
        .sink
        .demographic("user-7", Source::Facebook)
        .await
        .unwrap();
    assert_eq!(snapshot.age, Some(31));
    assert_eq!(pipeline.sink.processed_count().await, 2);
}

#[tokio::test]
async fn test_sink_outage_exhausts_redelivery_into_dead_letter() {
    let pipeline = Pipeline::new().await;
    pipeline.sink.set_available(false);
    pipeline
        .publish(&PublishEnvelope::new(testing::tiktok_top("tt-1"), "corr-9"))
        .await;

    let stats = pipeline
        .run_until(config("tiktok", 3), |p| {
            p.metrics.snapshot(Source::Tiktok, FunnelStage::Top).dead_lettered == 1
        })
        .await;

    assert_eq!(stats.redelivered, 2);
    assert_eq!(stats.terminated, 1);

    let dead = pipeline.log.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliverExceeded);
    assert_eq!(dead[0].attempts, 3);

    let counters = pipeline.metrics.snapshot(Source::Tiktok, FunnelStage::Top);
    assert_eq!(counters.failed, 1);
    assert_eq!(counters.processed, 0);
    assert_eq!(pipeline.sink.processed_count().await, 0);
}

#[tokio::test]
async fn test_undecodable_message_is_terminated() {
    let pipeline = Pipeline::new().await;
    pipeline
        .log
        .publish("events.tiktok.top", b"{not json".to_vec(), Headers::new())
        .await
        .unwrap();
    pipeline
        .publish(&PublishEnvelope::new(testing::tiktok_top("tt-2"), "corr-2"))
        .await;

    let stats = pipeline
        .run_until(config("tiktok", 5), |p| {
            p.metrics.snapshot(Source::Tiktok, FunnelStage::Top).processed == 1
        })
        .await;

    assert_eq!(stats.terminated, 1);
    assert_eq!(stats.acked, 1);

    let dead = pipeline.log.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert!(matches!(dead[0].reason, DeadLetterReason::Terminated(_)));
    assert_eq!(pipeline.sink.processed_count().await, 1);
}

#[tokio::test]
async fn test_batch_write_failure_is_isolated_and_retryable() {
    let sink = InMemoryEventSink::new();
    let materializer = EventMaterializer::new(Arc::new(sink.clone()));
    let envelopes = vec![
        PublishEnvelope::new(testing::facebook_top("fb-1"), "corr-b"),
        PublishEnvelope::new(testing::facebook_purchase("fb-2", "15.00"), "corr-b"),
        PublishEnvelope::new(testing::tiktok_purchase("tt-1", Some("3.50")), "corr-b"),
    ];

    sink.set_revenue_available(false);
    let report = materializer.materialize_batch(&envelopes).await;

    assert!(!report.is_complete());
    assert_eq!(*report.processed.as_ref().unwrap(), 3);
    assert!(report.demographics.is_ok());
    assert!(report.revenue.is_err());
    assert!(report.error_summary().unwrap().contains("revenue"));
    assert_eq!(sink.processed_count().await, 3);
    assert_eq!(sink.revenue_count().await, 0);

    // Retrying the whole batch only fills the gap
    sink.set_revenue_available(true);
    let report = materializer.materialize_batch(&envelopes).await;

    assert!(report.is_complete());
    assert_eq!(*report.processed.as_ref().unwrap(), 0);
    assert_eq!(*report.revenue.as_ref().unwrap(), 2);
    assert_eq!(sink.processed_count().await, 3);
}

#[tokio::test]
async fn test_consumer_for_missing_stream_is_reported_stopped() {
    let log = InMemoryEventLog::with_streams([StreamConfig::for_source(Source::Facebook)]).await;
    let sink = InMemoryEventSink::new();
    let handler = Arc::new(MaterializingHandler::new(Arc::new(EventMaterializer::new(
        Arc::new(sink.clone()),
    ))));
    let config = config("facebook,tiktok", 5);
    let plans = config.consumer_plans().unwrap();
    let liveness = Arc::new(ConsumerLiveness::new(&plans));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = spawn_consumers(
        Arc::new(log),
        handler,
        Arc::new(AtomicPipelineMetrics::new()),
        plans,
        ConsumerSettings {
            fetch_wait: Duration::from_millis(20),
            ..config.consumer_settings()
        },
        liveness.clone(),
        shutdown_rx,
    );

    let stopped = tokio::time::timeout(Duration::from_secs(5), liveness.wait_for_stop())
        .await
        .expect("missing stream was not surfaced");
    assert_eq!(stopped, vec![Source::Tiktok]);
    assert!(liveness.is_running(Source::Facebook));
    assert!(!liveness.all_running());

    shutdown_tx.send(true).unwrap();
    let stats = join_consumers(tasks).await;
    assert_eq!(stats.acked, 0);
}
