//! Stream consumer behaviour against the in-memory durable log
//!
//! Each test scripts the handler outcome and checks the resulting
//! acknowledgement, the log state and the pipeline counters.

use async_trait::async_trait;
use event_log::{
    ConsumerConfig, DeadLetterReason, DurableLog, Headers, InMemoryEventLog, StreamConfig,
};
use event_schema::{testing, Event, FunnelStage, PublishEnvelope, Source, CORRELATION_ID_HEADER};
use idempotent_consumer::{
    ConsumerSettings, DeliveryState, EventHandler, ProcessingError, StreamConsumer,
};
use pipeline_metrics::AtomicPipelineMetrics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

enum Behavior {
    Succeed,
    Fail(ProcessingError),
    Hang,
}

/// Handler replaying a fixed script, then succeeding
struct ScriptedHandler {
    script: Mutex<VecDeque<Behavior>>,
    calls: AtomicU32,
    handled: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    fn new(script: Vec<Behavior>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            handled: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for ScriptedHandler {
    async fn handle(&self, envelope: &PublishEnvelope) -> Result<(), ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Behavior::Succeed);

        match next {
            Behavior::Succeed => {
                self.handled
                    .lock()
                    .unwrap()
                    .push(envelope.event.event_id.clone());
                Ok(())
            }
            Behavior::Fail(e) => Err(e),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

struct Fixture {
    log: InMemoryEventLog,
    stream: StreamConfig,
    consumer_config: ConsumerConfig,
    metrics: Arc<AtomicPipelineMetrics>,
}

impl Fixture {
    async fn new(max_deliver: u32) -> Self {
        let stream = StreamConfig::for_source(Source::Facebook);
        let log = InMemoryEventLog::with_streams([stream.clone()]).await;
        let consumer_config = ConsumerConfig {
            max_deliver,
            ..ConsumerConfig::for_source(Source::Facebook, "collector")
        };

        Self {
            log,
            stream,
            consumer_config,
            metrics: Arc::new(AtomicPipelineMetrics::new()),
        }
    }

    fn consumer(&self, handler: Arc<ScriptedHandler>) -> StreamConsumer {
        StreamConsumer::new(
            Arc::new(self.log.clone()),
            self.stream.clone(),
            self.consumer_config.clone(),
            handler,
            self.metrics.clone(),
        )
        .with_settings(ConsumerSettings {
            processing_timeout: Duration::from_secs(30),
            fetch_wait: Duration::from_millis(50),
            error_backoff: Duration::from_millis(10),
        })
    }

    async fn publish(&self, event: Event) {
        let envelope = PublishEnvelope::new(event, "corr-test");
        let mut headers = Headers::new();
        headers.insert(CORRELATION_ID_HEADER.to_string(), "corr-test".to_string());
        self.log
            .publish(&envelope.subject(), envelope.to_bytes().unwrap(), headers)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_successful_processing_acks_and_counts() {
    let fixture = Fixture::new(5).await;
    fixture.publish(testing::facebook_top("fb-ok-1")).await;

    let handler = ScriptedHandler::new(vec![Behavior::Succeed]);
    let consumer = fixture.consumer(handler.clone());
    let mut subscription = fixture
        .log
        .subscribe(&fixture.stream, &fixture.consumer_config)
        .await
        .unwrap();

    let state = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(state, Some(DeliveryState::Acked));

    // Acked messages never come back
    let state = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(state, None);

    let snapshot = fixture.metrics.snapshot(Source::Facebook, FunnelStage::Top);
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(*handler.handled.lock().unwrap(), vec!["fb-ok-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_processing_timeout_redelivers() {
    let fixture = Fixture::new(5).await;
    fixture.publish(testing::facebook_top("fb-slow-1")).await;

    let handler = ScriptedHandler::new(vec![Behavior::Hang, Behavior::Succeed]);
    let consumer = fixture.consumer(handler.clone());
    let mut subscription = fixture
        .log
        .subscribe(&fixture.stream, &fixture.consumer_config)
        .await
        .unwrap();

    let first = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(first, Some(DeliveryState::Redelivering));

    let second = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(second, Some(DeliveryState::Acked));

    assert_eq!(handler.calls(), 2);
    let snapshot = fixture.metrics.snapshot(Source::Facebook, FunnelStage::Top);
    assert_eq!(snapshot.redelivered, 1);
    assert_eq!(snapshot.processed, 1);
    assert!(fixture.log.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_permanent_failure_terminates() {
    let fixture = Fixture::new(5).await;
    fixture
        .publish(testing::facebook_purchase("fb-bad-1", "19.99"))
        .await;

    let handler = ScriptedHandler::new(vec![Behavior::Fail(ProcessingError::permanent(
        "violates check constraint",
    ))]);
    let consumer = fixture.consumer(handler.clone());
    let mut subscription = fixture
        .log
        .subscribe(&fixture.stream, &fixture.consumer_config)
        .await
        .unwrap();

    let state = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(state, Some(DeliveryState::Terminated));

    // Not retried
    let state = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(state, None);
    assert_eq!(handler.calls(), 1);

    let dead = fixture.log.dead_letters().await;
    assert_eq!(dead.len(), 1);
    match &dead[0].reason {
        DeadLetterReason::Terminated(reason) => assert!(reason.contains("check constraint")),
        other => panic!("unexpected reason {:?}", other),
    }

    let snapshot = fixture.metrics.snapshot(Source::Facebook, FunnelStage::Bottom);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.dead_lettered, 1);
}

#[tokio::test]
async fn test_undecodable_payload_terminates_without_calling_handler() {
    let fixture = Fixture::new(5).await;
    fixture
        .log
        .publish("events.facebook.top", b"{not json".to_vec(), Headers::new())
        .await
        .unwrap();

    let handler = ScriptedHandler::new(vec![]);
    let consumer = fixture.consumer(handler.clone());
    let mut subscription = fixture
        .log
        .subscribe(&fixture.stream, &fixture.consumer_config)
        .await
        .unwrap();

    let state = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(state, Some(DeliveryState::Terminated));
    assert_eq!(handler.calls(), 0);

    let dead = fixture.log.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.as_header_value().contains("malformed payload"));

    let snapshot = fixture.metrics.snapshot(Source::Facebook, FunnelStage::Top);
    assert_eq!(snapshot.failed, 1);
}

#[tokio::test]
async fn test_transient_failures_exhaust_into_dead_letter() {
    let fixture = Fixture::new(2).await;
    fixture.publish(testing::facebook_top("fb-flaky-1")).await;

    let handler = ScriptedHandler::new(vec![
        Behavior::Fail(ProcessingError::transient("pool timed out")),
        Behavior::Fail(ProcessingError::transient("pool timed out")),
    ]);
    let consumer = fixture.consumer(handler.clone());
    let mut subscription = fixture
        .log
        .subscribe(&fixture.stream, &fixture.consumer_config)
        .await
        .unwrap();

    let first = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(first, Some(DeliveryState::Redelivering));

    let second = consumer.poll_once(subscription.as_mut()).await.unwrap();
    assert_eq!(second, Some(DeliveryState::Terminated));

    let dead = fixture.log.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliverExceeded);
    assert_eq!(dead[0].attempts, 2);

    let snapshot = fixture.metrics.snapshot(Source::Facebook, FunnelStage::Top);
    assert_eq!(snapshot.redelivered, 1);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.dead_lettered, 1);
}

#[tokio::test]
async fn test_run_processes_in_order_and_stops_on_shutdown() {
    let fixture = Fixture::new(5).await;
    for i in 0..5 {
        fixture
            .publish(testing::facebook_top(&format!("fb-seq-{}", i)))
            .await;
    }

    let handler = ScriptedHandler::new(vec![]);
    let consumer = fixture.consumer(handler.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.calls() < 5 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    let stats = task.await.unwrap().unwrap();

    assert_eq!(stats.acked, 5);
    assert_eq!(stats.total(), 5);

    let expected: Vec<String> = (0..5).map(|i| format!("fb-seq-{}", i)).collect();
    assert_eq!(*handler.handled.lock().unwrap(), expected);
}
