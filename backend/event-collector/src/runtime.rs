//! One sequential consumer task per source
//!
//! Tasks share the log client, the handler (and through it the sink pool)
//! and the metrics collaborator. Each stops after its in-flight message once
//! the shutdown flag is raised.
//!
//! [`ConsumerLiveness`] tracks which sources still have a running task. A task
//! that ends for any reason (error, panic, shutdown) leaves the running set.

use event_log::{ConsumerConfig, DurableLog, StreamConfig};
use event_schema::Source;
use idempotent_consumer::{
    ConsumerResult, ConsumerSettings, ConsumerStats, EventHandler, StreamConsumer,
};
use pipeline_metrics::PipelineMetrics;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ConsumerPlan {
    pub source: Source,
    pub stream: StreamConfig,
    pub consumer: ConsumerConfig,
}

/// Sources whose consumer task is still running
#[derive(Debug)]
pub struct ConsumerLiveness {
    expected: BTreeSet<Source>,
    running: watch::Sender<BTreeSet<Source>>,
}

impl ConsumerLiveness {
    pub fn new(plans: &[ConsumerPlan]) -> Self {
        let expected: BTreeSet<Source> = plans.iter().map(|p| p.source).collect();
        let (running, _) = watch::channel(expected.clone());
        Self { expected, running }
    }

    pub fn is_running(&self, source: Source) -> bool {
        self.running.borrow().contains(&source)
    }

    pub fn all_running(&self) -> bool {
        self.running.borrow().len() == self.expected.len()
    }

    pub fn stopped(&self) -> Vec<Source> {
        let running = self.running.borrow();
        self.expected.difference(&running).copied().collect()
    }

    pub(crate) fn mark_stopped(&self, source: Source) {
        self.running.send_modify(|running| {
            running.remove(&source);
        });
    }

    /// Resolve with the stopped sources once any consumer task has ended
    pub async fn wait_for_stop(&self) -> Vec<Source> {
        let mut rx = self.running.subscribe();
        let expected = self.expected.len();
        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = rx.wait_for(|running| running.len() < expected).await;
        self.stopped()
    }
}

/// Removes its source from the running set when the task ends, panics included
struct RunningGuard {
    liveness: Arc<ConsumerLiveness>,
    source: Source,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.liveness.mark_stopped(self.source);
    }
}

pub struct ConsumerTask {
    pub source: Source,
    pub handle: JoinHandle<ConsumerResult<ConsumerStats>>,
}

pub fn spawn_consumers(
    log: Arc<dyn DurableLog>,
    handler: Arc<dyn EventHandler>,
    metrics: Arc<dyn PipelineMetrics>,
    plans: Vec<ConsumerPlan>,
    settings: ConsumerSettings,
    liveness: Arc<ConsumerLiveness>,
    shutdown: watch::Receiver<bool>,
) -> Vec<ConsumerTask> {
    plans
        .into_iter()
        .map(|plan| {
            let consumer = StreamConsumer::new(
                log.clone(),
                plan.stream,
                plan.consumer,
                handler.clone(),
                metrics.clone(),
            )
            .with_settings(settings.clone());
            let shutdown = shutdown.clone();
            let guard = RunningGuard {
                liveness: liveness.clone(),
                source: plan.source,
            };

            info!(source = %plan.source, "Spawning stream consumer");
            ConsumerTask {
                source: plan.source,
                handle: tokio::spawn(async move {
                    let _guard = guard;
                    consumer.run(shutdown).await
                }),
            }
        })
        .collect()
}

/// Wait for every consumer task and sum their stats
pub async fn join_consumers(tasks: Vec<ConsumerTask>) -> ConsumerStats {
    let mut total = ConsumerStats::default();

    for task in tasks {
        match task.handle.await {
            Ok(Ok(stats)) => {
                info!(
                    source = %task.source,
                    acked = stats.acked,
                    redelivered = stats.redelivered,
                    terminated = stats.terminated,
                    "Consumer finished"
                );
                total.acked += stats.acked;
                total.redelivered += stats.redelivered;
                total.terminated += stats.terminated;
                total.unresolved += stats.unresolved;
            }
            Ok(Err(e)) => error!(source = %task.source, error = %e, "Consumer failed"),
            Err(e) => error!(source = %task.source, error = %e, "Consumer task panicked"),
        }
    }

    total
}
