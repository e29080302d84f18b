//! Signal Runner Service
//!
//! Drives one instrument: pulls payloads from a tick source, pushes them
//! through the signal pipeline and publishes every decision record.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};
use crate::services::notifier::{Notifier, TracingNotifier};
use crate::services::record_sink::RecordSink;
use crate::services::signals::SignalPipeline;
use crate::services::tick_source::TickSource;
use crate::types::{DecisionRecord, Tick, TickPayload};

/// Back-off after a transient source error.
const SOURCE_RETRY: Duration = Duration::from_secs(1);

/// Counters for one runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStats {
    /// Payloads handed over by the source
    pub received: u64,
    /// Payloads that became ticks and went through the pipeline
    pub processed: u64,
    /// Payloads without a usable timestamp or price
    pub skipped: u64,
    /// Records carrying a decision
    pub decisions: u64,
    /// Records carrying an extreme follower signal
    pub extremes: u64,
    /// Records the sink rejected
    pub sink_failures: u64,
    /// Messages handed to the notifier
    pub notifications: u64,
}

/// Ingestion loop for one instrument.
pub struct SignalRunner<S, K> {
    pipeline: SignalPipeline,
    source: S,
    sink: K,
    notifier: Arc<dyn Notifier>,
    precision: u32,
    emit_side_effects: bool,
    stats: RunnerStats,
    shutdown_tx: broadcast::Sender<()>,
}

impl<S: TickSource, K: RecordSink> SignalRunner<S, K> {
    pub fn new(pipeline: SignalPipeline, source: S, sink: K, precision: u32) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            pipeline,
            source,
            sink,
            notifier: Arc::new(TracingNotifier),
            precision,
            emit_side_effects: false,
            stats: RunnerStats::default(),
            shutdown_tx,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_emit_side_effects(mut self, emit: bool) -> Self {
        self.emit_side_effects = emit;
        self
    }

    /// Share a shutdown channel with other runners.
    pub fn with_shutdown(mut self, shutdown_tx: broadcast::Sender<()>) -> Self {
        self.shutdown_tx = shutdown_tx;
        self
    }

    /// Sender that stops this runner between batches.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn instrument(&self) -> &str {
        self.pipeline.instrument()
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    pub fn pipeline(&self) -> &SignalPipeline {
        &self.pipeline
    }

    /// Process one raw payload. `None` when it does not describe a tick.
    pub async fn handle_payload(&mut self, payload: &TickPayload) -> Option<DecisionRecord> {
        self.stats.received += 1;

        let Some(tick) = Tick::from_payload(payload) else {
            self.stats.skipped += 1;
            let err = AppError::InvalidTick(format!("{:?}", payload.0));
            debug!("{}: {}", self.pipeline.instrument(), err);
            return None;
        };

        let record = self
            .pipeline
            .process(&tick, self.precision, self.emit_side_effects);
        self.stats.processed += 1;
        if record.decision.is_some() {
            self.stats.decisions += 1;
        }
        if record.is_extreme() {
            self.stats.extremes += 1;
        }

        let instrument = self.pipeline.instrument();
        if let Err(e) = self.sink.publish(instrument, &record).await {
            self.stats.sink_failures += 1;
            warn!("Failed to publish record for {}: {}", instrument, e);
        }

        if record.signal.emit_side_effects {
            if let Some(message) = &record.message {
                self.stats.notifications += 1;
                if let Err(e) = self.notifier.notify(instrument, message).await {
                    warn!("Notifier failed for {}: {}", instrument, e);
                }
            }
        }

        Some(record)
    }

    /// Run until shutdown or until the source is exhausted.
    ///
    /// Transient source errors are logged and retried; only configuration
    /// errors end the run early. Shutdown may interrupt a fetch but never a
    /// batch already handed over: it is processed and committed first.
    pub async fn run(&mut self) -> Result<RunnerStats> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "Signal runner started for {} via {}",
            self.pipeline.instrument(),
            self.source.describe()
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Signal runner for {} received shutdown signal", self.pipeline.instrument());
                    break;
                }
                batch = self.source.next_batch() => match batch {
                    Ok(Some(batch)) => {
                        for payload in &batch {
                            self.handle_payload(payload).await;
                        }
                        if let Err(e) = self.source.commit().await {
                            warn!("Commit failed for {}: {}", self.pipeline.instrument(), e);
                        }
                    }
                    Ok(None) => {
                        info!("Tick source for {} exhausted", self.pipeline.instrument());
                        break;
                    }
                    Err(e) if e.is_fatal() => {
                        error!("Signal runner for {} stopping: {}", self.pipeline.instrument(), e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Tick source error for {}: {}", self.pipeline.instrument(), e);
                        sleep(SOURCE_RETRY).await;
                    }
                }
            }
        }

        info!(
            "Signal runner for {} stopped: {:?}",
            self.pipeline.instrument(),
            self.stats
        );
        Ok(self.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlgoConfig, GateThresholds};
    use crate::services::record_sink::MemorySink;
    use crate::services::tick_source::MemorySource;
    use serde_json::json;

    fn pipeline() -> SignalPipeline {
        SignalPipeline::new("USD_CAD", &AlgoConfig::default(), GateThresholds::default()).unwrap()
    }

    fn payload(value: serde_json::Value) -> TickPayload {
        TickPayload::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_malformed_payload_skipped() {
        let sink = MemorySink::new();
        let mut runner = SignalRunner::new(pipeline(), MemorySource::default(), sink.clone(), 5);
        assert!(runner
            .handle_payload(&payload(json!({"timestamp": "nope", "price": 1.0})))
            .await
            .is_none());
        assert!(runner
            .handle_payload(&payload(json!({"timestamp": 1_700_000_000})))
            .await
            .is_none());
        assert_eq!(runner.stats().received, 2);
        assert_eq!(runner.stats().skipped, 2);
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_run_stops_when_source_exhausted() {
        let batch = vec![
            payload(json!({"timestamp": "2025-01-06T09:00:00Z", "price": 1.35})),
            payload(json!({"timestamp": "2025-01-06T09:00:10Z", "bid": 1.3500, "ask": 1.3502})),
        ];
        let sink = MemorySink::new();
        let mut runner = SignalRunner::new(pipeline(), MemorySource::single(batch), sink.clone(), 5);
        let stats = runner.run().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(sink.len().await, 2);
        assert!((sink.records().await[1].1.price() - 1.3501).abs() < 1e-12);
    }

    struct IdleSource;

    #[async_trait::async_trait]
    impl TickSource for IdleSource {
        async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
            std::future::pending().await
        }

        fn describe(&self) -> String {
            "idle".to_string()
        }
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_runner() {
        let mut runner = SignalRunner::new(pipeline(), IdleSource, MemorySink::new(), 5);
        let handle = runner.shutdown_handle();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            let _ = handle.send(());
        });
        let stats = runner.run().await.unwrap();
        assert_eq!(stats, RunnerStats::default());
    }

    #[tokio::test]
    async fn test_empty_batches_drain_cleanly() {
        let source = MemorySource::new(vec![vec![]; 3]);
        let mut runner = SignalRunner::new(pipeline(), source, MemorySink::new(), 5);
        let stats = runner.run().await.unwrap();
        assert_eq!(stats.received, 0);
    }
}
