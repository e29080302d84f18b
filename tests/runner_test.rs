//! Runner tests with in-memory sources and sinks

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use crossline::config::{AlgoConfig, GateThresholds};
use crossline::error::{AppError, Result};
use crossline::services::{
    MemoryNotifier, MemorySink, MemorySource, RecordSink, SignalPipeline, SignalRunner,
    TickSource,
};
use crossline::types::{DecisionRecord, TickPayload};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

fn pipeline() -> SignalPipeline {
    SignalPipeline::new("USD_CAD", &AlgoConfig::default(), GateThresholds::default()).unwrap()
}

/// Quote payloads in the producer's format, one every 30 seconds.
fn payloads(count: i64) -> Vec<TickPayload> {
    let start = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let phase = i as f64 * std::f64::consts::TAU / 80.0;
            let mid = 1.35 + 0.005 * phase.sin();
            let ts = (start + Duration::seconds(i * 30)).to_rfc3339();
            TickPayload::from_value(json!({
                "timestamp": ts,
                "bid": mid - 0.0001,
                "ask": mid + 0.0001,
            }))
            .unwrap()
        })
        .collect()
}

struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    async fn publish(&self, _instrument: &str, _record: &DecisionRecord) -> Result<()> {
        Err(AppError::Transport("sink offline".to_string()))
    }
}

/// Consuming source: payloads leave the store only on commit, like
/// per-message Redis keys.
struct StoreSource {
    store: Arc<Mutex<VecDeque<TickPayload>>>,
    batch_size: usize,
    calls: usize,
    /// Fetch number that reads its keys and then fails.
    fail_on: Option<usize>,
    /// Fetch number that reads its keys and then never returns.
    stall_on: Option<usize>,
    pending: usize,
}

impl StoreSource {
    fn new(payloads: Vec<TickPayload>, batch_size: usize) -> (Self, Arc<Mutex<VecDeque<TickPayload>>>) {
        let store = Arc::new(Mutex::new(VecDeque::from(payloads)));
        let source = Self {
            store: store.clone(),
            batch_size,
            calls: 0,
            fail_on: None,
            stall_on: None,
            pending: 0,
        };
        (source, store)
    }
}

#[async_trait]
impl TickSource for StoreSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        self.calls += 1;
        let batch: Vec<TickPayload> = {
            let store = self.store.lock().unwrap();
            if store.is_empty() {
                return Ok(None);
            }
            store.iter().take(self.batch_size).cloned().collect()
        };
        tokio::task::yield_now().await;
        if self.fail_on == Some(self.calls) {
            return Err(AppError::Transport("connection reset".to_string()));
        }
        if self.stall_on == Some(self.calls) {
            std::future::pending::<()>().await;
        }
        self.pending = batch.len();
        Ok(Some(batch))
    }

    async fn commit(&mut self) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let taken = self.pending.min(store.len());
        store.drain(..taken);
        self.pending = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        "store".to_string()
    }
}

#[tokio::test]
async fn test_failed_fetch_loses_no_ticks() {
    let (mut source, store) = StoreSource::new(payloads(20), 8);
    source.fail_on = Some(2);
    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), source, sink.clone(), 5);

    let stats = runner.run().await.unwrap();

    assert_eq!(stats.processed, 20);
    assert_eq!(sink.len().await, 20);
    assert!(store.lock().unwrap().is_empty());
    for pair in sink.records().await.windows(2) {
        assert!(pair[0].1.timestamp() < pair[1].1.timestamp());
    }
}

#[tokio::test]
async fn test_shutdown_during_fetch_keeps_uncommitted_ticks() {
    let (mut source, store) = StoreSource::new(payloads(10), 5);
    source.stall_on = Some(2);
    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), source, sink.clone(), 5);
    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = shutdown.send(());
    });

    let stats = runner.run().await.unwrap();

    assert_eq!(stats.processed, 5);
    assert_eq!(sink.len().await, 5);
    // The interrupted fetch was never committed, so its ticks are still there.
    assert_eq!(store.lock().unwrap().len(), 5);
}

#[tokio::test]
async fn test_runner_publishes_every_tick() {
    let batches: Vec<Vec<TickPayload>> = payloads(400).chunks(10).map(|c| c.to_vec()).collect();
    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), MemorySource::new(batches), sink.clone(), 5);

    let stats = runner.run().await.unwrap();
    let records = sink.records().await;

    assert_eq!(stats.received, 400);
    assert_eq!(stats.processed, 400);
    assert_eq!(stats.skipped, 0);
    assert_eq!(records.len(), 400);
    assert!(records.iter().all(|(instrument, _)| instrument == "USD_CAD"));
    assert_eq!(
        stats.decisions,
        records.iter().filter(|(_, r)| r.decision.is_some()).count() as u64
    );
    assert!(stats.decisions > 0);

    // Records come out in tick order.
    for pair in records.windows(2) {
        assert!(pair[0].1.timestamp() < pair[1].1.timestamp());
    }
}

#[tokio::test]
async fn test_notifier_only_when_emitting() {
    let quiet = MemoryNotifier::new();
    let mut runner = SignalRunner::new(pipeline(), MemorySource::single(payloads(400)), MemorySink::new(), 5)
        .with_notifier(Arc::new(quiet.clone()));
    runner.run().await.unwrap();
    assert!(quiet.messages().await.is_empty());

    let loud = MemoryNotifier::new();
    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), MemorySource::single(payloads(400)), sink.clone(), 5)
        .with_notifier(Arc::new(loud.clone()))
        .with_emit_side_effects(true);
    let stats = runner.run().await.unwrap();

    let messages = loud.messages().await;
    let expected: Vec<String> = sink
        .records()
        .await
        .into_iter()
        .filter_map(|(_, r)| r.message)
        .collect();
    assert_eq!(messages.len() as u64, stats.notifications);
    assert_eq!(
        messages.into_iter().map(|(_, m)| m).collect::<Vec<_>>(),
        expected
    );
}

#[tokio::test]
async fn test_sink_failures_are_counted_not_fatal() {
    let mut runner = SignalRunner::new(pipeline(), MemorySource::single(payloads(20)), FailingSink, 5);
    let stats = runner.run().await.unwrap();
    assert_eq!(stats.processed, 20);
    assert_eq!(stats.sink_failures, 20);
}

#[tokio::test]
async fn test_bad_payloads_skipped_between_good_ones() {
    let mut batch = payloads(3);
    batch.insert(1, TickPayload::from_value(json!({"time": "??", "price": 1.0})).unwrap());
    batch.insert(2, TickPayload::from_value(json!({"timestamp": "2025-01-06T09:00:15Z"})).unwrap());

    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), MemorySource::single(batch), sink.clone(), 5);
    let stats = runner.run().await.unwrap();
    assert_eq!(stats.received, 5);
    assert_eq!(stats.skipped, 2);
    assert_eq!(sink.len().await, 3);
}

#[test]
fn test_handle_payload_blocking() {
    let sink = MemorySink::new();
    let mut runner = SignalRunner::new(pipeline(), MemorySource::default(), sink.clone(), 3);
    let payload = TickPayload::from_json(r#"{"timestamp": 1736154000, "price": "1.35017"}"#).unwrap();

    let record = tokio_test::block_on(runner.handle_payload(&payload)).unwrap();
    assert_eq!(record.signal.precision, 3);
    assert_eq!(record.signal.base_ema, 1.35);
    assert_eq!(tokio_test::block_on(sink.len()), 1);
}
