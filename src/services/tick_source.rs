//! Tick sources.
//!
//! Producers publish price messages either as a Redis stream
//! (`<prefix>:<instrument>`) or as individual string keys
//! (`<prefix>:<instrument>:<id>`). Sources hand back raw payloads; turning
//! them into ticks is the runner's job.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Map;
use std::collections::{HashMap, VecDeque};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::SourceMode;
use crate::error::{AppError, Result};
use crate::types::TickPayload;

/// XREAD block time.
const STREAM_BLOCK_MS: usize = 1000;
/// XREAD batch size.
const STREAM_COUNT: usize = 10;
/// Pause between empty key scans.
const SCAN_IDLE: Duration = Duration::from_millis(500);

/// Something that yields batches of raw tick payloads for one instrument.
#[async_trait]
pub trait TickSource: Send {
    /// Next batch, possibly empty. `Ok(None)` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>>;

    /// Called once the last batch has been fully handled. Sources that
    /// consume their input remove it here, never inside `next_batch`, so a
    /// failed or cancelled fetch leaves everything in place.
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Stable sort by parsed timestamp; unparseable payloads go last.
pub fn sort_by_timestamp(payloads: &mut [TickPayload]) {
    payloads.sort_by_cached_key(|p| (p.timestamp().is_none(), p.timestamp()));
}

/// Build a payload from stream entry fields.
///
/// A field holding a JSON object string wins; otherwise the fields
/// themselves are the payload.
pub fn payload_from_stream_fields(fields: &HashMap<String, String>) -> Option<TickPayload> {
    if fields.is_empty() {
        return None;
    }

    let mut names: Vec<&String> = fields.keys().collect();
    names.sort();
    for name in &names {
        let raw = fields[*name].trim();
        if raw.starts_with('{') && raw.ends_with('}') {
            if let Some(payload) = TickPayload::from_json(raw) {
                return Some(payload);
            }
        }
    }

    let mut map = Map::new();
    for name in names {
        map.insert(name.clone(), serde_json::Value::String(fields[name].clone()));
    }
    Some(TickPayload(map))
}

fn parse_stored(key: &str, raw: &str) -> Option<TickPayload> {
    let payload = TickPayload::from_json(raw);
    if payload.is_none() {
        debug!("Skipping non-JSON value at {}", key);
    }
    payload
}

// ============================================================================
// In-memory
// ============================================================================

/// Pre-loaded batches, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: VecDeque<Vec<TickPayload>>,
}

impl MemorySource {
    pub fn new(batches: Vec<Vec<TickPayload>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }

    /// One batch containing every payload.
    pub fn single(payloads: Vec<TickPayload>) -> Self {
        Self::new(vec![payloads])
    }

    pub fn push(&mut self, batch: Vec<TickPayload>) {
        self.batches.push_back(batch);
    }
}

#[async_trait]
impl TickSource for MemorySource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        Ok(self.batches.pop_front())
    }

    fn describe(&self) -> String {
        format!("memory ({} batches pending)", self.batches.len())
    }
}

// ============================================================================
// Redis stream
// ============================================================================

/// Consumes a Redis stream with XREAD from the start.
pub struct RedisStreamSource {
    conn: ConnectionManager,
    key: String,
    last_id: String,
}

impl RedisStreamSource {
    pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
        Self {
            conn,
            key: key.into(),
            last_id: "0-0".to_string(),
        }
    }

    pub fn last_id(&self) -> &str {
        &self.last_id
    }
}

#[async_trait]
impl TickSource for RedisStreamSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        let opts = StreamReadOptions::default()
            .block(STREAM_BLOCK_MS)
            .count(STREAM_COUNT);
        let reply: Option<StreamReadReply> = self
            .conn
            .xread_options(&[&self.key], &[&self.last_id], &opts)
            .await?;

        let mut batch = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                self.last_id = entry.id.clone();
                let fields: HashMap<String, String> = entry
                    .map
                    .iter()
                    .filter_map(|(k, v)| redis::from_redis_value::<String>(v).ok().map(|s| (k.clone(), s)))
                    .collect();
                match payload_from_stream_fields(&fields) {
                    Some(payload) => batch.push(payload),
                    None => debug!("Empty stream entry {} on {}", entry.id, self.key),
                }
            }
        }
        Ok(Some(batch))
    }

    fn describe(&self) -> String {
        format!("stream {} (after {})", self.key, self.last_id)
    }
}

// ============================================================================
// Redis key scan
// ============================================================================

async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut iter = conn.scan_match::<_, String>(pattern).await?;
    while let Some(key) = iter.next_item().await {
        keys.push(key);
    }
    Ok(keys)
}

/// Polls per-message keys, deleting them once their batch is committed.
pub struct RedisKeyScanSource {
    conn: ConnectionManager,
    pattern: String,
    /// Keys behind the last returned batch, deleted on commit.
    consumed: Vec<String>,
}

impl RedisKeyScanSource {
    pub fn new(conn: ConnectionManager, pattern: impl Into<String>) -> Self {
        Self {
            conn,
            pattern: pattern.into(),
            consumed: Vec::new(),
        }
    }

    /// Keys waiting for a commit.
    pub fn uncommitted(&self) -> &[String] {
        &self.consumed
    }
}

#[async_trait]
impl TickSource for RedisKeyScanSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        let keys = scan_keys(&mut self.conn, &self.pattern).await?;
        if keys.is_empty() {
            sleep(SCAN_IDLE).await;
            return Ok(Some(Vec::new()));
        }

        // No key is deleted until commit.
        let mut batch = Vec::with_capacity(keys.len());
        for key in &keys {
            let value: Option<String> = self.conn.get(key).await?;
            if let Some(payload) = value.as_deref().and_then(|raw| parse_stored(key, raw)) {
                batch.push(payload);
            }
        }
        sort_by_timestamp(&mut batch);
        self.consumed = keys;
        Ok(Some(batch))
    }

    async fn commit(&mut self) -> Result<()> {
        if self.consumed.is_empty() {
            return Ok(());
        }
        // On failure the keys stay in Redis and the next scan returns them again.
        let keys = std::mem::take(&mut self.consumed);
        self.conn.del::<_, ()>(&keys).await?;
        debug!("Deleted {} consumed keys for {}", keys.len(), self.pattern);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("key scan {}", self.pattern)
    }
}

// ============================================================================
// Redis replay
// ============================================================================

/// Reads every stored key once, in timestamp order, without deleting.
pub struct RedisReplaySource {
    conn: ConnectionManager,
    pattern: String,
    done: bool,
}

impl RedisReplaySource {
    pub fn new(conn: ConnectionManager, pattern: impl Into<String>) -> Self {
        Self {
            conn,
            pattern: pattern.into(),
            done: false,
        }
    }
}

#[async_trait]
impl TickSource for RedisReplaySource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        if self.done {
            return Ok(None);
        }

        let keys = scan_keys(&mut self.conn, &self.pattern).await?;
        let mut batch = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<String> = self.conn.get(&key).await?;
            if let Some(payload) = value.as_deref().and_then(|raw| parse_stored(&key, raw)) {
                batch.push(payload);
            }
        }
        sort_by_timestamp(&mut batch);
        info!("Replaying {} stored ticks from {}", batch.len(), self.pattern);
        self.done = true;
        Ok(Some(batch))
    }

    fn describe(&self) -> String {
        format!("replay {}", self.pattern)
    }
}

// ============================================================================
// Mode selection
// ============================================================================

/// Redis-backed source chosen from [`SourceMode`].
pub enum RedisTickSource {
    Stream(RedisStreamSource),
    Scan(RedisKeyScanSource),
    Replay(RedisReplaySource),
}

impl RedisTickSource {
    /// Pick a source for `instrument`. `Auto` asks Redis for the type of the
    /// stream key and falls back to key scanning when it is not a stream.
    pub async fn connect(
        mut conn: ConnectionManager,
        mode: SourceMode,
        prefix: &str,
        instrument: &str,
    ) -> Result<Self> {
        if instrument.is_empty() {
            return Err(AppError::Config("instrument name is empty".to_string()));
        }
        let stream_key = format!("{}:{}", prefix, instrument);
        let pattern = format!("{}:{}:*", prefix, instrument);

        let mode = match mode {
            SourceMode::Auto => {
                let key_type = redis::cmd("TYPE")
                    .arg(&stream_key)
                    .query_async::<_, String>(&mut conn)
                    .await;
                match key_type {
                    Ok(t) if t == "stream" => SourceMode::Stream,
                    Ok(_) => SourceMode::Scan,
                    Err(e) => {
                        warn!("TYPE {} failed ({}); falling back to key scan", stream_key, e);
                        SourceMode::Scan
                    }
                }
            }
            other => other,
        };

        let source = match mode {
            SourceMode::Stream => Self::Stream(RedisStreamSource::new(conn, stream_key)),
            SourceMode::Replay => Self::Replay(RedisReplaySource::new(conn, pattern)),
            SourceMode::Scan | SourceMode::Auto => Self::Scan(RedisKeyScanSource::new(conn, pattern)),
        };
        info!("Tick source for {}: {}", instrument, source.describe());
        Ok(source)
    }
}

#[async_trait]
impl TickSource for RedisTickSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<TickPayload>>> {
        match self {
            Self::Stream(s) => s.next_batch().await,
            Self::Scan(s) => s.next_batch().await,
            Self::Replay(s) => s.next_batch().await,
        }
    }

    async fn commit(&mut self) -> Result<()> {
        match self {
            Self::Stream(s) => s.commit().await,
            Self::Scan(s) => s.commit().await,
            Self::Replay(s) => s.commit().await,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Stream(s) => s.describe(),
            Self::Scan(s) => s.describe(),
            Self::Replay(s) => s.describe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_stream_fields_prefer_json_string() {
        let f = fields(&[
            ("string", r#"{"timestamp": "2025-01-06T09:00:00Z", "price": 1.25}"#),
            ("source", "oanda"),
        ]);
        let payload = payload_from_stream_fields(&f).unwrap();
        assert_eq!(payload.price(), Some(1.25));
        assert!(payload.get("source").is_none());
    }

    #[test]
    fn test_stream_fields_as_payload() {
        let f = fields(&[("time", "2025-01-06 09:00:00"), ("bid", "1.0"), ("ask", "1.5")]);
        let payload = payload_from_stream_fields(&f).unwrap();
        assert_eq!(payload.price(), Some(1.25));
        assert!(payload.timestamp().is_some());
    }

    #[test]
    fn test_stream_fields_empty() {
        assert!(payload_from_stream_fields(&HashMap::new()).is_none());
    }

    #[test]
    fn test_sort_by_timestamp_puts_unparseable_last() {
        let mut batch: Vec<TickPayload> = [
            json!({"timestamp": "2025-01-06T09:00:02Z", "price": 3.0}),
            json!({"timestamp": "garbage", "price": 9.0}),
            json!({"timestamp": "2025-01-06T09:00:00Z", "price": 1.0}),
            json!({"timestamp": "2025-01-06T09:00:01Z", "price": 2.0}),
        ]
        .into_iter()
        .filter_map(TickPayload::from_value)
        .collect();
        sort_by_timestamp(&mut batch);
        let prices: Vec<f64> = batch.iter().filter_map(|p| p.price()).collect();
        assert_eq!(prices, vec![1.0, 2.0, 3.0, 9.0]);
    }

    #[tokio::test]
    async fn test_memory_source_drains_then_exhausts() {
        let payload = TickPayload::from_value(json!({"timestamp": 1_700_000_000, "price": 1.0})).unwrap();
        let mut source = MemorySource::new(vec![vec![payload.clone()], vec![]]);
        assert_eq!(source.next_batch().await.unwrap(), Some(vec![payload]));
        assert_eq!(source.next_batch().await.unwrap(), Some(vec![]));
        assert_eq!(source.next_batch().await.unwrap(), None);
    }
}
