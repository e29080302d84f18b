//! Decision record sinks.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::types::DecisionRecord;

/// Destination for decision records. Retention and transport are the sink's concern.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, instrument: &str, record: &DecisionRecord) -> Result<()>;
}

/// Writes each record as a JSON string key with a TTL:
/// `<prefix>:<instrument>:<8 hex chars>`.
#[derive(Clone)]
pub struct RedisKeySink {
    conn: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisKeySink {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            ttl_secs,
        }
    }

    /// Fresh key for one record.
    pub fn record_key(&self, instrument: &str) -> String {
        record_key(&self.prefix, instrument)
    }
}

fn record_key(prefix: &str, instrument: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}:{}:{}", prefix, instrument, &id[..8])
}

#[async_trait]
impl RecordSink for RedisKeySink {
    async fn publish(&self, instrument: &str, record: &DecisionRecord) -> Result<()> {
        let key = self.record_key(instrument);
        let json = serde_json::to_string(record)?;

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&key)
            .arg(&json)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!("Published {}", key);
        Ok(())
    }
}

/// Keeps published records in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<(String, DecisionRecord)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, in order.
    pub async fn records(&self) -> Vec<(String, DecisionRecord)> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn publish(&self, instrument: &str, record: &DecisionRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .push((instrument.to_string(), record.clone()));
        Ok(())
    }
}
