//! Notification collaborators.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;

/// Receives human-readable decision messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, instrument: &str, message: &str) -> Result<()>;
}

/// Emits each message as an `info` event on `crossline::notify`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, instrument: &str, message: &str) -> Result<()> {
        info!(target: "crossline::notify", instrument, "{}", message);
        Ok(())
    }
}

/// Collects messages in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotifier {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(&self, instrument: &str, message: &str) -> Result<()> {
        self.messages
            .lock()
            .await
            .push((instrument.to_string(), message.to_string()));
        Ok(())
    }
}
