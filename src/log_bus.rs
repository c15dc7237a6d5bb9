// LogBus - best-effort broadcast of human-readable status to live subscribers
// In-process broadcast channel, optionally forwarded to a Redis pub/sub channel.
// publish() never blocks and never fails the caller.

#[cfg(feature = "redis")]
use crate::redis_manager::RedisManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Ephemeral status message. Never persisted, no replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone)]
pub struct LogBus {
    sender: broadcast::Sender<LogEvent>,
    forward: Option<mpsc::UnboundedSender<LogEvent>>,
}

impl LogBus {
    /// `capacity`: events buffered per subscriber before slow receivers start lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            forward: None,
        }
    }

    /// Forward every event as JSON to a Redis pub/sub channel from a background task.
    #[cfg(feature = "redis")]
    pub fn with_redis(mut self, redis: RedisManager, channel: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("⚠️ [LogBus] Failed to serialize event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = redis.publish(&channel, &payload).await {
                    warn!("⚠️ [LogBus] Redis publish to {} failed: {:#}", channel, e);
                }
            }
            debug!("[LogBus] Redis forwarder stopped");
        });
        self.forward = Some(tx);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }

    /// Whether events are also forwarded to Redis.
    pub fn is_forwarding(&self) -> bool {
        self.forward.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Fire-and-forget. Also mirrored to the local log at the matching level.
    pub fn publish(&self, message: impl Into<String>, severity: Severity) {
        let event = LogEvent {
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        };

        match severity {
            Severity::Info | Severity::Success => info!("{}", event.message),
            Severity::Warning => warn!("{}", event.message),
            Severity::Error => error!("{}", event.message),
        }

        // Err only means nobody is listening right now
        let _ = self.sender.send(event.clone());

        if let Some(forward) = &self.forward {
            if forward.send(event).is_err() {
                debug!("[LogBus] Redis forwarder is gone, dropping event");
            }
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.publish(message, Severity::Info)
    }

    pub fn success(&self, message: impl Into<String>) {
        self.publish(message, Severity::Success)
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.publish(message, Severity::Warning)
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(message, Severity::Error)
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new(256)
    }
}
