use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::broadcast;

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Put,
    Delete,
}

/// A single watch event representing a state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    /// New value for puts, `None` for deletes.
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// Path segments of the key below `prefix`, or `None` if the key lives elsewhere.
    /// `/registry/quotaincreases/ns/qi` under `/registry/quotaincreases/` is `["ns", "qi"]`.
    pub fn segments_under(&self, prefix: &str) -> Option<Vec<&str>> {
        let rest = self.key.strip_prefix(prefix)?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.split('/').collect())
    }
}

/// In-memory event log that stamps every state mutation with a monotonic
/// sequence number and fans it out to subscribers.
#[derive(Clone)]
pub struct EventLog {
    seq: Arc<RwLock<u64>>,
    sender: broadcast::Sender<WatchEvent>,
}

impl EventLog {
    /// `capacity` bounds how far a subscriber may fall behind before it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            seq: Arc::new(RwLock::new(0)),
            sender,
        }
    }

    /// Record a new event. Called by StateStore on put/delete.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut seq = self.seq.write().await;
        *seq += 1;
        let event = WatchEvent {
            seq: *seq,
            event_type,
            key,
            value,
        };
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the current sequence number.
    pub async fn current_seq(&self) -> u64 {
        *self.seq.read().await
    }

    /// Subscribe to receive new events as they are emitted.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}
