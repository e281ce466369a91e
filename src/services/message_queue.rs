//! Queue of user messages sent while a turn is streaming.
//!
//! The task layer dequeues the next message once the current turn ends.
//! Every mutation broadcasts the new queue contents to subscribers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
}

/// FIFO of [`QueuedMessage`]s.
#[derive(Debug)]
pub struct MessageQueue {
    messages: Vec<QueuedMessage>,
    changes: broadcast::Sender<Vec<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            messages: Vec::new(),
            changes,
        }
    }

    /// Queue a message. Returns `None` for blank text without images.
    pub fn add(&mut self, text: impl Into<String>, images: Vec<String>) -> Option<QueuedMessage> {
        let text = text.into();
        if text.trim().is_empty() && images.is_empty() {
            return None;
        }
        let message = QueuedMessage {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().timestamp_millis(),
            text,
            images,
        };
        debug!(id = %message.id, "Message queued");
        self.messages.push(message.clone());
        self.notify();
        Some(message)
    }

    /// Replace a queued message's content. Returns `false` for unknown ids.
    pub fn update(&mut self, id: &str, text: impl Into<String>, images: Vec<String>) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        message.text = text.into();
        message.images = images;
        self.notify();
        true
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        let removed = self.messages.len() != before;
        if removed {
            self.notify();
        }
        removed
    }

    /// Take the oldest message.
    pub fn dequeue(&mut self) -> Option<QueuedMessage> {
        if self.messages.is_empty() {
            return None;
        }
        let message = self.messages.remove(0);
        self.notify();
        Some(message)
    }

    pub fn messages(&self) -> &[QueuedMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Receive a snapshot after every change.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<QueuedMessage>> {
        self.changes.subscribe()
    }

    fn notify(&self) {
        let _ = self.changes.send(self.messages.clone());
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}
