//! Append-only execution log.
//!
//! Every component of a run reports through [`Diagnostics`]. Entries are kept in a
//! bounded ring buffer, mirrored to `tracing`, and broadcast to live subscribers.

use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

pub struct Diagnostics {
    entries: Mutex<VecDeque<ExecutionLogEntry>>,
    capacity: usize,
    sender: broadcast::Sender<ExecutionLogEntry>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            sender,
        }
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.append(ExecutionLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
            node_id: None,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn append(&self, entry: ExecutionLogEntry) {
        let node = entry.node_id.as_deref().unwrap_or("-");
        match entry.level {
            LogLevel::Debug => tracing::debug!(node, "{}", entry.message),
            LogLevel::Info => tracing::info!(node, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(node, "{}", entry.message),
            LogLevel::Error => tracing::error!(node, "{}", entry.message),
        }

        // A poisoned lock only means another thread panicked mid-append; the buffer is
        // still a valid deque.
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        drop(entries);

        let _ = self.sender.send(entry);
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionLogEntry> {
        self.sender.subscribe()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Log handle scoped to a single node.
#[derive(Clone)]
pub struct NodeLogger {
    node_id: String,
    node_name: String,
    sink: Arc<Diagnostics>,
}

impl NodeLogger {
    pub fn new(node_id: impl Into<String>, node_name: impl Into<String>, sink: Arc<Diagnostics>) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            sink,
        }
    }

    /// Logger writing to a private sink. Handy for calling nodes outside a run.
    pub fn detached(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self::new(node_id.clone(), node_id, Arc::new(Diagnostics::default()))
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.sink.append(ExecutionLogEntry {
            timestamp: Utc::now(),
            level,
            message: format!("[{}] {}", self.node_name, message.into()),
            data,
            node_id: Some(self.node_id.clone()),
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None);
    }

    pub fn sink(&self) -> &Arc<Diagnostics> {
        &self.sink
    }
}
