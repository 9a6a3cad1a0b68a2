//! Logging for the coordination layer.
//!
//! Every call site logs through `tracing`. On top of that, the no-op paths
//! (routing misses, readiness drops, refused closes) are recorded in a
//! fixed-capacity ring buffer so a host can surface them in a debug panel
//! and tests can assert that a drop was logged rather than silently ignored.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single log entry stored in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: i64,
    pub level: LogLevel,
    /// Component that produced the entry ("registry", "dispatch", ...)
    pub source: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

pub(crate) const LOG_RING_CAPACITY: usize = 500;

/// Fixed-capacity circular buffer for structured log entries.
pub(crate) struct LogRingBuffer {
    entries: Vec<Option<LogEntry>>,
    capacity: usize,
    /// Write position (wraps around)
    write_pos: usize,
    /// Number of entries currently stored (≤ capacity)
    count: usize,
    /// Monotonically increasing ID for the next entry
    next_id: u64,
}

impl LogRingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            entries,
            capacity,
            write_pos: 0,
            count: 0,
            next_id: 1,
        }
    }

    /// Push a new entry into the ring buffer. Returns the assigned entry ID.
    pub(crate) fn push(&mut self, level: LogLevel, source: &str, message: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        self.entries[self.write_pos] = Some(LogEntry {
            id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            source: source.to_string(),
            message,
        });
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }

        id
    }

    /// Return entries in chronological order (oldest first), up to `limit`.
    /// If `limit` is 0, returns all entries.
    pub(crate) fn get_entries(&self, limit: usize) -> Vec<LogEntry> {
        if self.count == 0 {
            return Vec::new();
        }

        let effective_limit = if limit == 0 { self.count } else { limit.min(self.count) };

        // write_pos points to the oldest entry once the buffer is full
        let start = if self.count < self.capacity { 0 } else { self.write_pos };

        let skip = self.count - effective_limit;
        let mut result = Vec::with_capacity(effective_limit);
        for i in skip..self.count {
            let idx = (start + i) % self.capacity;
            if let Some(entry) = &self.entries[idx] {
                result.push(entry.clone());
            }
        }

        result
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
        self.write_pos = 0;
        self.count = 0;
        // next_id stays monotonic
    }

    pub(crate) fn len(&self) -> usize {
        self.count
    }
}

// ---------------------------------------------------------------------------
// Shared diagnostics log
// ---------------------------------------------------------------------------

/// Thread-safe handle over the ring buffer. Each `record` also goes to `tracing`.
pub struct DiagnosticsLog {
    buffer: Mutex<LogRingBuffer>,
}

impl Default for DiagnosticsLog {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

impl DiagnosticsLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(LogRingBuffer::new(capacity)),
        }
    }

    pub fn record(&self, level: LogLevel, source: &str, message: impl Into<String>) -> u64 {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(source, "{message}"),
            LogLevel::Info => tracing::info!(source, "{message}"),
            LogLevel::Warn => tracing::warn!(source, "{message}"),
            LogLevel::Error => tracing::error!(source, "{message}"),
        }
        self.buffer.lock().push(level, source, message)
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) -> u64 {
        self.record(LogLevel::Warn, source, message)
    }

    /// Up to `limit` most recent entries (0 = all), oldest first.
    pub fn entries(&self, limit: usize) -> Vec<LogEntry> {
        self.buffer.lock().get_entries(limit)
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Env var that overrides the configured filter (same syntax as `RUST_LOG`).
pub const LOG_ENV_VAR: &str = "CHATDECK_LOG";

/// Install the global `tracing` subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "tokio-console")]
    {
        use tracing_subscriber::prelude::*;
        let _ = tracing_subscriber::registry()
            .with(console_subscriber::spawn())
            .with(tracing_subscriber::fmt::layer().with_filter(filter))
            .try_init();
    }

    #[cfg(not(feature = "tokio-console"))]
    {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
