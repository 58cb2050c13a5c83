//! Bounded log store
//!
//! Keeps the most recent daemon log lines in a fixed-capacity ring and
//! serves them back in chronological order, optionally filtered by a
//! case-insensitive search string.

use super::ring::RingBuffer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many log lines are retained
pub const LOG_CAPACITY: usize = 300;

/// Log severity, ordered least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warn")]
    Warning,
    Error,
}

impl LogLevel {
    /// Parse a daemon level string, defaulting to `Info` for unknown values
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One log line from the daemon's log stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Severity as sent by the daemon (wire name `type`)
    #[serde(rename = "type")]
    pub level: LogLevel,
    /// Free-text message
    pub payload: String,
    /// Local receipt time; not part of the wire payload
    #[serde(skip, default = "Utc::now")]
    pub time: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, payload: impl Into<String>) -> Self {
        LogEntry {
            level,
            payload: payload.into(),
            time: Utc::now(),
        }
    }
}

/// Fixed-capacity chronological log store
#[derive(Debug)]
pub struct LogStore {
    ring: RingBuffer<LogEntry>,
}

impl LogStore {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LogStore {
            ring: RingBuffer::new(capacity),
        }
    }

    /// Append one entry, overwriting the oldest once full
    pub fn append(&mut self, entry: LogEntry) {
        self.ring.push(entry);
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// All retained entries, oldest first
    pub fn ordered(&self) -> Vec<LogEntry> {
        self.ring.to_vec()
    }

    /// Entries whose payload contains `text` (case-insensitive), oldest first
    ///
    /// An empty search string returns everything.
    pub fn search(&self, text: &str) -> Vec<LogEntry> {
        if text.is_empty() {
            return self.ordered();
        }
        let needle = text.to_lowercase();
        self.ring
            .iter()
            .filter(|e| e.payload.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(payload: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, payload)
    }

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("WARN"), LogLevel::Warning);
        assert_eq!(LogLevel::parse("error"), LogLevel::Error);
        assert_eq!(LogLevel::parse("mystery"), LogLevel::Info);
    }

    #[test]
    fn test_wire_deserialization() {
        let e: LogEntry = serde_json::from_str(r#"{"type":"warning","payload":"dns timeout"}"#)
            .expect("valid log json");
        assert_eq!(e.level, LogLevel::Warning);
        assert_eq!(e.payload, "dns timeout");
    }

    #[test]
    fn test_capacity_overflow_chronological() {
        let mut store = LogStore::with_capacity(3);
        for p in ["x1", "x2", "x3", "x4"] {
            store.append(entry(p));
        }
        let payloads: Vec<_> = store.ordered().into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, vec!["x2", "x3", "x4"]);
    }

    #[test]
    fn test_search_case_insensitive() {
        let mut store = LogStore::new();
        store.append(entry("Dial tcp example.com"));
        store.append(entry("match RULE-SET"));
        let hits = store.search("rule");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload, "match RULE-SET");
        assert_eq!(store.search("").len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut store = LogStore::with_capacity(2);
        store.append(entry("a"));
        store.clear();
        assert!(store.is_empty());
    }
}
