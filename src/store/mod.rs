//! Bounded storage primitives
//!
//! The ring buffer is the foundation; the log store builds the daemon log
//! history on top of it.

pub mod logs;
pub mod ring;

pub use logs::{LogEntry, LogLevel, LogStore, LOG_CAPACITY};
pub use ring::RingBuffer;
