//! Rolling metric windows
//!
//! Each metric keeps two parallel sequences, labels (timestamps) and
//! values, bounded to a fixed point count. Appending beyond the bound
//! drops from the front, so a chart always sees the most recent window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Default window length in points; at one sample per second this spans
/// two and a half minutes of history
pub const DEFAULT_WINDOW: usize = 150;

/// Upload rate metric
pub const METRIC_UP: &str = "up";
/// Download rate metric
pub const METRIC_DOWN: &str = "down";
/// Daemon memory-in-use metric
pub const METRIC_MEMORY: &str = "inuse";

#[derive(Debug)]
struct SeriesWindow {
    labels: VecDeque<DateTime<Utc>>,
    values: VecDeque<u64>,
}

/// Immutable copy of one metric's current window
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot {
    pub labels: Vec<DateTime<Utc>>,
    pub values: Vec<u64>,
}

/// Bounded per-metric time series store
#[derive(Debug)]
pub struct SeriesAccumulator {
    metrics: HashMap<String, SeriesWindow>,
    window: usize,
}

impl SeriesAccumulator {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        assert!(window > 0, "series window must be non-zero");
        SeriesAccumulator {
            metrics: HashMap::new(),
            window,
        }
    }

    /// Append one sample to a named metric, dropping the oldest point once
    /// the window is full
    pub fn append(&mut self, metric: &str, timestamp: DateTime<Utc>, value: u64) {
        let series = self
            .metrics
            .entry(metric.to_string())
            .or_insert_with(|| SeriesWindow {
                labels: VecDeque::with_capacity(self.window),
                values: VecDeque::with_capacity(self.window),
            });
        if series.labels.len() == self.window {
            series.labels.pop_front();
            series.values.pop_front();
        }
        series.labels.push_back(timestamp);
        series.values.push_back(value);
        debug_assert_eq!(series.labels.len(), series.values.len());
    }

    /// Current window for a metric, or `None` if nothing was appended yet
    pub fn snapshot(&self, metric: &str) -> Option<SeriesSnapshot> {
        self.metrics.get(metric).map(|s| SeriesSnapshot {
            labels: s.labels.iter().copied().collect(),
            values: s.values.iter().copied().collect(),
        })
    }

    /// Length of a metric's current window
    pub fn len(&self, metric: &str) -> usize {
        self.metrics.get(metric).map_or(0, |s| s.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Default for SeriesAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
