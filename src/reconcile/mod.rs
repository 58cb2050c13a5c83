//! Snapshot reconciliation
//!
//! Consumes successive `/connections` snapshots from the daemon and derives
//! the display view: per-connection transfer rates since the previous
//! snapshot, a stable active list, and a bounded history of connections
//! that disappeared between snapshots.
//!
//! The connection id is the sole join key across snapshots. Raw payloads
//! are never mutated; every pass produces a fresh formatted list that
//! replaces the previous one wholesale.

pub mod source_map;

pub use source_map::{SourceMap, SourceRule};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum retained closed-connection records, newest first
pub const MAX_CLOSED_CONNECTIONS: usize = 100;

/// One `/connections` payload from the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionsSnapshot {
    /// Total download bytes since daemon start
    #[serde(rename = "downloadTotal", default)]
    pub download_total: u64,
    /// Total upload bytes since daemon start
    #[serde(rename = "uploadTotal", default)]
    pub upload_total: u64,
    /// Active connections
    #[serde(default)]
    pub connections: Vec<RawConnection>,
    /// Daemon memory usage in bytes, when reported
    #[serde(default)]
    pub memory: Option<u64>,
}

/// One active connection as reported by the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConnection {
    pub id: String,
    pub metadata: RawMetadata,
    pub upload: u64,
    pub download: u64,
    pub start: DateTime<Utc>,
    pub chains: Vec<String>,
    pub rule: String,
    #[serde(rename = "rulePayload", default)]
    pub rule_payload: String,
}

/// Connection metadata as reported by the daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub network: String,
    #[serde(rename = "type", default)]
    pub conn_type: String,
    #[serde(rename = "sourceIP", default)]
    pub source_ip: String,
    #[serde(rename = "sourcePort", default)]
    pub source_port: String,
    #[serde(rename = "destinationIP", default)]
    pub destination_ip: String,
    #[serde(rename = "destinationPort", default)]
    pub destination_port: String,
    #[serde(rename = "remoteDestination", default)]
    pub remote_destination: String,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "sniffHost", default)]
    pub sniff_host: String,
    #[serde(default)]
    pub process: String,
}

/// Display-ready connection derived from two adjacent snapshots
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedConnection {
    /// Stable identifier, the join key across snapshots
    pub id: String,
    /// Cumulative upload bytes
    pub upload: u64,
    /// Cumulative download bytes
    pub download: u64,
    /// Upload bytes since the previous snapshot
    pub upload_speed: u64,
    /// Download bytes since the previous snapshot
    pub download_speed: u64,
    /// Milliseconds elapsed since the connection started
    pub elapsed_ms: i64,
    /// Proxy chain rendered as `exit -> entry`
    pub chains: String,
    /// Rule, with payload appended when present
    pub rule: String,
    /// `host:port`, falling back to the destination IP for direct-IP dials
    pub host: String,
    /// Sniffed host, `-` when absent
    pub sniff_host: String,
    /// `TYPE(network)` display string
    pub conn_type: String,
    /// Raw network (tcp/udp)
    pub network: String,
    /// Source label resolved through the source-name mapping
    pub source: String,
    pub source_ip: String,
    pub source_port: String,
    pub destination_ip: String,
    pub destination_port: String,
    /// Process name, `-` when absent
    pub process: String,
}

/// Render a proxy chain for display without consuming the source list
///
/// The daemon reports chains entry-first; the display convention is
/// `exit -> entry`.
pub fn display_chains(chains: &[String]) -> String {
    match chains {
        [] => String::new(),
        [only] => only.clone(),
        [first, .., last] => format!("{} -> {}", last, first),
    }
}

/// Format one raw connection against the previous pass's counters
///
/// `prev` maps id to the previous cumulative (upload, download); an absent
/// entry means a zero baseline, so the full cumulative value becomes the
/// first delta.
pub fn format_connection(
    raw: &RawConnection,
    prev: &HashMap<&str, (u64, u64)>,
    now: DateTime<Utc>,
    sources: &SourceMap,
) -> FormattedConnection {
    let m = &raw.metadata;
    let (prev_up, prev_down) = prev.get(raw.id.as_str()).copied().unwrap_or((0, 0));

    // host is empty for direct IP connections
    let host = if m.host.is_empty() {
        &m.destination_ip
    } else {
        &m.host
    };
    let destination_ip = [&m.remote_destination, &m.destination_ip, &m.host]
        .into_iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_default();
    let fallback = format!("{}:{}", m.source_ip, m.source_port);

    FormattedConnection {
        id: raw.id.clone(),
        upload: raw.upload,
        download: raw.download,
        upload_speed: raw.upload.saturating_sub(prev_up),
        download_speed: raw.download.saturating_sub(prev_down),
        elapsed_ms: (now - raw.start).num_milliseconds(),
        chains: display_chains(&raw.chains),
        rule: if raw.rule_payload.is_empty() {
            raw.rule.clone()
        } else {
            format!("{} :: {}", raw.rule, raw.rule_payload)
        },
        host: format!("{}:{}", host, m.destination_port),
        sniff_host: if m.sniff_host.is_empty() {
            "-".to_string()
        } else {
            m.sniff_host.clone()
        },
        conn_type: format!("{}({})", m.conn_type, m.network),
        network: m.network.clone(),
        source: sources.resolve(&m.source_ip, &fallback),
        source_ip: m.source_ip.clone(),
        source_port: m.source_port.clone(),
        destination_ip,
        destination_port: m.destination_port.clone(),
        process: if m.process.is_empty() {
            "-".to_string()
        } else {
            m.process.clone()
        },
    }
}

/// Diffs adjacent snapshots into the published connection view
///
/// Owns three pieces of state: the delta baseline (always advanced), the
/// published active list (frozen while paused), and the capped closed
/// history.
#[derive(Debug, Default)]
pub struct Reconciler {
    /// Baseline for the next pass's deltas; advances even when paused
    prev: Vec<FormattedConnection>,
    /// Published active view
    active: Vec<FormattedConnection>,
    /// Closed history, newest first, capped at [`MAX_CLOSED_CONNECTIONS`]
    closed: Vec<FormattedConnection>,
    paused: bool,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one snapshot; returns the connections that disappeared
    ///
    /// `now` is captured once by the caller and applied to every
    /// connection in the pass.
    pub fn reconcile(
        &mut self,
        snapshot: &ConnectionsSnapshot,
        sources: &SourceMap,
        now: DateTime<Utc>,
    ) -> Vec<FormattedConnection> {
        let prev_counters: HashMap<&str, (u64, u64)> = self
            .prev
            .iter()
            .map(|c| (c.id.as_str(), (c.upload, c.download)))
            .collect();

        // Duplicate ids within one snapshot are upstream misbehavior;
        // last write wins while keeping first-seen order.
        let mut next: Vec<FormattedConnection> = Vec::with_capacity(snapshot.connections.len());
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(snapshot.connections.len());
        for raw in &snapshot.connections {
            let formatted = format_connection(raw, &prev_counters, now, sources);
            match index.get(raw.id.as_str()) {
                Some(&i) => next[i] = formatted,
                None => {
                    index.insert(raw.id.as_str(), next.len());
                    next.push(formatted);
                }
            }
        }

        let newly_closed: Vec<FormattedConnection> = self
            .prev
            .iter()
            .filter(|c| !index.contains_key(c.id.as_str()))
            .cloned()
            .collect();
        if !newly_closed.is_empty() {
            let mut merged = newly_closed.clone();
            merged.extend(self.closed.drain(..));
            merged.truncate(MAX_CLOSED_CONNECTIONS);
            self.closed = merged;
        }

        // Skip publishing when idle (both lists empty) or paused, but the
        // delta baseline always advances.
        let idle = next.is_empty() && self.prev.is_empty();
        if !idle && !self.paused {
            self.active = next.clone();
        }
        self.prev = next;

        newly_closed
    }

    /// Freeze or unfreeze the published view; deltas keep flowing either way
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if !paused {
            self.active = self.prev.clone();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Published active connections
    pub fn active(&self) -> &[FormattedConnection] {
        &self.active
    }

    /// Closed history, newest first
    pub fn closed(&self) -> &[FormattedConnection] {
        &self.closed
    }

    pub fn clear_closed(&mut self) {
        self.closed.clear();
    }
}
