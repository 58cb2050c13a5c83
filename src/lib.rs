//! Mihoscope - telemetry reconciliation core for mihomo-compatible dashboards
//!
//! This crate ingests live telemetry from a mihomo/clash-compatible daemon
//! and derives the stable, bounded views a rendering layer needs:
//! - per-connection transfer rates diffed between adjacent snapshots
//! - a capped history of connections that silently disappeared
//! - rolling traffic and memory time series
//! - a chronological, fixed-capacity log buffer
//! - a per-proxy latency map fed by concurrent, scope-serialized probes
//!
//! # Architecture
//!
//! ```text
//! daemon transport --> stream/ --> reconcile/ --> view/ --> renderer
//!                         |            |
//!                         +--> series/ +--> store/ (closed history, logs)
//!
//! renderer --user action--> probe/ --> client/ --> daemon
//! ```
//!
//! Rendering (tables, charts, modals) is an external collaborator; every
//! accessor on [`Dashboard`] hands out read-only copies.

pub mod client;
pub mod common;
pub mod prefs;
pub mod probe;
pub mod reconcile;
pub mod series;
pub mod store;
pub mod stream;
pub mod view;

pub use common::error::{Error, Result};

use chrono::Utc;
use client::DaemonApi;
use parking_lot::Mutex;
use prefs::PreferenceStore;
use probe::{LatencyState, ProbeOrchestrator, ProbeTarget};
use reconcile::{ConnectionsSnapshot, FormattedConnection, Reconciler, SourceMap, SourceRule};
use series::{SeriesAccumulator, SeriesSnapshot, METRIC_DOWN, METRIC_MEMORY, METRIC_UP};
use std::collections::HashMap;
use std::sync::Arc;
use store::{LogEntry, LogStore};
use stream::{Delivery, SnapshotTransport, StreamManager};
use tracing::debug;
use view::ViewEngine;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Dashboard core wiring the stream, reconciler, stores, and probes
///
/// One instance per daemon connection. The rendering layer reads state
/// through the accessor methods; all mutation happens inside the delivery
/// pipeline or through the explicit control methods.
pub struct Dashboard {
    api: Arc<dyn DaemonApi>,
    prefs: Arc<dyn PreferenceStore>,
    reconciler: Arc<Mutex<Reconciler>>,
    series: Arc<Mutex<SeriesAccumulator>>,
    logs: Arc<Mutex<LogStore>>,
    view: ViewEngine,
    probes: ProbeOrchestrator,
    stream: StreamManager,
}

impl Dashboard {
    pub fn new(
        api: Arc<dyn DaemonApi>,
        transport: Arc<dyn SnapshotTransport>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        let reconciler = Arc::new(Mutex::new(Reconciler::new()));
        let series = Arc::new(Mutex::new(SeriesAccumulator::new()));
        let logs = Arc::new(Mutex::new(LogStore::new()));

        let delivery = make_delivery(reconciler.clone(), series.clone(), prefs.clone());
        let stream = StreamManager::new(transport, delivery);

        Dashboard {
            view: ViewEngine::new(prefs.clone()),
            probes: ProbeOrchestrator::new(api.clone()),
            api,
            prefs,
            reconciler,
            series,
            logs,
            stream,
        }
    }

    /// Begin streaming snapshots from the daemon
    pub fn start(&self) {
        self.stream.start();
    }

    /// Stop streaming; no state changes after this returns
    pub fn stop(&self) {
        self.stream.stop();
    }

    /// Drop the current subscription and open a fresh one
    pub fn reconnect(&self) {
        self.stream.reconnect();
    }

    /// Whether the snapshot stream is currently live
    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// Freeze or unfreeze the published connection view
    pub fn set_paused(&self, paused: bool) {
        self.reconciler.lock().set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.reconciler.lock().is_paused()
    }

    /// Published active connections
    pub fn active_connections(&self) -> Vec<FormattedConnection> {
        self.reconciler.lock().active().to_vec()
    }

    /// Closed-connection history, newest first
    pub fn closed_connections(&self) -> Vec<FormattedConnection> {
        self.reconciler.lock().closed().to_vec()
    }

    /// Active connections filtered and sorted for display
    pub fn filtered_active(&self, keyword: &str, source_ip: &str) -> Vec<FormattedConnection> {
        self.view.apply(&self.active_connections(), keyword, source_ip)
    }

    /// Closed connections filtered and sorted for display
    pub fn filtered_closed(&self, keyword: &str, source_ip: &str) -> Vec<FormattedConnection> {
        self.view.apply(&self.closed_connections(), keyword, source_ip)
    }

    /// Filter/sort engine, for sort and column preferences
    pub fn view(&self) -> &ViewEngine {
        &self.view
    }

    /// Current source-name mapping table
    pub fn source_map(&self) -> Vec<SourceRule> {
        SourceMap::load(self.prefs.as_ref()).rules().to_vec()
    }

    /// Replace the source-name mapping table; takes effect next snapshot
    pub fn set_source_map(&self, rules: Vec<SourceRule>) {
        SourceMap::new(rules).save(self.prefs.as_ref());
    }

    /// Append one daemon log line
    pub fn ingest_log(&self, entry: LogEntry) {
        self.logs.lock().append(entry);
    }

    /// Retained log lines in chronological order, filtered by `search`
    pub fn logs(&self, search: &str) -> Vec<LogEntry> {
        self.logs.lock().search(search)
    }

    pub fn clear_logs(&self) {
        self.logs.lock().clear();
    }

    /// Rolling window for one metric (`up`, `down`, `inuse`)
    pub fn series(&self, metric: &str) -> Option<SeriesSnapshot> {
        self.series.lock().snapshot(metric)
    }

    /// Per-proxy latency map
    pub fn latencies(&self) -> HashMap<String, LatencyState> {
        self.probes.results()
    }

    /// Run a latency probe batch; rejected while the scope is busy
    pub async fn probe(&self, target: ProbeTarget) -> Result<HashMap<String, LatencyState>> {
        self.probes.probe(target).await
    }

    /// Close one connection on the daemon
    ///
    /// Local state is not touched; the next snapshot reports the outcome.
    pub async fn close_connection(&self, id: &str) -> Result<()> {
        self.api.close_connection(id).await
    }

    /// Close every connection on the daemon
    pub async fn close_all_connections(&self) -> Result<()> {
        self.api.close_all_connections().await
    }
}

/// Build the snapshot delivery pipeline: reconcile, then feed the series
/// windows from the rolled-up counters
fn make_delivery(
    reconciler: Arc<Mutex<Reconciler>>,
    series: Arc<Mutex<SeriesAccumulator>>,
    prefs: Arc<dyn PreferenceStore>,
) -> Delivery {
    let prev_totals: Mutex<Option<(u64, u64)>> = Mutex::new(None);
    Arc::new(move |snapshot: ConnectionsSnapshot| {
        let now = Utc::now();
        // labels re-resolve every pass so table edits apply next snapshot
        let sources = SourceMap::load(prefs.as_ref());
        let closed = reconciler.lock().reconcile(&snapshot, &sources, now);
        if !closed.is_empty() {
            debug!("{} connection(s) closed", closed.len());
        }

        let (up_rate, down_rate) = {
            let mut totals = prev_totals.lock();
            let (prev_up, prev_down) =
                totals.unwrap_or((snapshot.upload_total, snapshot.download_total));
            *totals = Some((snapshot.upload_total, snapshot.download_total));
            (
                snapshot.upload_total.saturating_sub(prev_up),
                snapshot.download_total.saturating_sub(prev_down),
            )
        };

        let mut series = series.lock();
        series.append(METRIC_UP, now, up_rate);
        series.append(METRIC_DOWN, now, down_rate);
        if let Some(memory) = snapshot.memory {
            series.append(METRIC_MEMORY, now, memory);
        }
    })
}
