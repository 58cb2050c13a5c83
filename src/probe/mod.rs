//! Latency probe orchestration
//!
//! Fires latency checks against a proxy group or an explicit member list.
//! A scope has at most one in-flight batch; a second request for a busy
//! scope is rejected. Member results merge into the shared map as they
//! complete, so partial progress is visible before the batch finishes,
//! and a per-member failure never aborts its siblings. Once a batch
//! completes, one full proxy-state refresh reconciles the latency numbers
//! with any concurrent membership changes.

use crate::client::DaemonApi;
use crate::{Error, Result};
use dashmap::DashMap;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default latency test URL
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";

/// Per-proxy latency state; exactly one variant holds at a time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum LatencyState {
    /// A probe for this proxy is in flight
    Testing,
    /// Last measured round trip in milliseconds
    Millis(u16),
    /// Last probe failed
    Failed(String),
}

/// What to probe, resolved by the caller
///
/// Group probing delegates member testing to the daemon in one call;
/// member-list probing tests each proxy individually. The caller decides
/// which applies (daemon capability, provider member set) before invoking
/// the orchestrator.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Group {
        name: String,
        members: Vec<String>,
        url: String,
    },
    Members {
        scope: String,
        names: Vec<String>,
        url: String,
    },
}

impl ProbeTarget {
    /// The scope the in-flight guard serializes on
    pub fn scope(&self) -> &str {
        match self {
            ProbeTarget::Group { name, .. } => name,
            ProbeTarget::Members { scope, .. } => scope,
        }
    }

    fn member_names(&self) -> &[String] {
        match self {
            ProbeTarget::Group { members, .. } => members,
            ProbeTarget::Members { names, .. } => names,
        }
    }
}

// Releases the scope slot even if the probe future errors out early.
struct ScopeSlot<'a> {
    scopes: &'a Mutex<HashSet<String>>,
    scope: String,
}

impl Drop for ScopeSlot<'_> {
    fn drop(&mut self) {
        self.scopes.lock().remove(&self.scope);
    }
}

/// Serializes probe batches per scope and owns the shared latency map
pub struct ProbeOrchestrator {
    api: Arc<dyn DaemonApi>,
    results: DashMap<String, LatencyState>,
    in_flight: Mutex<HashSet<String>>,
    /// Proxy state from the most recent post-batch refresh
    last_refresh: RwLock<Option<Value>>,
}

impl ProbeOrchestrator {
    pub fn new(api: Arc<dyn DaemonApi>) -> Self {
        ProbeOrchestrator {
            api,
            results: DashMap::new(),
            in_flight: Mutex::new(HashSet::new()),
            last_refresh: RwLock::new(None),
        }
    }

    /// Current latency state for one proxy
    pub fn latency(&self, name: &str) -> Option<LatencyState> {
        self.results.get(name).map(|r| r.value().clone())
    }

    /// Read-only copy of the whole latency map
    pub fn results(&self) -> HashMap<String, LatencyState> {
        self.results
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Whether a batch is currently running for the scope
    pub fn is_probing(&self, scope: &str) -> bool {
        self.in_flight.lock().contains(scope)
    }

    /// Proxy state captured by the last post-batch refresh
    pub fn last_refresh(&self) -> Option<Value> {
        self.last_refresh.read().clone()
    }

    /// Run one probe batch for the target's scope
    ///
    /// Returns the terminal state of every targeted member. Fails fast
    /// with [`Error::Probe`] when the scope already has a batch in flight.
    pub async fn probe(&self, target: ProbeTarget) -> Result<HashMap<String, LatencyState>> {
        let scope = target.scope().to_string();
        {
            let mut guard = self.in_flight.lock();
            if !guard.insert(scope.clone()) {
                return Err(Error::probe(format!("probe already running for {}", scope)));
            }
        }
        let _slot = ScopeSlot {
            scopes: &self.in_flight,
            scope: scope.clone(),
        };

        for name in target.member_names() {
            self.results.insert(name.clone(), LatencyState::Testing);
        }

        let terminal = match &target {
            ProbeTarget::Group { name, members, url } => {
                self.probe_group(name, members, url).await
            }
            ProbeTarget::Members { names, url, .. } => self.probe_members(names, url).await,
        };

        for (name, state) in &terminal {
            self.results.insert(name.clone(), state.clone());
        }

        // Reconcile with membership changes that happened while probing.
        match self.api.fetch_proxies().await {
            Ok(state) => *self.last_refresh.write() = Some(state),
            Err(e) => warn!("post-probe refresh failed: {}", e),
        }

        Ok(terminal)
    }

    /// One daemon-side group test; members absent from the response map
    /// failed on the daemon's end
    async fn probe_group(
        &self,
        group: &str,
        members: &[String],
        url: &str,
    ) -> HashMap<String, LatencyState> {
        match self.api.group_delay(group, url).await {
            Ok(delays) => members
                .iter()
                .map(|name| {
                    let state = match delays.get(name) {
                        Some(&ms) => LatencyState::Millis(ms),
                        None => LatencyState::Failed("no result".to_string()),
                    };
                    (name.clone(), state)
                })
                .collect(),
            Err(e) => {
                debug!("group delay {} failed: {}", group, e);
                members
                    .iter()
                    .map(|name| (name.clone(), LatencyState::Failed(e.to_string())))
                    .collect()
            }
        }
    }

    /// Individual member tests, merged into the shared map as each lands
    async fn probe_members(&self, names: &[String], url: &str) -> HashMap<String, LatencyState> {
        let mut futs = FuturesUnordered::new();
        for name in names {
            let api = self.api.clone();
            let name = name.clone();
            let url = url.to_string();
            futs.push(async move {
                let outcome = api.proxy_delay(&name, &url).await;
                (name, outcome)
            });
        }

        let mut terminal = HashMap::with_capacity(names.len());
        while let Some((name, outcome)) = futs.next().await {
            let state = match outcome {
                Ok(ms) => LatencyState::Millis(ms),
                Err(e) => LatencyState::Failed(e.to_string()),
            };
            // visible to readers before the whole batch completes
            self.results.insert(name.clone(), state.clone());
            terminal.insert(name, state);
        }
        terminal
    }
}
