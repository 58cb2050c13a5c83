//! Polling snapshot transport
//!
//! The daemon exposes connection state both as a WebSocket stream and as a
//! plain GET endpoint; the core does not care which feeds it. This
//! transport polls `/connections` on a fixed interval through the daemon
//! client, which keeps the wire concern entirely inside `client/`.

use super::{SnapshotSource, SnapshotTransport};
use crate::client::DaemonApi;
use crate::reconcile::ConnectionsSnapshot;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default snapshot poll interval
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls the daemon's connections endpoint once per interval
pub struct PollingTransport {
    api: Arc<dyn DaemonApi>,
    interval: Duration,
}

impl PollingTransport {
    pub fn new(api: Arc<dyn DaemonApi>) -> Self {
        Self::with_interval(api, POLL_INTERVAL)
    }

    pub fn with_interval(api: Arc<dyn DaemonApi>, interval: Duration) -> Self {
        PollingTransport { api, interval }
    }
}

#[async_trait]
impl SnapshotTransport for PollingTransport {
    async fn connect(&self) -> Result<Box<dyn SnapshotSource>> {
        // prove the daemon is reachable before reporting a live stream
        let first = self.api.connections().await?;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick
        Ok(Box::new(PollingSource {
            api: self.api.clone(),
            ticker,
            pending: Some(first),
        }))
    }
}

struct PollingSource {
    api: Arc<dyn DaemonApi>,
    ticker: tokio::time::Interval,
    /// Snapshot fetched during connect, delivered first
    pending: Option<ConnectionsSnapshot>,
}

#[async_trait]
impl SnapshotSource for PollingSource {
    async fn recv(&mut self) -> Result<ConnectionsSnapshot> {
        if let Some(first) = self.pending.take() {
            return Ok(first);
        }
        self.ticker.tick().await;
        self.api.connections().await
    }
}
