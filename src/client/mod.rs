//! Daemon REST client
//!
//! The control surface the core consumes: fetching connection snapshots,
//! closing connections, running latency tests, and refreshing the full
//! proxy state. `DaemonApi` is the seam; `HttpDaemonApi` talks to a
//! mihomo-compatible external controller over HTTP.

use crate::reconcile::ConnectionsSnapshot;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Timeout passed to the daemon's delay endpoints, in milliseconds
pub const DELAY_TIMEOUT_MS: u64 = 5_000;

/// Async control-call surface of a mihomo-compatible daemon
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// GET /connections
    async fn connections(&self) -> Result<ConnectionsSnapshot>;

    /// DELETE /connections/{id}
    async fn close_connection(&self, id: &str) -> Result<()>;

    /// DELETE /connections
    async fn close_all_connections(&self) -> Result<()>;

    /// GET /group/{name}/delay - test every member of a group at once
    async fn group_delay(&self, group: &str, test_url: &str) -> Result<HashMap<String, u16>>;

    /// GET /proxies/{name}/delay - test a single proxy
    async fn proxy_delay(&self, name: &str, test_url: &str) -> Result<u16>;

    /// GET /proxies - full proxy state, used to reconcile after probing
    async fn fetch_proxies(&self) -> Result<Value>;
}

#[derive(Deserialize)]
struct DelayResponse {
    delay: u16,
}

/// HTTP implementation against the daemon's external controller
pub struct HttpDaemonApi {
    base: Url,
    secret: Option<String>,
    client: reqwest::Client,
}

impl HttpDaemonApi {
    pub fn new(base_url: &str, secret: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(HttpDaemonApi {
            base,
            secret,
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::parse("daemon URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.secret {
            Some(secret) => req.bearer_auth(secret),
            None => req,
        }
    }
}

#[async_trait]
impl DaemonApi for HttpDaemonApi {
    async fn connections(&self) -> Result<ConnectionsSnapshot> {
        let url = self.endpoint(&["connections"])?;
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::transport(format!(
                "GET /connections: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn close_connection(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&["connections", id])?;
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::control(format!(
                "close connection {}: {}",
                id,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn close_all_connections(&self) -> Result<()> {
        let url = self.endpoint(&["connections"])?;
        let resp = self.request(reqwest::Method::DELETE, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::control(format!(
                "close all connections: {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn group_delay(&self, group: &str, test_url: &str) -> Result<HashMap<String, u16>> {
        let mut url = self.endpoint(&["group", group, "delay"])?;
        url.query_pairs_mut()
            .append_pair("url", test_url)
            .append_pair("timeout", &DELAY_TIMEOUT_MS.to_string());
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::probe(format!(
                "group delay {}: {}",
                group,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn proxy_delay(&self, name: &str, test_url: &str) -> Result<u16> {
        let mut url = self.endpoint(&["proxies", name, "delay"])?;
        url.query_pairs_mut()
            .append_pair("url", test_url)
            .append_pair("timeout", &DELAY_TIMEOUT_MS.to_string());
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::probe(format!(
                "proxy delay {}: {}",
                name,
                resp.status()
            )));
        }
        let body: DelayResponse = resp.json().await?;
        Ok(body.delay)
    }

    async fn fetch_proxies(&self) -> Result<Value> {
        let url = self.endpoint(&["proxies"])?;
        let resp = self.request(reqwest::Method::GET, url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::transport(format!("GET /proxies: {}", resp.status())));
        }
        Ok(resp.json().await?)
    }
}
