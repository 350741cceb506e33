//! Core proxy server
//!
//! The Server struct holds everything a session needs and is shared by
//! reference into every connection task.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConnConfig;
use crate::dialer::DatacenterTable;
use crate::error::{ProxyError, Result};
use crate::obfuscated2::Secret;
use crate::server_runner;
use crate::stats::Stats;

/// Core proxy server
#[derive(Debug)]
pub struct Server {
    /// Pre-shared secret clients must know
    pub secret: Arc<Secret>,
    /// Process-wide connection and traffic counters
    pub stats: Arc<Stats>,
    /// Datacenter endpoints and overrides
    pub datacenters: DatacenterTable,
    /// Connection performance configuration
    pub conn_config: ConnConfig,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Bind `addr` and accept connections until `shutdown` fires.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let listener = server_runner::bind_listener(addr, self.conn_config.tcp_backlog)?;
        server_runner::run_server(self, listener, shutdown).await
    }
}

/// Builder for constructing a Server
#[derive(Default)]
pub struct ServerBuilder {
    secret: Option<Secret>,
    stats: Option<Arc<Stats>>,
    datacenters: Option<DatacenterTable>,
    conn_config: Option<ConnConfig>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secret(mut self, secret: Secret) -> Self {
        self.secret = Some(secret);
        self
    }

    /// Share an existing stats registry (e.g. with the stats endpoint)
    pub fn stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn datacenters(mut self, datacenters: DatacenterTable) -> Self {
        self.datacenters = Some(datacenters);
        self
    }

    pub fn conn_config(mut self, config: ConnConfig) -> Self {
        self.conn_config = Some(config);
        self
    }

    /// Build the server. The secret is required; everything else has a default.
    pub fn build(self) -> Result<Server> {
        let secret = self
            .secret
            .ok_or_else(|| ProxyError::Config("secret is required".to_string()))?;
        Ok(Server {
            secret: Arc::new(secret),
            stats: self.stats.unwrap_or_default(),
            datacenters: self.datacenters.unwrap_or_default(),
            conn_config: self.conn_config.unwrap_or_default(),
        })
    }
}
