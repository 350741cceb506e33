//! Configuration module for the MTPROTO proxy
//!
//! Everything comes from CLI arguments with environment variable fallback
//! (`MTPROTO_PROXY_` prefix). There is no configuration file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::dialer::DatacenterTable;
use crate::obfuscated2::Secret;

/// Parse duration string (e.g., "60s", "2m", "1h") or plain seconds
fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }
    s.parse::<u64>().map(Duration::from_secs).map_err(|_| {
        format!(
            "Invalid duration '{}'. Use formats like '60s', '2m', '1h' or plain seconds",
            s
        )
    })
}

/// A single `ID=ADDR` datacenter override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcOverride {
    pub dc: i16,
    pub addr: SocketAddr,
}

fn parse_dc_override(s: &str) -> Result<DcOverride, String> {
    let (id, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid datacenter override '{}'. Expected ID=IP:PORT", s))?;
    let dc = id
        .trim()
        .parse::<i16>()
        .map_err(|_| format!("Invalid datacenter id '{}'", id))?;
    if dc == 0 {
        return Err("Datacenter id 0 cannot be overridden".to_string());
    }
    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|_| format!("Invalid datacenter address '{}'", addr))?;
    Ok(DcOverride { dc, addr })
}

/// CLI arguments for the proxy
///
/// Supports environment variables with MTPROTO_PROXY_ prefix
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "MTPROTO obfuscated2 proxy for Telegram")]
#[command(rename_all = "snake_case")]
pub struct CliArgs {
    /// Proxy secret: 32 hex characters, prefix with "dd" to accept secure clients only
    #[arg(env = "MTPROTO_PROXY_SECRET", hide_env_values = true)]
    pub secret: String,

    /// IP address to listen on
    #[arg(long, env = "MTPROTO_PROXY_BIND_IP", default_value = "0.0.0.0")]
    pub bind_ip: IpAddr,

    /// Port to listen on
    #[arg(long, env = "MTPROTO_PROXY_BIND_PORT", default_value_t = 3128)]
    pub bind_port: u16,

    /// Public IP of this host, used to print the client link
    #[arg(long, env = "MTPROTO_PROXY_PUBLIC_IP")]
    pub public_ip: Option<IpAddr>,

    /// Connect to datacenters over IPv6
    #[arg(long, env = "MTPROTO_PROXY_PREFER_IPV6", default_value_t = false)]
    pub prefer_ipv6: bool,

    /// Route a datacenter id to a custom address (ID=IP:PORT, repeatable)
    #[arg(
        long,
        env = "MTPROTO_PROXY_DC_OVERRIDE",
        value_delimiter = ',',
        allow_hyphen_values = true,
        value_parser = parse_dc_override
    )]
    pub dc_override: Vec<DcOverride>,

    /// IP address of the stats endpoint
    #[arg(long, env = "MTPROTO_PROXY_STATS_IP", default_value = "127.0.0.1")]
    pub stats_ip: IpAddr,

    /// Port of the stats endpoint (0 disables it)
    #[arg(long, env = "MTPROTO_PROXY_STATS_PORT", default_value_t = 3129)]
    pub stats_port: u16,

    /// Interval for logging stats (e.g., "5m", "0s" disables)
    #[arg(long, env = "MTPROTO_PROXY_STATS_LOG_INTERVAL", default_value = "5m", value_parser = parse_duration)]
    pub stats_log_interval: Duration,

    /// Log mode: trace, debug, info, warn, error (default: info)
    #[arg(long, env = "MTPROTO_PROXY_LOG_MODE", default_value = "info")]
    pub log_mode: String,

    // ==================== Performance Tuning ====================
    /// Deadline for a single read operation (default: 1m)
    #[arg(long, env = "MTPROTO_PROXY_READ_TIMEOUT", default_value = "1m", value_parser = parse_duration, help_heading = "Performance")]
    pub read_timeout: Duration,

    /// Deadline for a single write operation (default: 1m)
    #[arg(long, env = "MTPROTO_PROXY_WRITE_TIMEOUT", default_value = "1m", value_parser = parse_duration, help_heading = "Performance")]
    pub write_timeout: Duration,

    /// Buffer size for data transfer in bytes (default: 32KB)
    #[arg(long, env = "MTPROTO_PROXY_BUFFER_SIZE", default_value_t = 32 * 1024, help_heading = "Performance")]
    pub buffer_size: usize,

    /// TCP listen backlog for pending connections (default: 1024)
    #[arg(
        long,
        env = "MTPROTO_PROXY_TCP_BACKLOG",
        default_value_t = 1024,
        help_heading = "Performance"
    )]
    pub tcp_backlog: i32,

    /// Enable TCP_NODELAY for lower latency (default: true)
    #[arg(
        long,
        env = "MTPROTO_PROXY_TCP_NODELAY",
        default_value_t = true,
        action = clap::ArgAction::Set,
        help_heading = "Performance"
    )]
    pub tcp_nodelay: bool,
}

impl CliArgs {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the CLI arguments
    pub fn validate(&self) -> Result<()> {
        Secret::parse(&self.secret).context("Invalid secret")?;

        if self.bind_port == 0 {
            return Err(anyhow!("bind_port must be greater than 0"));
        }
        if self.read_timeout.is_zero() {
            return Err(anyhow!("read_timeout must be greater than 0"));
        }
        if self.write_timeout.is_zero() {
            return Err(anyhow!("write_timeout must be greater than 0"));
        }
        if self.buffer_size == 0 {
            return Err(anyhow!("buffer_size must be greater than 0"));
        }
        if self.tcp_backlog <= 0 {
            return Err(anyhow!("tcp_backlog must be greater than 0"));
        }
        if self.stats_port != 0 && self.stats_port == self.bind_port && self.stats_ip == self.bind_ip
        {
            return Err(anyhow!("stats endpoint cannot share the proxy address"));
        }

        Ok(())
    }
}

/// Connection performance configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnConfig {
    /// Per-read deadline; also bounds datacenter connects
    pub read_timeout: Duration,
    /// Per-write deadline
    pub write_timeout: Duration,
    /// Buffer size for data transfer
    pub buffer_size: usize,
    /// TCP listen backlog
    pub tcp_backlog: i32,
    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
    /// Dial datacenters over IPv6
    pub prefer_ipv6: bool,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            buffer_size: 32 * 1024,
            tcp_backlog: 1024,
            tcp_nodelay: true,
            prefer_ipv6: false,
        }
    }
}

impl ConnConfig {
    /// Create from CLI args
    pub fn from_cli(cli: &CliArgs) -> Self {
        Self {
            read_timeout: cli.read_timeout,
            write_timeout: cli.write_timeout,
            buffer_size: cli.buffer_size,
            tcp_backlog: cli.tcp_backlog,
            tcp_nodelay: cli.tcp_nodelay,
            prefer_ipv6: cli.prefer_ipv6,
        }
    }
}

/// Runtime server configuration built from validated CLI args
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub secret: Secret,
    pub bind_addr: SocketAddr,
    /// `None` when the stats endpoint is disabled
    pub stats_addr: Option<SocketAddr>,
    /// `None` when periodic stats logging is disabled
    pub stats_log_interval: Option<Duration>,
    pub public_ip: Option<IpAddr>,
    pub datacenters: DatacenterTable,
    pub conn: ConnConfig,
}

impl ServerConfig {
    pub fn from_cli(cli: &CliArgs) -> Result<Self> {
        let secret = Secret::parse(&cli.secret).context("Invalid secret")?;

        let datacenters = cli
            .dc_override
            .iter()
            .fold(DatacenterTable::telegram(), |table, o| {
                table.with_override(o.dc, o.addr)
            });

        let stats_addr =
            (cli.stats_port != 0).then(|| SocketAddr::new(cli.stats_ip, cli.stats_port));
        let stats_log_interval =
            (!cli.stats_log_interval.is_zero()).then_some(cli.stats_log_interval);

        Ok(Self {
            secret,
            bind_addr: SocketAddr::new(cli.bind_ip, cli.bind_port),
            stats_addr,
            stats_log_interval,
            public_ip: cli.public_ip,
            datacenters,
            conn: ConnConfig::from_cli(cli),
        })
    }

    /// `tg://proxy` link for clients, if the public address is known.
    ///
    /// Falls back to the bind address when it is a concrete IP.
    pub fn proxy_link(&self) -> Option<String> {
        let ip = match self.public_ip {
            Some(ip) => ip,
            None if !self.bind_addr.ip().is_unspecified() => self.bind_addr.ip(),
            None => return None,
        };
        Some(format!(
            "tg://proxy?server={}&port={}&secret={}",
            ip,
            self.bind_addr.port(),
            self.secret.to_hex()
        ))
    }
}
