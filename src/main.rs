//! MTPROTO proxy binary
//!
//! Parses CLI/env configuration, starts the stats endpoint and reporter, and
//! runs the accept loop until SIGINT/SIGTERM.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use mtproto_proxy::config::{CliArgs, ServerConfig};
use mtproto_proxy::logger::{self, log};
use mtproto_proxy::stats::Stats;
use mtproto_proxy::{stats_server, Server};

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            _ => {
                log::warn!("Cannot install signal handlers, falling back to Ctrl-C");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                log::info!("SIGINT received, shutting down...");
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Shutdown signal received...");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse_args();
    cli.validate()?;

    logger::init_logger(&cli.log_mode);

    let config = ServerConfig::from_cli(&cli)?;
    log::info!(
        bind = %config.bind_addr,
        secure_only = config.secret.is_secure_only(),
        prefer_ipv6 = config.conn.prefer_ipv6,
        "Starting MTPROTO proxy"
    );
    match config.proxy_link() {
        Some(link) => log::info!(link = %link, "Proxy link"),
        None => log::info!("Set --public_ip to print a proxy link"),
    }

    let stats = Arc::new(Stats::new());
    let server = Arc::new(
        Server::builder()
            .secret(config.secret.clone())
            .stats(Arc::clone(&stats))
            .datacenters(config.datacenters.clone())
            .conn_config(config.conn)
            .build()?,
    );

    let shutdown = CancellationToken::new();

    if let Some(addr) = config.stats_addr {
        let stats = Arc::clone(&stats);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = stats_server::serve_stats(stats, addr, shutdown).await {
                log::error!(address = %addr, error = %e, "Stats server failed");
            }
        });
    }
    if let Some(period) = config.stats_log_interval {
        stats_server::spawn_stats_reporter(Arc::clone(&stats), period, shutdown.clone());
    }

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    server.serve(config.bind_addr, shutdown).await
}
