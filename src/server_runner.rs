//! Listener setup and accept loop
//!
//! Every accepted socket gets a supervisor task that owns the stats
//! bookkeeping and contains panics from the session it spawns.

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::core::{RelayResult, Server};
use crate::dialer::tune_socket;
use crate::handler::process_connection;
use crate::logger::log;
use crate::stats::Stats;

/// Pause after a failed accept so descriptor exhaustion does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bind a TCP listener with SO_REUSEADDR for fast restarts.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("Cannot bind {}", addr))?;
    socket
        .listen(backlog)
        .with_context(|| format!("Cannot listen on {}", addr))?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Supervise one session: stats bookkeeping plus panic containment.
async fn supervise<F>(stats: Arc<Stats>, peer_addr: SocketAddr, session: F)
where
    F: Future<Output = crate::error::Result<RelayResult>> + Send + 'static,
{
    stats.new_connection();
    let _guard = scopeguard::guard(stats, |stats| {
        stats.close_connection();
    });

    match tokio::spawn(session).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            log::debug!(peer = %peer_addr, error = %e, "Session ended with error");
        }
        Err(e) if e.is_panic() => {
            log::error!(peer = %peer_addr, error = %e, "Session handler crashed");
        }
        Err(e) => {
            log::debug!(peer = %peer_addr, error = %e, "Session task cancelled");
        }
    }
}

/// Run the accept loop until `shutdown` fires.
pub async fn run_server(
    server: Arc<Server>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    accept_loop(server, listener, shutdown, |server, stream, peer_addr| async move {
        process_connection(&server, stream, peer_addr).await
    })
    .await
}

/// Accept connections and hand each one to `session` under a supervisor.
async fn accept_loop<F, Fut>(
    server: Arc<Server>,
    listener: TcpListener,
    shutdown: CancellationToken,
    session: F,
) -> Result<()>
where
    F: Fn(Arc<Server>, TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = crate::error::Result<RelayResult>> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    log::info!(
        address = %local_addr,
        secure_only = server.secret.is_secure_only(),
        prefer_ipv6 = server.conn_config.prefer_ipv6,
        "Server started"
    );

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                tune_socket(&stream, server.conn_config.tcp_nodelay);
                let task = session(Arc::clone(&server), stream, peer_addr);
                tokio::spawn(supervise(Arc::clone(&server.stats), peer_addr, task));
            }
            Err(e) => {
                log::warn!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }

    log::info!(address = %local_addr, "Server stopped accepting connections");
    Ok(())
}
