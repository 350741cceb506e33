//! Stats endpoint and periodic stats reporter
//!
//! The endpoint answers any HTTP request with the current snapshot as JSON.
//! It does not route, so every path and method gets the same document.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::logger::log;
use crate::stats::Stats;

/// Upper bound on the request head we bother reading
const MAX_REQUEST_HEAD: usize = 8 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Format bytes into human-readable string (KB, MB, GB)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Consume the request head; the content is irrelevant.
async fn read_request_head<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<()> {
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 512];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buf[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
            return Ok(());
        }
    }
}

/// Answer a single stats request.
async fn serve_stats_request<S>(stats: &Stats, stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(REQUEST_TIMEOUT, read_request_head(stream)).await??;

    let body = serde_json::to_vec_pretty(&stats.snapshot())?;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Serve the stats document on `listener` until `shutdown` fires.
pub async fn run_stats_server(
    stats: Arc<Stats>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    log::info!(address = %listener.local_addr()?, "Stats server started");

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((mut stream, peer)) => {
                let stats = Arc::clone(&stats);
                tokio::spawn(async move {
                    if let Err(e) = serve_stats_request(&stats, &mut stream).await {
                        log::debug!(peer = %peer, error = %e, "Stats request failed");
                    }
                });
            }
            Err(e) => {
                log::warn!(error = %e, "Failed to accept stats connection");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }

    log::debug!("Stats server shutting down");
    Ok(())
}

/// Bind `addr` and serve stats on it.
pub async fn serve_stats(
    stats: Arc<Stats>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    run_stats_server(stats, listener, shutdown).await
}

/// Log a stats line every `period` until `shutdown` fires.
pub fn spawn_stats_reporter(
    stats: Arc<Stats>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // first tick fires immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = stats.snapshot();
                    log::info!(
                        active = snapshot.active_connections,
                        total = snapshot.total_connections,
                        incoming = %format_bytes(snapshot.incoming_bytes),
                        outgoing = %format_bytes(snapshot.outgoing_bytes),
                        uptime_secs = snapshot.uptime_secs,
                        "Stats"
                    );
                }
                _ = shutdown.cancelled() => {
                    log::debug!("Stats reporter shutting down");
                    break;
                }
            }
        }
    })
}
