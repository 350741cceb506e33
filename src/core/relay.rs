//! Bidirectional relay between a client and its datacenter
//!
//! Each direction runs in its own task and stops on EOF, on error, or when
//! the session token fires. Whichever stops first cancels the token so the
//! other direction follows.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::logger::log;

/// Upper bound on closing each stream once the relay has stopped.
/// A peer that stopped reading must not hold the other side open.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

/// Bytes moved in each direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayResult {
    /// Bytes read from the client and written to the backend
    pub client_to_backend: u64,
    /// Bytes read from the backend and written to the client
    pub backend_to_client: u64,
}

async fn pipe<R, W>(
    mut reader: R,
    mut writer: W,
    token: CancellationToken,
    buffer_size: usize,
    direction: &'static str,
) -> (R, W, u64)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::debug!(direction, error = %e, "Relay read ended");
                    break;
                }
            },
        };

        // A chunk still being written when the token fires is abandoned
        // midway. Only chunks that were written and flushed are counted.
        let written = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            result = async {
                writer.write_all(&buf[..n]).await?;
                writer.flush().await
            } => result,
        };
        if let Err(e) = written {
            log::debug!(direction, error = %e, "Relay write ended");
            break;
        }
        total += n as u64;
    }

    token.cancel();
    (reader, writer, total)
}

type Halves<S> = (ReadHalf<S>, WriteHalf<S>);

/// Relay until either side finishes, then shut both streams down.
///
/// Returns once both directions have stopped and both streams were closed,
/// or given up on after a short grace period.
pub async fn relay<C, B>(
    client: C,
    backend: B,
    token: CancellationToken,
    buffer_size: usize,
) -> RelayResult
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (client_r, client_w): Halves<C> = tokio::io::split(client);
    let (backend_r, backend_w): Halves<B> = tokio::io::split(backend);

    let upstream = tokio::spawn(pipe(
        client_r,
        backend_w,
        token.clone(),
        buffer_size,
        "client->telegram",
    ));
    let downstream = tokio::spawn(pipe(
        backend_r,
        client_w,
        token.clone(),
        buffer_size,
        "telegram->client",
    ));

    token.cancelled().await;

    let mut result = RelayResult::default();
    let (up, down) = tokio::join!(upstream, downstream);

    match (up, down) {
        (Ok((client_r, backend_w, up_bytes)), Ok((backend_r, client_w, down_bytes))) => {
            result.client_to_backend = up_bytes;
            result.backend_to_client = down_bytes;

            let mut client = client_r.unsplit(client_w);
            let mut backend = backend_r.unsplit(backend_w);
            let _ = tokio::join!(
                tokio::time::timeout(SHUTDOWN_GRACE, client.shutdown()),
                tokio::time::timeout(SHUTDOWN_GRACE, backend.shutdown()),
            );
        }
        (up, down) => {
            // a direction panicked; its halves are gone and the rest drop closed
            if let Err(e) = &up {
                log::error!(error = %e, "client->telegram relay task failed");
            }
            if let Err(e) = &down {
                log::error!(error = %e, "telegram->client relay task failed");
            }
            if let Ok((_, _, n)) = up {
                result.client_to_backend = n;
            }
            if let Ok((_, _, n)) = down {
                result.backend_to_client = n;
            }
        }
    }

    result
}
