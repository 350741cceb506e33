//! Stream decorators
//!
//! Every wrapper implements `AsyncRead + AsyncWrite` over an inner stream with
//! the same capabilities, so they stack freely. Sessions build them in a fixed
//! order, innermost first:
//! timeout → traffic → logging → cipher → cancellation.

mod cancel;
mod cipher;
mod logged;
mod timeout;
mod traffic;

pub use cancel::CancelStream;
pub use cipher::CipherStream;
pub use logged::LoggedStream;
pub use timeout::TimeoutStream;
pub use traffic::TrafficStream;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::obfuscated2::Obfuscated2;
use crate::stats::Stats;

/// Deadline and accounting layers, used while the handshake runs
pub type AccountedStream<S> = TrafficStream<TimeoutStream<S>>;

/// Fully decorated session stream
pub type ObfuscatedStream<S> = CancelStream<CipherStream<LoggedStream<AccountedStream<S>>>>;

/// Wrap a raw socket with deadlines and traffic accounting.
pub fn accounted<S>(
    socket: S,
    stats: Arc<Stats>,
    read_timeout: Duration,
    write_timeout: Duration,
) -> AccountedStream<S> {
    TrafficStream::new(TimeoutStream::new(socket, read_timeout, write_timeout), stats)
}

/// Add logging, cipher and cancellation layers on top of an accounted stream.
pub fn obfuscated<S>(
    stream: AccountedStream<S>,
    socket_id: Uuid,
    name: &'static str,
    obfs: Obfuscated2,
    token: CancellationToken,
) -> ObfuscatedStream<S> {
    let logged = LoggedStream::new(stream, socket_id, name);
    CancelStream::new(CipherStream::new(logged, obfs), token)
}
