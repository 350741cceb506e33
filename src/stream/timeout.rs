//! Per-operation read/write deadlines

use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

pin_project! {
    /// Fails an operation with `TimedOut` when it does not complete within the
    /// configured duration. The deadline is armed when an operation starts and
    /// disarmed when it completes, so a busy stream never times out.
    pub struct TimeoutStream<S> {
        #[pin]
        inner: S,
        read_timeout: Duration,
        write_timeout: Duration,
        read_deadline: Pin<Box<Sleep>>,
        write_deadline: Pin<Box<Sleep>>,
        read_armed: bool,
        write_armed: bool,
    }
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner,
            read_timeout,
            write_timeout,
            read_deadline: Box::pin(tokio::time::sleep(read_timeout)),
            write_deadline: Box::pin(tokio::time::sleep(write_timeout)),
            read_armed: false,
            write_armed: false,
        }
    }
}

/// Shared deadline bookkeeping for one direction.
fn poll_with_deadline<T>(
    deadline: &mut Pin<Box<Sleep>>,
    armed: &mut bool,
    timeout: Duration,
    cx: &mut Context<'_>,
    what: &'static str,
    op: impl FnOnce(&mut Context<'_>) -> Poll<io::Result<T>>,
) -> Poll<io::Result<T>> {
    if !*armed {
        deadline.as_mut().reset(Instant::now() + timeout);
        *armed = true;
    }

    match op(cx) {
        Poll::Ready(result) => {
            *armed = false;
            Poll::Ready(result)
        }
        Poll::Pending => {
            if deadline.as_mut().poll(cx).is_ready() {
                *armed = false;
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{} timed out after {:?}", what, timeout),
                )));
            }
            Poll::Pending
        }
    }
}

impl<S: AsyncRead> AsyncRead for TimeoutStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let inner = this.inner;
        poll_with_deadline(
            this.read_deadline,
            this.read_armed,
            *this.read_timeout,
            cx,
            "read",
            |cx| inner.poll_read(cx, buf),
        )
    }
}

impl<S: AsyncWrite> AsyncWrite for TimeoutStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let inner = this.inner;
        poll_with_deadline(
            this.write_deadline,
            this.write_armed,
            *this.write_timeout,
            cx,
            "write",
            |cx| inner.poll_write(cx, buf),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let inner = this.inner;
        poll_with_deadline(
            this.write_deadline,
            this.write_armed,
            *this.write_timeout,
            cx,
            "flush",
            |cx| inner.poll_flush(cx),
        )
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
