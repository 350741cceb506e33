use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use uuid::Uuid;

use crate::logger::log;

pin_project! {
    /// Emits a debug record for every completed read and write. Data and
    /// errors pass through untouched.
    pub struct LoggedStream<S> {
        #[pin]
        inner: S,
        socket_id: Uuid,
        name: &'static str,
    }
}

impl<S> LoggedStream<S> {
    pub fn new(inner: S, socket_id: Uuid, name: &'static str) -> Self {
        Self {
            inner,
            socket_id,
            name,
        }
    }
}

impl<S: AsyncRead> AsyncRead for LoggedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before_len = buf.filled().len();
        let result = this.inner.poll_read(cx, buf);
        match &result {
            Poll::Ready(Ok(())) => {
                log::debug!(
                    socket_id = %this.socket_id,
                    name = *this.name,
                    bytes = buf.filled().len() - before_len,
                    "Read"
                );
            }
            Poll::Ready(Err(e)) => {
                log::debug!(socket_id = %this.socket_id, name = *this.name, error = %e, "Read failed");
            }
            Poll::Pending => {}
        }
        result
    }
}

impl<S: AsyncWrite> AsyncWrite for LoggedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let result = this.inner.poll_write(cx, buf);
        match &result {
            Poll::Ready(Ok(n)) => {
                log::debug!(socket_id = %this.socket_id, name = *this.name, bytes = *n, "Write");
            }
            Poll::Ready(Err(e)) => {
                log::debug!(socket_id = %this.socket_id, name = *this.name, error = %e, "Write failed");
            }
            Poll::Pending => {}
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let result = this.inner.poll_shutdown(cx);
        if result.is_ready() {
            log::debug!(socket_id = %this.socket_id, name = *this.name, "Closed");
        }
        result
    }
}
