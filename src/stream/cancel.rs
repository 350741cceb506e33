use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::CancellationToken;

pin_project! {
    /// Ties a stream to its session's cancellation token.
    ///
    /// Any failed operation cancels the token and then returns the original
    /// error. Shutdown always cancels. Reads and writes started after
    /// cancellation fail with `ConnectionAborted`.
    pub struct CancelStream<S> {
        #[pin]
        inner: S,
        token: CancellationToken,
    }
}

impl<S> CancelStream<S> {
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

fn aborted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "session cancelled")
}

fn observe<T>(token: &CancellationToken, result: Poll<io::Result<T>>) -> Poll<io::Result<T>> {
    if let Poll::Ready(Err(_)) = &result {
        token.cancel();
    }
    result
}

impl<S: AsyncRead> AsyncRead for CancelStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(aborted()));
        }
        observe(this.token, this.inner.poll_read(cx, buf))
    }
}

impl<S: AsyncWrite> AsyncWrite for CancelStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        if this.token.is_cancelled() {
            return Poll::Ready(Err(aborted()));
        }
        observe(this.token, this.inner.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        observe(this.token, this.inner.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let result = ready!(this.inner.poll_shutdown(cx));
        this.token.cancel();
        Poll::Ready(result)
    }
}
