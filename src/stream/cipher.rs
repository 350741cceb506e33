use aes::cipher::StreamCipher;
use bytes::{Buf, BytesMut};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::obfuscated2::{Aes256Ctr, Obfuscated2};

pin_project! {
    /// Decrypts everything read and encrypts everything written.
    ///
    /// Written bytes are encrypted into `pending` and drained to the inner
    /// stream before the next chunk is accepted, so a partial write never
    /// makes the keystream skip or repeat.
    pub struct CipherStream<S> {
        #[pin]
        inner: S,
        decryptor: Aes256Ctr,
        encryptor: Aes256Ctr,
        pending: BytesMut,
    }
}

impl<S> CipherStream<S> {
    pub fn new(inner: S, obfs: Obfuscated2) -> Self {
        let (decryptor, encryptor) = obfs.into_parts();
        Self {
            inner,
            decryptor,
            encryptor,
            pending: BytesMut::new(),
        }
    }
}

fn poll_drain<S: AsyncWrite>(
    mut inner: Pin<&mut S>,
    pending: &mut BytesMut,
    cx: &mut Context<'_>,
) -> Poll<io::Result<()>> {
    while !pending.is_empty() {
        let n = ready!(inner.as_mut().poll_write(cx, &pending[..]))?;
        if n == 0 {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write encrypted data",
            )));
        }
        pending.advance(n);
    }
    Poll::Ready(Ok(()))
}

impl<S: AsyncRead> AsyncRead for CipherStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before_len = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        this.decryptor
            .apply_keystream(&mut buf.filled_mut()[before_len..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite> AsyncWrite for CipherStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        this.pending.extend_from_slice(buf);
        this.encryptor.apply_keystream(&mut this.pending[..]);

        // Accepted either way; leftovers go out on the next write or flush.
        if let Poll::Ready(Err(e)) = poll_drain(this.inner.as_mut(), this.pending, cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        this.inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        ready!(poll_drain(this.inner.as_mut(), this.pending, cx))?;
        this.inner.poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obfuscated2::{make_backend_frame, parse_frame, ConnectionType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_cipher_stream_roundtrip() {
        let (proxy_obfs, frame) = make_backend_frame(ConnectionType::Abridged, 2);
        let (peer_obfs, _, _) = parse_frame(None, &frame).unwrap();

        let (a, b) = tokio::io::duplex(1024);
        let mut proxy_side = CipherStream::new(a, proxy_obfs);
        let mut peer_side = CipherStream::new(b, peer_obfs);

        proxy_side.write_all(b"ping").await.unwrap();
        proxy_side.flush().await.unwrap();
        let mut buf = [0u8; 4];
        peer_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer_side.write_all(b"pong").await.unwrap();
        peer_side.flush().await.unwrap();
        proxy_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_wire_bytes_are_encrypted() {
        let (proxy_obfs, _) = make_backend_frame(ConnectionType::Abridged, 2);
        let (a, mut b) = tokio::io::duplex(1024);
        let mut stream = CipherStream::new(a, proxy_obfs);

        let plaintext = [0u8; 32];
        stream.write_all(&plaintext).await.unwrap();
        stream.flush().await.unwrap();

        let mut wire = [0u8; 32];
        b.read_exact(&mut wire).await.unwrap();
        assert_ne!(wire, plaintext);
    }

    #[tokio::test]
    async fn test_partial_writes_keep_keystream_aligned() {
        let (proxy_obfs, frame) = make_backend_frame(ConnectionType::Abridged, 2);
        let (peer_obfs, _, _) = parse_frame(None, &frame).unwrap();

        // tiny pipe forces many partial writes
        let (a, b) = tokio::io::duplex(7);
        let mut writer = CipherStream::new(a, proxy_obfs);
        let mut reader = CipherStream::new(b, peer_obfs);

        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let write_task = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            writer.flush().await.unwrap();
            writer
        });

        let mut received = vec![0u8; expected.len()];
        reader.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
        let _writer = write_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_after_peer_gone_does_not_panic() {
        let (proxy_obfs, _) = make_backend_frame(ConnectionType::Abridged, 2);
        let (a, b) = tokio::io::duplex(16);
        drop(b);
        let mut stream = CipherStream::new(a, proxy_obfs);

        assert!(stream.write_all(b"data").await.is_err());
        let _ = stream.shutdown().await;
        let _ = stream.shutdown().await;
    }
}
