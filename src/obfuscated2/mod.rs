//! obfuscated2 transport handshake
//!
//! Both peers derive two AES-256-CTR streams from the 64-byte handshake frame:
//! a forward stream keyed by the frame's key/IV and a backward stream keyed by
//! the inverted frame. With a proxy secret each key is `SHA-256(key || secret)`.
//! The side that sent the frame encrypts with the forward stream; the side
//! that received it decrypts with it.
//!
//! Toward clients the proxy is the receiving side and authenticates them with
//! the secret. Toward the datacenter it sends a fresh frame without a secret,
//! impersonating an ordinary client.

mod frame;
mod secret;

pub use frame::{ConnectionType, Frame, FRAME_LEN};
pub use secret::{Secret, SECRET_LEN};

use aes::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, Result};
use frame::{IV_LEN, KEY_LEN, MAGIC_OFFSET};

/// AES-256 in CTR mode with a 128-bit big-endian counter
pub type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Per-connection cipher pair
pub struct Obfuscated2 {
    decryptor: Aes256Ctr,
    encryptor: Aes256Ctr,
}

impl Obfuscated2 {
    /// Decrypt bytes received from the peer, in place
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.decryptor.apply_keystream(buf);
    }

    /// Encrypt bytes destined for the peer, in place
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.encryptor.apply_keystream(buf);
    }

    /// Split into `(decryptor, encryptor)`
    pub fn into_parts(self) -> (Aes256Ctr, Aes256Ctr) {
        (self.decryptor, self.encryptor)
    }
}

impl fmt::Debug for Obfuscated2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obfuscated2").finish_non_exhaustive()
    }
}

/// Parameters recovered from a client frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandshake {
    /// Requested datacenter; negative ids address media datacenters
    pub dc: i16,
    pub connection_type: ConnectionType,
}

fn make_cipher(key: &[u8], iv: &[u8], secret: Option<&[u8]>) -> Aes256Ctr {
    let mut key_bytes = [0u8; KEY_LEN];
    match secret {
        Some(secret) => {
            let digest = Sha256::new().chain_update(key).chain_update(secret).finalize();
            key_bytes.copy_from_slice(&digest);
        }
        None => key_bytes.copy_from_slice(key),
    }
    let mut iv_bytes = [0u8; IV_LEN];
    iv_bytes.copy_from_slice(iv);
    Aes256Ctr::new(&key_bytes.into(), &iv_bytes.into())
}

/// `(forward, backward)` streams for a frame
fn derive_ciphers(frame: &Frame, secret: Option<&[u8]>) -> (Aes256Ctr, Aes256Ctr) {
    let forward = make_cipher(frame.key(), frame.iv(), secret);
    let inverted = frame.invert();
    let backward = make_cipher(inverted.key(), inverted.iv(), secret);
    (forward, backward)
}

/// Read exactly one handshake frame.
pub async fn extract_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut bytes = [0u8; FRAME_LEN];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| ProxyError::Handshake(format!("cannot read handshake frame: {}", e)))?;
    Ok(Frame::from_bytes(bytes))
}

/// Write a handshake frame in full.
pub async fn send_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(frame.as_bytes())
        .await
        .map_err(|e| ProxyError::Handshake(format!("cannot write handshake frame: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| ProxyError::Handshake(format!("cannot flush handshake frame: {}", e)))
}

/// Decode a received frame as the receiving side.
///
/// Returns the cipher pair (already advanced past the frame), the announced
/// connection type and the raw datacenter id.
pub fn parse_frame(
    secret: Option<&[u8]>,
    frame: &Frame,
) -> Result<(Obfuscated2, ConnectionType, i16)> {
    let (mut forward, backward) = derive_ciphers(frame, secret);

    let mut decrypted = *frame;
    forward.apply_keystream(decrypted.as_mut_bytes());

    let connection_type = ConnectionType::from_tag(decrypted.magic()).ok_or_else(|| {
        ProxyError::Handshake(format!(
            "unknown connection tag {}",
            hex::encode(decrypted.magic())
        ))
    })?;

    let obfs = Obfuscated2 {
        decryptor: forward,
        encryptor: backward,
    };
    Ok((obfs, connection_type, decrypted.dc()))
}

/// Validate a client frame against the proxy secret.
pub fn parse_client_frame(secret: &Secret, frame: &Frame) -> Result<(Obfuscated2, ClientHandshake)> {
    let (obfs, connection_type, dc) = parse_frame(Some(secret.as_bytes()), frame)?;

    if secret.is_secure_only() && connection_type != ConnectionType::Secure {
        return Err(ProxyError::Handshake(format!(
            "{} connection rejected by secure-only secret",
            connection_type
        )));
    }
    if dc == 0 {
        return Err(ProxyError::Handshake("datacenter id 0 is invalid".to_string()));
    }

    Ok((
        obfs,
        ClientHandshake {
            dc,
            connection_type,
        },
    ))
}

/// Build a frame as the sending side: the key/IV region stays in the clear,
/// the tail is encrypted with the forward stream.
fn make_frame(
    secret: Option<&[u8]>,
    connection_type: ConnectionType,
    dc: i16,
) -> (Obfuscated2, Frame) {
    let frame = Frame::generate(connection_type, dc);
    let (mut forward, backward) = derive_ciphers(&frame, secret);

    let mut encrypted = frame;
    forward.apply_keystream(encrypted.as_mut_bytes());

    let mut wire = frame;
    wire.as_mut_bytes()[MAGIC_OFFSET..].copy_from_slice(&encrypted.as_bytes()[MAGIC_OFFSET..]);

    let obfs = Obfuscated2 {
        decryptor: backward,
        encryptor: forward,
    };
    (obfs, wire)
}

/// Frame and ciphers for a datacenter connection
pub fn make_backend_frame(connection_type: ConnectionType, dc: i16) -> (Obfuscated2, Frame) {
    make_frame(None, connection_type, dc)
}

/// Frame and ciphers for a client talking to a proxy holding `secret`
pub fn make_client_frame(
    secret: &Secret,
    connection_type: ConnectionType,
    dc: i16,
) -> (Obfuscated2, Frame) {
    make_frame(Some(secret.as_bytes()), connection_type, dc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> Secret {
        Secret::parse("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_client_frame_roundtrip() {
        let secret = secret();
        for dc in [1i16, 2, 5, -2] {
            let (mut client, frame) = make_client_frame(&secret, ConnectionType::Abridged, dc);
            let (mut proxy, hs) = parse_client_frame(&secret, &frame).unwrap();

            assert_eq!(hs.dc, dc);
            assert_eq!(hs.connection_type, ConnectionType::Abridged);

            let mut upstream = b"client says hello".to_vec();
            client.encrypt(&mut upstream);
            assert_ne!(&upstream[..], b"client says hello");
            proxy.decrypt(&mut upstream);
            assert_eq!(&upstream[..], b"client says hello");

            let mut downstream = b"proxy answers".to_vec();
            proxy.encrypt(&mut downstream);
            client.decrypt(&mut downstream);
            assert_eq!(&downstream[..], b"proxy answers");
        }
    }

    #[test]
    fn test_cipher_state_continues_across_calls() {
        let secret = secret();
        let (mut client, frame) = make_client_frame(&secret, ConnectionType::Intermediate, 2);
        let (mut proxy, _) = parse_client_frame(&secret, &frame).unwrap();

        let mut whole = b"abcdefghijklmnopqrstuvwxyz".to_vec();
        client.encrypt(&mut whole);

        let (a, b) = whole.split_at_mut(7);
        proxy.decrypt(a);
        proxy.decrypt(b);
        assert_eq!(&whole[..], b"abcdefghijklmnopqrstuvwxyz");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let good = secret();
        let bad = Secret::parse("ffffffffffffffffffffffffffffffff").unwrap();
        let (_, frame) = make_client_frame(&good, ConnectionType::Abridged, 2);
        let err = parse_client_frame(&bad, &frame).unwrap_err();
        assert!(matches!(err, ProxyError::Handshake(_)));
    }

    #[test]
    fn test_corrupted_tag_is_rejected() {
        let secret = secret();
        let (_, frame) = make_client_frame(&secret, ConnectionType::Abridged, 2);
        let mut bytes = *frame.as_bytes();
        bytes[57] ^= 0x01;
        let err = parse_client_frame(&secret, &Frame::from_bytes(bytes)).unwrap_err();
        assert!(err.to_string().contains("unknown connection tag"));
    }

    #[test]
    fn test_corrupted_key_is_rejected() {
        let secret = secret();
        let (_, frame) = make_client_frame(&secret, ConnectionType::Abridged, 2);
        let mut bytes = *frame.as_bytes();
        bytes[20] ^= 0x80;
        assert!(parse_client_frame(&secret, &Frame::from_bytes(bytes)).is_err());
    }

    #[test]
    fn test_zero_dc_is_rejected() {
        let secret = secret();
        let (_, frame) = make_client_frame(&secret, ConnectionType::Abridged, 0);
        let err = parse_client_frame(&secret, &frame).unwrap_err();
        assert!(err.to_string().contains("datacenter id 0"));
    }

    #[test]
    fn test_secure_only_secret() {
        let secure = Secret::parse("dd0123456789abcdef0123456789abcdef").unwrap();

        let (_, frame) = make_client_frame(&secure, ConnectionType::Abridged, 2);
        assert!(parse_client_frame(&secure, &frame).is_err());

        let (_, frame) = make_client_frame(&secure, ConnectionType::Secure, 2);
        let (_, hs) = parse_client_frame(&secure, &frame).unwrap();
        assert_eq!(hs.connection_type, ConnectionType::Secure);
    }

    #[test]
    fn test_backend_frame_roundtrip() {
        let (mut proxy, frame) = make_backend_frame(ConnectionType::Abridged, 4);

        // key material travels in the clear
        assert_ne!(frame.magic(), ConnectionType::Abridged.tag());

        let (mut datacenter, ct, dc) = parse_frame(None, &frame).unwrap();
        assert_eq!(ct, ConnectionType::Abridged);
        assert_eq!(dc, 4);

        let mut msg = b"ping".to_vec();
        proxy.encrypt(&mut msg);
        datacenter.decrypt(&mut msg);
        assert_eq!(&msg[..], b"ping");

        let mut reply = b"pong".to_vec();
        datacenter.encrypt(&mut reply);
        proxy.decrypt(&mut reply);
        assert_eq!(&reply[..], b"pong");
    }

    #[test]
    fn test_backend_frame_is_not_secret_keyed() {
        let (_, frame) = make_backend_frame(ConnectionType::Abridged, 2);
        assert!(parse_frame(Some(secret().as_bytes()), &frame).is_err());
    }

    #[tokio::test]
    async fn test_extract_frame_reads_exactly_one_frame() {
        let mut data = vec![7u8; FRAME_LEN];
        data.extend_from_slice(b"tail");
        let mut reader = std::io::Cursor::new(data);

        let frame = extract_frame(&mut reader).await.unwrap();
        assert_eq!(frame.as_bytes(), &[7u8; FRAME_LEN]);
        assert_eq!(reader.position(), FRAME_LEN as u64);
    }

    #[tokio::test]
    async fn test_extract_frame_short_read() {
        let mut reader = std::io::Cursor::new(vec![0u8; FRAME_LEN - 1]);
        let err = extract_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, ProxyError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_send_frame_writes_verbatim() {
        let (_, frame) = make_backend_frame(ConnectionType::Abridged, 2);
        let mut out = Vec::new();
        send_frame(&mut out, &frame).await.unwrap();
        assert_eq!(&out[..], frame.as_bytes());
    }
}
