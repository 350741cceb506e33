//! Connection handling logic
//!
//! One accepted socket becomes one session: client handshake, datacenter
//! dial and handshake, relay, teardown.

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{relay, RelayResult, Server};
use crate::dialer;
use crate::error::{ProxyError, Result};
use crate::logger::log;
use crate::obfuscated2::{
    extract_frame, make_backend_frame, parse_client_frame, send_frame, ClientHandshake,
};
use crate::stream::{self, ObfuscatedStream};

/// Accept the client handshake and wrap the socket for relaying.
async fn client_stream<S>(
    server: &Server,
    socket: S,
    socket_id: Uuid,
    token: CancellationToken,
) -> Result<(ObfuscatedStream<S>, ClientHandshake)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let conf = &server.conn_config;
    let mut accounted = stream::accounted(
        socket,
        server.stats.clone(),
        conf.read_timeout,
        conf.write_timeout,
    );

    let frame = extract_frame(&mut accounted).await?;
    let (obfs, handshake) = parse_client_frame(&server.secret, &frame)?;
    log::debug!(
        socket_id = %socket_id,
        dc = handshake.dc,
        connection_type = %handshake.connection_type,
        "Client handshake accepted"
    );

    let client = stream::obfuscated(accounted, socket_id, "client", obfs, token);
    Ok((client, handshake))
}

/// Dial the requested datacenter and perform the outbound handshake.
async fn backend_stream(
    server: &Server,
    handshake: &ClientHandshake,
    socket_id: Uuid,
    token: CancellationToken,
) -> Result<ObfuscatedStream<TcpStream>> {
    let conf = &server.conn_config;
    let (mut socket, addr) = dialer::dial_datacenter(
        &server.datacenters,
        handshake.dc,
        conf.prefer_ipv6,
        conf.read_timeout,
        conf.tcp_nodelay,
    )
    .await?;

    // the frame goes out on the raw socket, before any accounting
    let (obfs, frame) = make_backend_frame(handshake.connection_type, handshake.dc);
    tokio::time::timeout(conf.write_timeout, send_frame(&mut socket, &frame))
        .await
        .map_err(|_| ProxyError::Handshake(format!("handshake write to {} timed out", addr)))??;

    let accounted = stream::accounted(
        socket,
        server.stats.clone(),
        conf.read_timeout,
        conf.write_timeout,
    );
    Ok(stream::obfuscated(accounted, socket_id, "telegram", obfs, token))
}

/// Process a single client connection from handshake to teardown.
///
/// Handshake and dial failures are logged here and returned; nothing is
/// dialed when the client handshake fails.
pub async fn process_connection<S>(
    server: &Server,
    socket: S,
    peer_addr: SocketAddr,
) -> Result<RelayResult>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let socket_id = Uuid::new_v4();
    log::session_started(&format!("{:?}", server.secret), &peer_addr, &socket_id);

    let token = CancellationToken::new();

    let (mut client, handshake) =
        match client_stream(server, socket, socket_id, token.clone()).await {
            Ok(v) => v,
            Err(e) => {
                log::handshake_failed("client", &peer_addr, &socket_id, &e.to_string());
                return Err(e);
            }
        };

    let backend = match backend_stream(server, &handshake, socket_id, token.clone()).await {
        Ok(s) => s,
        Err(e) => {
            log::handshake_failed("Telegram", &peer_addr, &socket_id, &e.to_string());
            let _ = client.shutdown().await;
            return Err(e);
        }
    };

    let result = relay(client, backend, token, server.conn_config.buffer_size).await;
    log::session_ended(
        &peer_addr,
        &socket_id,
        result.client_to_backend,
        result.backend_to_client,
    );
    Ok(result)
}
