use mtproto_proxy::config::ConnConfig;
use mtproto_proxy::dialer::DatacenterTable;
use mtproto_proxy::obfuscated2::{
    extract_frame, make_client_frame, parse_frame, ConnectionType, Secret,
};
use mtproto_proxy::server_runner::{bind_listener, run_server};
use mtproto_proxy::stream::CipherStream;
use mtproto_proxy::Server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

struct Proxy {
    server: Arc<Server>,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Proxy {
    async fn wait_idle(&self) {
        for _ in 0..100 {
            if self.server.stats.active_connections() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("sessions did not finish");
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn start_proxy(secret: &str, datacenter: SocketAddr) -> Proxy {
    let server = Arc::new(
        Server::builder()
            .secret(Secret::parse(secret).unwrap())
            .datacenters(DatacenterTable::telegram().with_override(2, datacenter))
            .conn_config(ConnConfig {
                read_timeout: Duration::from_secs(5),
                write_timeout: Duration::from_secs(5),
                ..ConnConfig::default()
            })
            .build()
            .unwrap(),
    );
    let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(run_server(server.clone(), listener, shutdown.clone()));
    Proxy {
        server,
        addr,
        shutdown,
    }
}

/// Fake datacenter: accept one connection, answer `ping` with `pong`.
fn spawn_fake_datacenter(listener: TcpListener) -> tokio::task::JoinHandle<(ConnectionType, i16)> {
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let frame = extract_frame(&mut socket).await.unwrap();
        let (obfs, connection_type, dc) = parse_frame(None, &frame).unwrap();

        let mut stream = CipherStream::new(socket, obfs);
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        stream.write_all(b"pong").await.unwrap();
        stream.flush().await.unwrap();

        // hold the connection until the client side goes away
        let mut rest = [0u8; 16];
        let _ = stream.read(&mut rest).await;
        (connection_type, dc)
    })
}

async fn ping_pong(proxy_addr: SocketAddr, secret: &Secret, connection_type: ConnectionType) {
    let (obfs, frame) = make_client_frame(secret, connection_type, 2);
    let mut socket = TcpStream::connect(proxy_addr).await.unwrap();
    socket.write_all(frame.as_bytes()).await.unwrap();

    let mut client = CipherStream::new(socket, obfs);
    client.write_all(b"ping").await.unwrap();
    client.flush().await.unwrap();

    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .expect("no answer from proxy")
        .unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn test_ping_pong_through_proxy() {
    let datacenter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = start_proxy(SECRET, datacenter.local_addr().unwrap());
    let backend = spawn_fake_datacenter(datacenter);

    let secret = Secret::parse(SECRET).unwrap();
    ping_pong(proxy.addr, &secret, ConnectionType::Intermediate).await;

    let (connection_type, dc) = tokio::time::timeout(Duration::from_secs(5), backend)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(connection_type, ConnectionType::Intermediate);
    assert_eq!(dc, 2);

    proxy.wait_idle().await;
    let snapshot = proxy.server.stats.snapshot();
    assert_eq!(snapshot.total_connections, 1);
    assert_eq!(snapshot.active_connections, 0);
    // client frame + ping from the client, pong from the datacenter
    assert_eq!(snapshot.incoming_bytes, 64 + 4 + 4);
    // backend frame is written before accounting starts
    assert_eq!(snapshot.outgoing_bytes, 4 + 4);
}

#[tokio::test]
async fn test_wrong_secret_never_reaches_datacenter() {
    let datacenter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = start_proxy(SECRET, datacenter.local_addr().unwrap());

    let wrong = Secret::parse("ffeeddccbbaa99887766554433221100").unwrap();
    let (_, frame) = make_client_frame(&wrong, ConnectionType::Abridged, 2);
    let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
    socket.write_all(frame.as_bytes()).await.unwrap();

    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0, "proxy should close the connection");

    let accepted = tokio::time::timeout(Duration::from_millis(300), datacenter.accept()).await;
    assert!(accepted.is_err(), "datacenter must not be dialed");

    proxy.wait_idle().await;
    assert_eq!(proxy.server.stats.total_connections(), 1);
}

#[tokio::test]
async fn test_secure_only_secret() {
    let datacenter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = start_proxy(&format!("dd{}", SECRET), datacenter.local_addr().unwrap());
    let secret = Secret::parse(SECRET).unwrap();

    // abridged clients are turned away
    let (_, frame) = make_client_frame(&secret, ConnectionType::Abridged, 2);
    let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
    socket.write_all(frame.as_bytes()).await.unwrap();
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    // secure clients go through
    let backend = spawn_fake_datacenter(datacenter);
    ping_pong(proxy.addr, &secret, ConnectionType::Secure).await;
    let (connection_type, _) = backend.await.unwrap();
    assert_eq!(connection_type, ConnectionType::Secure);
}

#[tokio::test]
async fn test_concurrent_sessions() {
    let datacenter = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = start_proxy(SECRET, datacenter.local_addr().unwrap());
    let secret = Secret::parse(SECRET).unwrap();

    const SESSIONS: usize = 8;
    let backend = tokio::spawn(async move {
        let mut handles = Vec::new();
        for _ in 0..SESSIONS {
            let (mut socket, _) = datacenter.accept().await.unwrap();
            handles.push(tokio::spawn(async move {
                let frame = extract_frame(&mut socket).await.unwrap();
                let (obfs, _, _) = parse_frame(None, &frame).unwrap();
                let mut stream = CipherStream::new(socket, obfs);
                let mut buf = [0u8; 4];
                stream.read_exact(&mut buf).await.unwrap();
                stream.write_all(b"pong").await.unwrap();
                stream.flush().await.unwrap();
                let _ = stream.read(&mut buf).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    });

    let mut clients = Vec::new();
    for _ in 0..SESSIONS {
        let secret = secret.clone();
        let addr = proxy.addr;
        clients.push(tokio::spawn(async move {
            ping_pong(addr, &secret, ConnectionType::Abridged).await;
        }));
    }
    for client in clients {
        client.await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), backend)
        .await
        .unwrap()
        .unwrap();

    proxy.wait_idle().await;
    assert_eq!(proxy.server.stats.total_connections(), SESSIONS as u64);
}
