//! End-to-end tests: routers built from node descriptors relaying real
//! sockets, directly and through a hop, in plaintext and over TLS.

use hopchain::chain::{AttemptError, Chain, ChainError};
use hopchain::connector::PacketSession;
use hopchain::listener::TlsPolicy;
use hopchain::router::RouterError;
use hopchain::{gen_routers, Router, RouterConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Echo every byte back
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = conn.split();
                tokio::io::copy(&mut r, &mut w).await.ok();
            });
        }
    });
    addr
}

/// Echo every UDP datagram back to its sender
async fn udp_echo_server() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        while let Ok((n, from)) = socket.recv_from(&mut buf).await {
            socket.send_to(&buf[..n], from).await.ok();
        }
    });
    addr
}

/// A running router and the addresses its servers bound
struct Running {
    router: Arc<Router>,
    addrs: Vec<String>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), RouterError>>,
}

async fn start(config: RouterConfig, tls: Option<Arc<rustls::ServerConfig>>) -> Running {
    let entries = gen_routers(&config, tls).await.unwrap();
    let addrs = entries
        .iter()
        .map(|e| e.server.as_ref().unwrap().addr().to_string())
        .collect();

    let router = Arc::new(Router::new(entries));
    let cancel = CancellationToken::new();
    let task = {
        let router = router.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { router.serve_all(cancel).await })
    };

    Running {
        router,
        addrs,
        cancel,
        task,
    }
}

fn router_config(serve_nodes: &[String], chain_node: Option<String>) -> RouterConfig {
    RouterConfig {
        serve_nodes: serve_nodes.to_vec(),
        chain_node,
        ..Default::default()
    }
}

async fn round_trip(addr: &str, payload: &[u8]) -> Vec<u8> {
    let mut conn = TcpStream::connect(addr).await.unwrap();
    conn.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Self-signed certificate for `localhost`: server config plus a CA file path
fn tls_material(tag: &str) -> (Arc<rustls::ServerConfig>, PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
    let server = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert.cert.der().clone()], key)
        .unwrap();

    let ca_path = std::env::temp_dir().join(format!("hopchain-{}-{}.pem", tag, std::process::id()));
    std::fs::write(&ca_path, cert.cert.pem()).unwrap();
    (Arc::new(server), ca_path)
}

async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_direct_relay() {
    let echo = echo_server().await;
    let running = start(
        router_config(&[format!("tcp://127.0.0.1:0?target={}", echo)], None),
        None,
    )
    .await;

    assert_eq!(round_trip(&running.addrs[0], b"hello hopchain").await, b"hello hopchain");

    running.cancel.cancel();
}

#[tokio::test]
async fn test_direct_mode_sends_no_preamble() {
    let raw = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let raw_addr = raw.local_addr().unwrap();
    let captured = tokio::spawn(async move {
        let (mut conn, _) = raw.accept().await.unwrap();
        let mut buf = [0u8; 5];
        conn.read_exact(&mut buf).await.unwrap();
        buf
    });

    let running = start(
        router_config(&[format!("tcp://127.0.0.1:0?target={}", raw_addr)], None),
        None,
    )
    .await;

    let mut client = TcpStream::connect(&running.addrs[0]).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    assert_eq!(&captured.await.unwrap(), b"hello");

    running.cancel.cancel();
}

#[tokio::test]
async fn test_relay_through_hop() {
    let echo = echo_server().await;

    // The hop learns its target from the tunnel preamble
    let hop = start(router_config(&["tcp://127.0.0.1:0".to_string()], None), None).await;
    let edge = start(
        router_config(
            &[format!("tcp://127.0.0.1:0?target={}", echo)],
            Some(format!("tcp://{}", hop.addrs[0])),
        ),
        None,
    )
    .await;

    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    assert_eq!(round_trip(&edge.addrs[0], &payload).await, payload);

    edge.cancel.cancel();
    hop.cancel.cancel();
}

#[tokio::test]
async fn test_relay_through_tls_hop() {
    let echo = echo_server().await;
    let (server_tls, ca_path) = tls_material("hop");

    let hop = start(
        router_config(&["tcp+tls://127.0.0.1:0".to_string()], None),
        Some(server_tls),
    )
    .await;
    let edge = start(
        router_config(
            &[format!("tcp://127.0.0.1:0?target={}", echo)],
            Some(format!(
                "tcp+tls://{}?sni=localhost&ca={}",
                hop.addrs[0],
                ca_path.display()
            )),
        ),
        None,
    )
    .await;

    assert_eq!(round_trip(&edge.addrs[0], b"over tls").await, b"over tls");

    edge.cancel.cancel();
    hop.cancel.cancel();
    std::fs::remove_file(&ca_path).ok();
}

#[tokio::test]
async fn test_required_tls_refuses_plaintext_peer() {
    let echo = echo_server().await;
    let (server_tls, ca_path) = tls_material("required");

    let mut config = router_config(&[format!("tcp://127.0.0.1:0?target={}", echo)], None);
    config.tls_policy = TlsPolicy::Required;
    let running = start(config, Some(server_tls)).await;

    let mut client = TcpStream::connect(&running.addrs[0]).await.unwrap();
    client.write_all(b"plaintext, not a ClientHello\r\n").await.unwrap();

    // The handshake fails and the connection is dropped without relaying
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .unwrap()
        .ok();
    assert!(!buf.windows(9).any(|w| w == b"plaintext"));

    // Under the per-endpoint policy the same node stays plaintext
    let plain = start(
        router_config(&[format!("tcp://127.0.0.1:0?target={}", echo)], None),
        Some(tls_material("per-endpoint").0),
    )
    .await;
    assert_eq!(round_trip(&plain.addrs[0], b"plaintext").await, b"plaintext");

    running.cancel.cancel();
    plain.cancel.cancel();
    std::fs::remove_file(&ca_path).ok();
}

fn numbered_packets(count: u32) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let len = 20 + (i as usize * 37) % 1400;
            let mut p = vec![(i % 251) as u8; len];
            p[0] = 0x45;
            p[1..5].copy_from_slice(&i.to_be_bytes());
            p
        })
        .collect()
}

async fn exchange(session: &mut PacketSession, packets: &[Vec<u8>]) {
    for p in packets {
        session.send_packet(p).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), session.recv_packet())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], &p[..]);
    }
}

#[tokio::test]
async fn test_packets_through_hop_reach_udp_target() {
    let remote = udp_echo_server().await;
    let hop = start(router_config(&["tcp://127.0.0.1:0".to_string()], None), None).await;

    let chain = Chain::parse(Some(format!("tcp://{}", hop.addrs[0]).as_str()), 0).unwrap();
    let mut session = chain.dial_packets(&remote.to_string()).await.unwrap();

    exchange(&mut session, &[b"\x45hello-datagram".to_vec()]).await;
    exchange(&mut session, &numbered_packets(100)).await;

    session.close().await;
    hop.cancel.cancel();
}

#[tokio::test]
async fn test_packets_through_two_hops() {
    let remote = udp_echo_server().await;

    // The last hop unpacks to UDP; the first forwards the packet session on
    let exit = start(router_config(&["tcp://127.0.0.1:0".to_string()], None), None).await;
    let entry = start(
        router_config(
            &["tcp://127.0.0.1:0".to_string()],
            Some(format!("tcp://{}", exit.addrs[0])),
        ),
        None,
    )
    .await;

    let chain = Chain::parse(Some(format!("tcp://{}", entry.addrs[0]).as_str()), 0).unwrap();
    let mut session = chain.dial_packets(&remote.to_string()).await.unwrap();
    exchange(&mut session, &numbered_packets(20)).await;

    session.close().await;
    entry.cancel.cancel();
    exit.cancel.cancel();
}

#[tokio::test]
async fn test_chain_exhausts_retries() {
    let port = free_port().await;
    let chain = Chain::parse(Some(format!("tcp://127.0.0.1:{}", port).as_str()), 2).unwrap();

    match chain.dial_stream("10.0.0.5:80").await {
        Err(ChainError::Exhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, AttemptError::Dial(_)));
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_cancel_releases_port() {
    let running = start(router_config(&["tcp://127.0.0.1:0".to_string()], None), None).await;
    let addr = running.addrs[0].clone();

    running.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    TcpListener::bind(&addr).await.unwrap();
}

#[tokio::test]
async fn test_close_before_serving() {
    let config = router_config(&["tcp://127.0.0.1:0".to_string()], None);
    let router = Router::new(gen_routers(&config, None).await.unwrap());
    let addr = router.entries()[0].server.as_ref().unwrap().addr().to_string();

    router.close_all();
    router.close_all();
    TcpListener::bind(&addr).await.unwrap();

    router.serve_all(CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn test_failed_batch_releases_sockets() {
    let port = free_port().await;
    let config = router_config(
        &[
            format!("tcp://127.0.0.1:{}", port),
            "tcp://127.0.0.1:0?route=%zz".to_string(),
        ],
        None,
    );

    assert!(gen_routers(&config, None).await.is_err());
    TcpListener::bind(("127.0.0.1", port)).await.unwrap();
}

#[tokio::test]
async fn test_router_close_stops_serving() {
    let running = start(router_config(&["tcp://127.0.0.1:0".to_string()], None), None).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    running.router.close_all();
    tokio::time::timeout(Duration::from_secs(5), running.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
