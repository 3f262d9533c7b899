//! Admission behavior over real connections.

mod common;

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use netgate::Transport;

/// A rejected socket is accepted by the OS, then closed by admission before
/// any agent exists; the client observes an immediate EOF.
async fn expect_rejected(addr: std::net::SocketAddr) {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("rejected socket was not closed");
    assert_eq!(read.unwrap_or(0), 0);
}

#[tokio::test]
async fn global_cap_rejects_excess_connections() {
    let server = common::start_echo_server(common::tcp_config(2, 100)).await;
    let addr = server.local_addr(Transport::Tcp).await.unwrap();

    let _c1 = common::connect_and_verify(addr).await;
    let _c2 = common::connect_and_verify(addr).await;
    assert_eq!(server.active_connections(), 2);

    expect_rejected(addr).await;
    assert_eq!(server.active_connections(), 2);
    assert_eq!(server.admission_stats().plain, 2);

    server.shutdown().await;
}

#[tokio::test]
async fn per_ip_allowlist_raises_the_cap() {
    let mut config = common::tcp_config(100, 1);
    config.limits.ip_allowlist.insert("127.0.0.1".into(), 3);

    let server = common::start_echo_server(config).await;
    let addr = server.local_addr(Transport::Tcp).await.unwrap();

    let _c1 = common::connect_and_verify(addr).await;
    let _c2 = common::connect_and_verify(addr).await;
    let _c3 = common::connect_and_verify(addr).await;
    assert_eq!(server.active_connections(), 3);

    expect_rejected(addr).await;
    assert_eq!(server.active_connections(), 3);

    server.shutdown().await;
}

#[tokio::test]
async fn released_slots_can_be_reused() {
    let server = common::start_echo_server(common::tcp_config(1, 10)).await;
    let addr = server.local_addr(Transport::Tcp).await.unwrap();

    let c1 = common::connect_and_verify(addr).await;
    expect_rejected(addr).await;

    drop(c1);
    // The agent sees EOF, drops, and releases the slot.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while server.active_connections() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "slot was not released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let _c2 = common::connect_and_verify(addr).await;
    server.shutdown().await;
}

#[tokio::test]
async fn unconfigured_transports_never_start() {
    let server = common::start_echo_server(common::tcp_config(4, 4)).await;
    assert!(server.local_addr(Transport::Tcp).await.is_some());
    assert!(server.local_addr(Transport::Tls).await.is_none());
    assert!(server.local_addr(Transport::Ws).await.is_none());
    server.shutdown().await;
}
