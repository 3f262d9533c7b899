//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use netgate::config::GateConfig;
use netgate::net::agent::{Agent, AgentInfo, AgentStream};
use netgate::GateServer;

/// Codec placeholder; the gateway passes it through untouched.
pub struct TestCodec;

/// Config with only the plain TCP transport enabled.
#[allow(dead_code)]
pub fn tcp_config(max_connections: usize, max_per_ip: usize) -> GateConfig {
    let mut config = GateConfig::default();
    config.listener.tcp_addr = Some("127.0.0.1:0".into());
    config.limits.max_connections = max_connections;
    config.limits.max_connections_per_ip = max_per_ip;
    config
}

/// Start a server echoing raw bytes on the stream transports.
#[allow(dead_code)]
pub async fn start_echo_server(config: GateConfig) -> Arc<GateServer> {
    let server = Arc::new(GateServer::new(config));
    server
        .listen_stream(
            Arc::new(TestCodec),
            |agent| {
                tokio::spawn(echo_stream_agent(agent));
            },
            |_info: &AgentInfo| {},
        )
        .await
        .expect("failed to start stream listeners");
    server
}

/// Connect and prove the connection was admitted by a full echo round-trip.
#[allow(dead_code)]
pub async fn connect_and_verify(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    stream.write_all(b"ping").await.expect("write failed");
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .expect("echo read failed");
    assert_eq!(&buf, b"ping");
    stream
}

#[allow(dead_code)]
pub async fn echo_stream_agent(mut agent: Agent<TestCodec>) {
    let close = agent.close_signal();
    let Some(stream) = agent.take_stream() else { return };
    match stream {
        AgentStream::Tcp(stream) => echo_bytes(stream, close).await,
        AgentStream::Tls(stream) => echo_bytes(*stream, close).await,
        _ => {}
    }
}

#[allow(dead_code)]
pub async fn echo_ws_agent(mut agent: Agent<TestCodec>) {
    let close = agent.close_signal();
    let Some(stream) = agent.take_stream() else { return };
    match stream {
        AgentStream::Ws(ws) => echo_messages(*ws, close).await,
        AgentStream::Wss(ws) => echo_messages(*ws, close).await,
        _ => {}
    }
}

#[allow(dead_code)]
async fn echo_bytes<S>(mut stream: S, close: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        tokio::select! {
            _ = close.cancelled() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            },
        }
    }
}

#[allow(dead_code)]
async fn echo_messages<S>(mut ws: WebSocketStream<S>, close: CancellationToken)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = close.cancelled() => {
                let _ = ws.close(None).await;
                break;
            }
            message = ws.next() => match message {
                Some(Ok(message)) if message.is_text() || message.is_binary() => {
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}
