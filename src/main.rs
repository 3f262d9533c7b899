//! netgate demo server.
//!
//! Starts whichever transports the configuration enables and echoes traffic
//! back: raw bytes on the stream transports, messages on the WebSocket
//! transports. Shuts down gracefully on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use netgate::config::{load_config, GateConfig};
use netgate::net::agent::{Agent, AgentInfo, AgentStream};
use netgate::GateServer;

#[derive(Parser)]
#[command(name = "netgate", about = "Multi-transport echo gateway")]
struct Cli {
    /// Path to a TOML configuration file; defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Demo codec: frames pass through untouched.
struct RawCodec;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    netgate::observability::logging::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };
    if cli.config.is_none() && config.listener.tcp_addr.is_none() {
        config.listener.tcp_addr = Some("127.0.0.1:7000".into());
        config.listener.ws_addr = Some("127.0.0.1:7001".into());
    }

    tracing::info!(
        max_connections = config.limits.max_connections,
        max_connections_per_ip = config.limits.max_connections_per_ip,
        "configuration loaded"
    );

    let server = Arc::new(GateServer::new(config));
    let codec = Arc::new(RawCodec);

    server
        .listen_stream(
            Arc::clone(&codec),
            |agent| {
                tokio::spawn(echo_stream(agent));
            },
            |info: &AgentInfo| tracing::info!(peer = %info.peer, id = %info.id, "connection closed"),
        )
        .await?;

    server
        .listen_ws(
            codec,
            |agent| {
                tokio::spawn(echo_ws(agent));
            },
            |agent: &mut Agent<RawCodec>| {
                tracing::debug!(peer = %agent.peer(), "websocket handshake complete");
            },
            |info: &AgentInfo| {
                tracing::info!(peer = %info.peer, id = %info.id, "websocket connection closed");
            },
        )
        .await?;

    netgate::lifecycle::signals::shutdown_signal().await;
    server.shutdown().await;
    Ok(())
}

async fn echo_stream(mut agent: Agent<RawCodec>) {
    let close = agent.close_signal();
    let Some(stream) = agent.take_stream() else { return };
    match stream {
        AgentStream::Tcp(stream) => echo_bytes(stream, close).await,
        AgentStream::Tls(stream) => echo_bytes(*stream, close).await,
        _ => {}
    }
    // Dropping `agent` here retires the connection.
}

async fn echo_ws(mut agent: Agent<RawCodec>) {
    let close = agent.close_signal();
    let Some(stream) = agent.take_stream() else { return };
    match stream {
        AgentStream::Ws(ws) => echo_messages(*ws, close).await,
        AgentStream::Wss(ws) => echo_messages(*ws, close).await,
        _ => {}
    }
}

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
