//! Transport listeners.
//!
//! # Responsibilities
//! - Bind to the configured address of one transport flavor
//! - Accept incoming TCP connections and consult admission control
//! - Perform the TLS handshake and/or WebSocket upgrade where the flavor
//!   requires it
//! - Hand established connections to the caller's hooks
//!
//! One parameterized accept loop serves all four flavors; the flavor decides
//! which registry the connection counts under and which establish steps run.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{ConnectionGuard, ConnectionTracker};

use super::admission::{AdmissionController, ConnectionPermit};
use super::agent::{Agent, AgentInfo, AgentStream, CloseFn, ConnectFn, HandshakeFn};
use super::Transport;

/// Error type for listener startup.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(String, std::io::Error),
    /// A TLS-flavored transport was started without an acceptor.
    MissingTls(Transport),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(addr, e) => write!(f, "failed to bind {}: {}", addr, e),
            ListenerError::MissingTls(transport) => {
                write!(f, "{} listener requires TLS material", transport)
            }
        }
    }
}

impl std::error::Error for ListenerError {}

/// Codec and hooks shared by every connection accepted on one listen call.
pub struct Hooks<P> {
    pub codec: Arc<P>,
    pub on_connect: ConnectFn<P>,
    pub on_handshake: Option<HandshakeFn<P>>,
    pub on_close: Option<CloseFn>,
}

impl<P> Clone for Hooks<P> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            on_connect: Arc::clone(&self.on_connect),
            on_handshake: self.on_handshake.clone(),
            on_close: self.on_close.clone(),
        }
    }
}

/// A started listener: its bound address plus the running accept loop.
pub struct ListenerHandle {
    transport: Transport,
    local_addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listening socket and wait for the accept loop to exit.
    /// After this returns, no further admissions originate from this
    /// listener.
    pub async fn close(self) {
        self.stop.cancel();
        let _ = self.task.await;
    }
}

/// Bind `addr` and launch the accept loop for one transport flavor.
pub async fn start<P>(
    transport: Transport,
    addr: &str,
    tls: Option<TlsAcceptor>,
    admission: AdmissionController,
    tracker: ConnectionTracker,
    hooks: Hooks<P>,
) -> Result<ListenerHandle, ListenerError>
where
    P: Send + Sync + 'static,
{
    if transport.secured() && tls.is_none() {
        return Err(ListenerError::MissingTls(transport));
    }

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ListenerError::Bind(addr.to_string(), e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ListenerError::Bind(addr.to_string(), e))?;

    tracing::info!(transport = %transport, address = %local_addr, "listener started");

    let stop = CancellationToken::new();
    let loop_stop = stop.clone();
    let task = tokio::spawn(async move {
        accept_loop(transport, listener, tls, admission, tracker, hooks, loop_stop).await;
    });

    Ok(ListenerHandle {
        transport,
        local_addr,
        stop,
        task,
    })
}

async fn accept_loop<P>(
    transport: Transport,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    admission: AdmissionController,
    tracker: ConnectionTracker,
    hooks: Hooks<P>,
    stop: CancellationToken,
) where
    P: Send + Sync + 'static,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = stop.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::debug!(transport = %transport, error = %err, "accept failed");
                    break;
                }
            },
        };

        // A rejected socket is closed right here by dropping it.
        let Some(permit) = admission.try_admit(peer, transport.stream_kind()) else {
            continue;
        };
        let track = tracker.track();

        tokio::spawn(establish(
            transport,
            stream,
            peer,
            tls.clone(),
            permit,
            track,
            hooks.clone(),
        ));
    }
    tracing::debug!(transport = %transport, "accept loop stopped");
}

/// Complete the per-transport setup and hand the agent to `on_connect`.
///
/// Handshakes race the connection's close token so a client that stalls
/// mid-handshake cannot hold up shutdown. Every early return drops the
/// permit and guard, releasing the slot.
async fn establish<P>(
    transport: Transport,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    permit: ConnectionPermit,
    track: ConnectionGuard,
    hooks: Hooks<P>,
) where
    P: Send + Sync + 'static,
{
    let close = permit.close_signal();

    let stream = match transport {
        Transport::Tcp => AgentStream::Tcp(stream),
        Transport::Ws => {
            let ws = tokio::select! {
                _ = close.cancelled() => return,
                upgraded = tokio_tungstenite::accept_async(stream) => match upgraded {
                    Ok(ws) => ws,
                    Err(err) => {
                        tracing::debug!(peer = %peer, error = %err, "websocket upgrade failed");
                        return;
                    }
                },
            };
            AgentStream::Ws(Box::new(ws))
        }
        Transport::Tls | Transport::Wss => {
            let Some(acceptor) = tls else { return };
            let tls_stream = tokio::select! {
                _ = close.cancelled() => return,
                accepted = acceptor.accept(stream) => match accepted {
                    Ok(tls_stream) => tls_stream,
                    Err(err) => {
                        tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                        return;
                    }
                },
            };
            if transport == Transport::Wss {
                let ws = tokio::select! {
                    _ = close.cancelled() => return,
                    upgraded = tokio_tungstenite::accept_async(tls_stream) => match upgraded {
                        Ok(ws) => ws,
                        Err(err) => {
                            tracing::debug!(peer = %peer, error = %err, "websocket upgrade failed");
                            return;
                        }
                    },
                };
                AgentStream::Wss(Box::new(ws))
            } else {
                AgentStream::Tls(Box::new(tls_stream))
            }
        }
    };

    let info = AgentInfo {
        id: track.id(),
        peer,
        transport,
    };
    let mut agent = Agent::new(
        info,
        hooks.codec,
        stream,
        close,
        permit,
        track,
        hooks.on_close,
    );
    if let Some(on_handshake) = &hooks.on_handshake {
        on_handshake(&mut agent);
    }
    (hooks.on_connect)(agent);
}
