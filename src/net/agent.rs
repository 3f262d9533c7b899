//! Hand-off boundary to the per-connection actor.
//!
//! The gateway does not own a connection's read/write loop; the embedding
//! server does. Once a connection is admitted (and upgraded, for the
//! WebSocket transports) it is wrapped in an [`Agent`] and passed to the
//! caller's `on_connect` hook. The agent carries the caller's codec
//! untouched, together with the RAII state that retires the connection when
//! the agent is dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{ConnectionGuard, ConnectionId};

use super::admission::ConnectionPermit;
use super::Transport;

/// Hook invoked with every admitted connection.
pub type ConnectFn<P> = Arc<dyn Fn(Agent<P>) + Send + Sync>;
/// Hook invoked after a WebSocket upgrade completes, before `on_connect`.
pub type HandshakeFn<P> = Arc<dyn Fn(&mut Agent<P>) + Send + Sync>;
/// Hook invoked after a connection's teardown has fully completed.
pub type CloseFn = Arc<dyn Fn(&AgentInfo) + Send + Sync>;

/// Identity of an admitted connection; still available after the agent and
/// its stream are gone.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub transport: Transport,
}

/// The established, transport-specific stream.
pub enum AgentStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Ws(Box<WebSocketStream<TcpStream>>),
    Wss(Box<WebSocketStream<TlsStream<TcpStream>>>),
}

/// A single admitted connection, handed to `on_connect`.
///
/// Contract for the embedding server:
/// - take the stream with [`Agent::take_stream`] and drive its I/O loop,
///   racing every read against [`Agent::close_signal`]; when the signal
///   fires the connection has been force-closed and the stream must be
///   dropped
/// - drop the agent when the connection is finished; that releases the
///   admission slot, marks the connection drained, and then runs the
///   caller's `on_close` hook, in that order
pub struct Agent<P> {
    info: AgentInfo,
    codec: Arc<P>,
    stream: Option<AgentStream>,
    close: CancellationToken,
    permit: Option<ConnectionPermit>,
    track: Option<ConnectionGuard>,
    on_close: Option<CloseFn>,
}

impl<P> Agent<P> {
    pub(crate) fn new(
        info: AgentInfo,
        codec: Arc<P>,
        stream: AgentStream,
        close: CancellationToken,
        permit: ConnectionPermit,
        track: ConnectionGuard,
        on_close: Option<CloseFn>,
    ) -> Self {
        Self {
            info,
            codec,
            stream: Some(stream),
            close,
            permit: Some(permit),
            track: Some(track),
            on_close,
        }
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.info.peer
    }

    pub fn transport(&self) -> Transport {
        self.info.transport
    }

    /// The caller-supplied codec, passed through untouched.
    pub fn codec(&self) -> &Arc<P> {
        &self.codec
    }

    /// Token cancelled when this connection is force-closed.
    pub fn close_signal(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Take ownership of the stream for the read/write loop.
    /// Returns `None` if it was already taken.
    pub fn take_stream(&mut self) -> Option<AgentStream> {
        self.stream.take()
    }
}

impl<P> Drop for Agent<P> {
    fn drop(&mut self) {
        // Teardown order: close the stream, release the admission slot,
        // mark the connection drained, then notify the caller.
        self.stream.take();
        self.permit.take();
        self.track.take();
        if let Some(on_close) = self.on_close.take() {
            on_close(&self.info);
        }
    }
}
