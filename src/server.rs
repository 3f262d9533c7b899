//! Server wiring: start the transport pairs, coordinate shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;

use crate::config::GateConfig;
use crate::lifecycle::ConnectionTracker;
use crate::net::admission::{AdmissionController, AdmissionStats};
use crate::net::agent::{Agent, AgentInfo};
use crate::net::listener::{self, Hooks, ListenerError, ListenerHandle};
use crate::net::tls::{self, TlsError};
use crate::net::Transport;

/// Errors surfaced while starting listeners. All of them are fatal: a
/// partially configured server must not keep running.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("{0} listener requires [listener.tls] cert_path and key_path")]
    MissingTlsConfig(Transport),
}

/// Multi-transport connection gateway.
///
/// Owns the admission controller, the outstanding-connection tracker, and
/// every started listener. The embedding server starts the transport pairs
/// it needs, then calls [`GateServer::shutdown`] to drain.
pub struct GateServer {
    config: GateConfig,
    admission: AdmissionController,
    tracker: ConnectionTracker,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl GateServer {
    pub fn new(config: GateConfig) -> Self {
        let admission = AdmissionController::new(config.limits.clone());
        Self {
            config,
            admission,
            tracker: ConnectionTracker::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Start the plain TCP and TLS listeners, skipping unconfigured
    /// addresses. Every admitted connection is handed to `on_connect`;
    /// `on_close` runs after its teardown completes.
    pub async fn listen_stream<P>(
        &self,
        codec: Arc<P>,
        on_connect: impl Fn(Agent<P>) + Send + Sync + 'static,
        on_close: impl Fn(&AgentInfo) + Send + Sync + 'static,
    ) -> Result<(), GateError>
    where
        P: Send + Sync + 'static,
    {
        let hooks = Hooks {
            codec,
            on_connect: Arc::new(on_connect),
            on_handshake: None,
            on_close: Some(Arc::new(on_close)),
        };
        self.start_pair(Transport::Tcp, Transport::Tls, hooks).await
    }

    /// Start the WebSocket and WebSocket-over-TLS listeners, skipping
    /// unconfigured addresses. `on_handshake` runs once the upgrade
    /// completes, before `on_connect`.
    pub async fn listen_ws<P>(
        &self,
        codec: Arc<P>,
        on_connect: impl Fn(Agent<P>) + Send + Sync + 'static,
        on_handshake: impl Fn(&mut Agent<P>) + Send + Sync + 'static,
        on_close: impl Fn(&AgentInfo) + Send + Sync + 'static,
    ) -> Result<(), GateError>
    where
        P: Send + Sync + 'static,
    {
        let hooks = Hooks {
            codec,
            on_connect: Arc::new(on_connect),
            on_handshake: Some(Arc::new(on_handshake)),
            on_close: Some(Arc::new(on_close)),
        };
        self.start_pair(Transport::Ws, Transport::Wss, hooks).await
    }

    async fn start_pair<P>(
        &self,
        plain: Transport,
        secured: Transport,
        hooks: Hooks<P>,
    ) -> Result<(), GateError>
    where
        P: Send + Sync + 'static,
    {
        if let Some(addr) = self.addr_for(plain) {
            self.start_one(plain, &addr, None, hooks.clone()).await?;
        }
        if let Some(addr) = self.addr_for(secured) {
            let tls_config = self
                .config
                .listener
                .tls
                .as_ref()
                .ok_or(GateError::MissingTlsConfig(secured))?;
            let acceptor = tls::load_acceptor(tls_config)?;
            self.start_one(secured, &addr, Some(acceptor), hooks).await?;
        }
        Ok(())
    }

    async fn start_one<P>(
        &self,
        transport: Transport,
        addr: &str,
        tls: Option<TlsAcceptor>,
        hooks: Hooks<P>,
    ) -> Result<(), GateError>
    where
        P: Send + Sync + 'static,
    {
        let handle = listener::start(
            transport,
            addr,
            tls,
            self.admission.clone(),
            self.tracker.clone(),
            hooks,
        )
        .await?;
        self.listeners.lock().await.push(handle);
        Ok(())
    }

    fn addr_for(&self, transport: Transport) -> Option<String> {
        let listener = &self.config.listener;
        let addr = match transport {
            Transport::Tcp => &listener.tcp_addr,
            Transport::Tls => &listener.tls_addr,
            Transport::Ws => &listener.ws_addr,
            Transport::Wss => &listener.wss_addr,
        };
        addr.as_ref().filter(|a| !a.is_empty()).cloned()
    }

    /// Bound address of a started listener, if that transport was
    /// configured.
    pub async fn local_addr(&self, transport: Transport) -> Option<SocketAddr> {
        self.listeners
            .lock()
            .await
            .iter()
            .find(|handle| handle.transport() == transport)
            .map(|handle| handle.local_addr())
    }

    /// Connections admitted and not yet fully torn down.
    pub fn active_connections(&self) -> u64 {
        self.tracker.outstanding()
    }

    pub fn admission_stats(&self) -> AdmissionStats {
        self.admission.stats()
    }

    /// Stop accepting, force-close every registered connection, and block
    /// until all teardown callbacks have run.
    ///
    /// The order matters: listeners close first so no new admission can
    /// begin, registered connections are force-closed second, and the drain
    /// wait runs last and without the admission lock, since in-flight close
    /// callbacks need that lock to release their slots.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down");

        let handles: Vec<ListenerHandle> = self.listeners.lock().await.drain(..).collect();
        for handle in handles {
            handle.close().await;
        }

        let closed = self.admission.force_close_all();
        if closed > 0 {
            tracing::info!(connections = closed, "force-closed remaining connections");
        }

        self.tracker.wait_until_drained().await;
        tracing::info!("shutdown complete");
    }
}
