use crate::{
    auth::{Authenticate, UserPass},
    connector::{Connector, TcpConnector},
    event::Observers,
    filter::ConnectionFilter,
    registry::SessionRegistry,
    session::{ClientInfo, Session},
};
use anyhow::Result;
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tracing::{Instrument, error, info, info_span};

/// ServerConfig holds the hooks every session consults. It is fixed once
/// the server is built and shared by reference with each session.
#[derive(Clone)]
pub struct ServerConfig {
    pub authenticator: Option<Arc<dyn Authenticate>>,
    pub connection_filter: Option<Arc<dyn ConnectionFilter>>,
    pub connector: Arc<dyn Connector>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            authenticator: None,
            connection_filter: None,
            connector: Arc::new(TcpConnector),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// with_auth applies static username/password credentials, or clears
    /// authentication when given `None`
    pub fn with_auth(mut self, auth: Option<UserPass>) -> Self {
        self.authenticator = auth.map(|creds| Arc::new(creds) as Arc<dyn Authenticate>);
        self
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticate + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    pub fn with_connection_filter(mut self, filter: impl ConnectionFilter + 'static) -> Self {
        self.connection_filter = Some(Arc::new(filter));
        self
    }

    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("authenticate", &self.authenticator.is_some())
            .field("connection_filter", &self.connection_filter.is_some())
            .finish_non_exhaustive()
    }
}

/// Socks5Server runs sessions over connections handed to it by an
/// already-bound listener
#[derive(Debug, Clone)]
pub struct Socks5Server {
    config: Arc<ServerConfig>,
    observers: Arc<Observers>,
    registry: SessionRegistry,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            observers: Arc::new(Observers::new()),
            registry: SessionRegistry::new(),
        }
    }

    /// with_observers replaces the event fan-out sessions report to
    pub fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = Arc::new(observers);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn observers(&self) -> &Observers {
        &self.observers
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// serve accepts connections from `listener` and runs one session per
    /// connection on its own task. A failing session never stops the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        // DEBUG
        info!("SOCKS5 proxy accepting on {:?}", listener.local_addr()?);

        // Listen for connections to proxy
        loop {
            // Accept incoming connection
            let (inbound, peer_addr) = listener.accept().await?;

            // Clone for this connection
            let server = self.clone();

            // Spawn async task
            tokio::spawn(async move {
                // DEBUG
                info!("new client: {}", peer_addr);

                // Send connection to connection handler
                if let Err(e) = server.handle(inbound, Some(peer_addr)).await {
                    error!("connection error: {:#}", e);
                }
            });
        }
    }

    /// handle runs the full SOCKS5 protocol flow over a single client
    /// stream and returns once the session is closed
    pub async fn handle<S>(&self, stream: S, peer_addr: Option<SocketAddr>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let client = ClientInfo::new(peer_addr);
        let span = info_span!("session", id = %client.id, peer = ?peer_addr);

        let session = Session::new(
            stream,
            client,
            Arc::clone(&self.config),
            Arc::clone(&self.observers),
            self.registry.clone(),
        );

        session.run().instrument(span).await
    }
}
