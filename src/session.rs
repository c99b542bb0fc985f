//! Per-connection SOCKS5 state machine.
//!
//! ```text
//! HANDSHAKE -> [AUTH] -> REQUEST -> CONNECTING -> RELAYING -> CLOSED
//! ```
//!
//! Every stage decodes one chunk read from the client. Any failure writes
//! the matching reply and moves straight to CLOSED.

use anyhow::Result;
use bytes::{Buf, BytesMut};
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, info, warn};

use crate::auth::select_auth_method;
use crate::codec::{
    AuthRequest, ConnectRequest, HandshakeRequest, auth_reply, connect_reply, method_reply,
};
use crate::connector::reply_code_for;
use crate::error::{HookError, ProxyError};
use crate::event::{Destination, EndContext, Event, Observers, OutboundInfo};
use crate::filter::{AllowAll, ConnectionFilter};
use crate::protocol::{AuthMethod, AuthStatus, Command, ReplyCode, Version};
use crate::registry::{Registration, SessionId, SessionRegistry};
use crate::relay::Relay;
use crate::server::ServerConfig;

/// Largest single read while negotiating. Every negotiation frame fits.
const CHUNK_SIZE: usize = 1024;

/// Bytes buffered from a client while a hook or dial is pending
const MAX_PENDING: usize = 64 * 1024;

/// Stage is where a session currently is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Handshake,
    Auth,
    Request,
    Connecting,
    Relaying,
    Closed,
}

/// ClientInfo is what hooks and observers get to know about the client
/// connection; the socket itself stays owned by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: SessionId,
    pub peer_addr: Option<SocketAddr>,
}

impl ClientInfo {
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: SessionId::next(),
            peer_addr,
        }
    }

    /// detached describes a client with no known address, such as an
    /// in-memory stream
    pub fn detached() -> Self {
        Self::new(None)
    }
}

/// Waited is the outcome of a suspension point raced against the client
/// hanging up
enum Waited<T> {
    Done(T),
    Closed(io::Result<()>),
}

pub struct Session<S> {
    stream: S,
    client: ClientInfo,
    stage: Stage,
    buffer: BytesMut,
    frame: BytesMut,
    request: Option<ConnectRequest>,
    outbound: Option<TcpStream>,
    last_code: Option<u8>,
    config: Arc<ServerConfig>,
    observers: Arc<Observers>,
    registry: SessionRegistry,
    registration: Option<Registration>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        client: ClientInfo,
        config: Arc<ServerConfig>,
        observers: Arc<Observers>,
        registry: SessionRegistry,
    ) -> Self {
        Self {
            stream,
            client,
            stage: Stage::Handshake,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            frame: BytesMut::new(),
            request: None,
            outbound: None,
            last_code: None,
            config,
            observers,
            registry,
            registration: None,
        }
    }

    /// run drives the session to completion. `ProxyEnd` is emitted exactly
    /// once and the session leaves the registry however it ended.
    pub async fn run(mut self) -> Result<()> {
        let outcome = match self.drive().await {
            Ok(()) => Ok(()),
            Err(error) => {
                let error = Arc::new(error);
                self.observers.emit(Event::ProxyError {
                    error: Arc::clone(&error),
                });
                Err(anyhow::Error::new(error))
            }
        };

        self.observers.emit(Event::ProxyEnd {
            code: self.last_code,
            context: EndContext {
                session: self.client.id,
                stage: self.stage,
                request: self.request.take(),
            },
        });

        debug!(stage = ?self.stage, code = ?self.last_code, "session closed");
        self.stage = Stage::Closed;
        self.registration.take();
        self.outbound.take();

        outcome
    }

    async fn drive(&mut self) -> Result<(), ProxyError> {
        loop {
            let next = match self.stage {
                Stage::Handshake => self.handshake().await?,
                Stage::Auth => self.authenticate().await?,
                Stage::Request => self.request().await?,
                Stage::Connecting => self.connect().await?,
                Stage::Relaying => self.relay().await?,
                Stage::Closed => return Ok(()),
            };

            // stay on the last active stage so ProxyEnd can report it
            if next == Stage::Closed {
                return Ok(());
            }

            debug!("{:?} -> {:?}", self.stage, next);
            self.stage = next;
        }
    }

    async fn handshake(&mut self) -> Result<Stage, ProxyError> {
        if !self.fill().await? {
            return Ok(self.client_gone());
        }

        let hello = match HandshakeRequest::decode(&self.buffer) {
            Ok((hello, used)) => {
                self.buffer.advance(used);
                hello
            }
            Err(e) => {
                warn!("invalid handshake: {e}");
                return self.finish(&method_reply(ReplyCode::GeneralFailure as u8)).await;
            }
        };

        let method = select_auth_method(&hello, self.config.authenticator.is_some());
        if method == AuthMethod::NoAcceptable {
            info!("no acceptable auth method among {:?}", hello.methods);
            return self.finish(&method_reply(method as u8)).await;
        }

        self.send(&method_reply(method as u8)).await?;
        self.observers.emit(Event::Handshake {
            client: self.client.clone(),
        });

        Ok(match method {
            AuthMethod::UserPass => Stage::Auth,
            _ => Stage::Request,
        })
    }

    async fn authenticate(&mut self) -> Result<Stage, ProxyError> {
        if !self.fill().await? {
            return Ok(self.client_gone());
        }

        let request = match AuthRequest::decode(&self.buffer) {
            Ok((request, used)) => {
                self.frame = self.buffer.split_to(used);
                request
            }
            Err(e) => {
                warn!("invalid auth request: {e}");
                self.frame = self.buffer.split();
                return self.finish(&auth_reply(AuthStatus::Failure)).await;
            }
        };

        let Some(authenticator) = self.config.authenticator.clone() else {
            return self.finish(&auth_reply(AuthStatus::Failure)).await;
        };

        let verdict = select! {
            v = guarded(authenticator.authenticate(
                &request.username,
                &request.password,
                &self.client,
            )) => Waited::Done(v),
            r = until_closed(&mut self.stream, &mut self.buffer) => Waited::Closed(r),
        };

        match verdict {
            Waited::Closed(r) => self.closed_while_waiting(r),
            Waited::Done(Ok(())) => {
                info!("user '{}' authenticated", request.username);
                self.observers.emit(Event::Authenticate {
                    username: request.username,
                });
                self.send(&auth_reply(AuthStatus::Success)).await?;
                Ok(Stage::Request)
            }
            Waited::Done(Err(error)) => {
                warn!("authentication failed for '{}': {error}", request.username);
                self.observers.emit(Event::AuthenticateError {
                    username: request.username,
                    error: Arc::new(error),
                });
                self.finish(&auth_reply(AuthStatus::Failure)).await
            }
        }
    }

    async fn request(&mut self) -> Result<Stage, ProxyError> {
        if !self.fill().await? {
            return Ok(self.client_gone());
        }

        if self.buffer.first() == Some(&(Version::Socks5 as u8)) {
            self.registration = Some(self.registry.register(self.client.id));
        }

        let request = match ConnectRequest::decode(&self.buffer) {
            Ok((request, used)) => {
                self.frame = self.buffer.split_to(used);
                request
            }
            Err(e) => {
                warn!("invalid request: {e}");
                self.frame = self.buffer.split();
                let reply = connect_reply(&self.frame, e.reply_code());
                return self.finish(&reply).await;
            }
        };

        info!(
            "request cmd={:#04x} for {}:{}",
            request.command, request.address, request.port
        );

        let code = match Command::from_byte(request.command) {
            Some(Command::Connect) => {
                self.request = Some(request);
                return Ok(Stage::Connecting);
            }
            // acknowledged without being carried out
            Some(Command::Bind | Command::UdpAssociate) => ReplyCode::Succeeded,
            None => ReplyCode::CommandNotSupported,
        };

        self.request = Some(request);
        let reply = connect_reply(&self.frame, code);
        self.finish(&reply).await
    }

    async fn connect(&mut self) -> Result<Stage, ProxyError> {
        let Some(request) = self.request.clone() else {
            let reply = connect_reply(&self.frame, ReplyCode::GeneralFailure);
            return self.finish(&reply).await;
        };

        let filter: Arc<dyn ConnectionFilter> = match &self.config.connection_filter {
            Some(filter) => Arc::clone(filter),
            None => Arc::new(AllowAll),
        };

        let verdict = select! {
            v = guarded(filter.allow(request.port, &request.address, &self.client)) => {
                Waited::Done(v)
            }
            r = until_closed(&mut self.stream, &mut self.buffer) => Waited::Closed(r),
        };

        match verdict {
            Waited::Closed(r) => return self.closed_while_waiting(r),
            Waited::Done(Ok(())) => (),
            Waited::Done(Err(error)) => {
                info!("connection to {}:{} denied: {error}", request.address, request.port);
                self.observers.emit(Event::ConnectionFilter {
                    port: request.port,
                    address: request.address,
                    error: Arc::new(error),
                });
                let reply = connect_reply(&self.frame, ReplyCode::ConnectionNotAllowed);
                return self.finish(&reply).await;
            }
        }

        let connector = Arc::clone(&self.config.connector);
        let dialed = select! {
            c = connector.connect(&request.address, request.port) => Waited::Done(c),
            r = until_closed(&mut self.stream, &mut self.buffer) => Waited::Closed(r),
        };

        let outbound = match dialed {
            Waited::Closed(r) => return self.closed_while_waiting(r),
            Waited::Done(Ok(outbound)) => outbound,
            Waited::Done(Err(source)) => {
                let code = reply_code_for(&source);
                warn!(
                    "failed to connect to {}:{}: {source} (replying {code:?})",
                    request.address, request.port
                );
                self.observers.emit(Event::ProxyError {
                    error: Arc::new(ProxyError::Outbound {
                        address: request.address,
                        atyp: request.atyp,
                        port: request.port,
                        source,
                    }),
                });
                let reply = connect_reply(&self.frame, code);
                return self.finish(&reply).await;
            }
        };

        let reply = connect_reply(&self.frame, ReplyCode::Succeeded);
        self.last_code = Some(ReplyCode::Succeeded as u8);
        self.send(&reply).await?;

        info!("connected to {}:{}", request.address, request.port);
        self.observers.emit(Event::ProxyConnect {
            destination: Destination {
                host: request.address,
                port: request.port,
            },
            outbound: OutboundInfo {
                local_addr: outbound.local_addr().ok(),
                peer_addr: outbound.peer_addr().ok(),
            },
        });

        self.outbound = Some(outbound);
        Ok(Stage::Relaying)
    }

    async fn relay(&mut self) -> Result<Stage, ProxyError> {
        let Some(mut outbound) = self.outbound.take() else {
            return Ok(Stage::Closed);
        };

        // anything the client sent right behind its request
        if !self.buffer.is_empty() {
            outbound
                .write_all(&self.buffer)
                .await
                .map_err(ProxyError::Relay)?;
            self.buffer.clear();
        }

        let relay = Relay {
            inbound: &mut self.stream,
            outbound,
        };
        relay
            .run(&self.observers)
            .await
            .map_err(ProxyError::Relay)?;

        Ok(Stage::Closed)
    }

    /// fill makes sure there are unread client bytes, reading one chunk if
    /// the buffer is empty. Returns false once the client has closed.
    async fn fill(&mut self) -> Result<bool, ProxyError> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }

        self.buffer.reserve(CHUNK_SIZE);
        let n = self
            .stream
            .read_buf(&mut self.buffer)
            .await
            .map_err(ProxyError::Client)?;
        Ok(n > 0)
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProxyError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(ProxyError::Client)
    }

    /// finish writes the terminal reply and half-closes the client socket
    async fn finish(&mut self, reply: &[u8]) -> Result<Stage, ProxyError> {
        self.last_code = reply.get(1).copied();
        self.send(reply).await?;

        // the peer may already be gone; the socket is dropped either way
        let _ = self.stream.shutdown().await;
        Ok(Stage::Closed)
    }

    fn client_gone(&self) -> Stage {
        debug!("client closed the connection during {:?}", self.stage);
        Stage::Closed
    }

    fn closed_while_waiting(&self, result: io::Result<()>) -> Result<Stage, ProxyError> {
        result.map_err(ProxyError::Client)?;
        Ok(self.client_gone())
    }
}

/// guarded runs a user hook and folds both an `Err` and a panic into a
/// HookError
async fn guarded<F>(hook: F) -> Result<(), HookError>
where
    F: Future<Output = Result<()>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result.map_err(HookError::Rejected),
        Err(payload) => Err(HookError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// until_closed buffers whatever the client sends while the session is
/// parked and resolves once the client hangs up. A client that sends more
/// than MAX_PENDING bytes before getting a reply is cut off.
async fn until_closed<S>(stream: &mut S, buffer: &mut BytesMut) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    loop {
        if buffer.len() >= MAX_PENDING {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("client sent more than {MAX_PENDING} bytes before a reply"),
            ));
        }

        buffer.reserve(CHUNK_SIZE);
        if stream.read_buf(buffer).await? == 0 {
            return Ok(());
        }
    }
}
