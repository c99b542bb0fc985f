#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use socks5_relay::{Connector, Event, Observers, ServerConfig, Socks5Server, TcpConnector};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Harness runs one session over an in-memory pipe
pub struct Harness {
    pub client: DuplexStream,
    pub events: UnboundedReceiver<Event>,
    pub server: Socks5Server,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl Harness {
    pub fn start(config: ServerConfig) -> Self {
        init_tracing();

        let (tx, events) = unbounded_channel();
        let server = Socks5Server::new(config).with_observers(Observers::new().with(tx));
        let (client, proxy_side) = tokio::io::duplex(64 * 1024);

        let session_server = server.clone();
        let task = tokio::spawn(async move { session_server.handle(proxy_side, None).await });

        Self {
            client,
            events,
            server,
            task,
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.client.write_all(bytes).await.unwrap();
    }

    pub async fn recv(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.client.read_exact(&mut buf).await.unwrap();
        buf
    }

    /// assert_closed checks that the proxy closed its side without sending
    /// anything else
    pub async fn assert_closed(&mut self) {
        let mut rest = Vec::new();
        self.client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected trailing bytes: {rest:?}");
    }

    /// finish waits for the session task and returns every event it emitted
    pub async fn finish(mut self) -> Vec<Event> {
        drop(self.client);
        let _ = self.task.await.unwrap();
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn hello(methods: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x05, methods.len() as u8];
    buf.extend_from_slice(methods);
    buf
}

pub fn userpass(username: &str, password: &str) -> Vec<u8> {
    let mut buf = vec![0x01, username.len() as u8];
    buf.extend_from_slice(username.as_bytes());
    buf.push(password.len() as u8);
    buf.extend_from_slice(password.as_bytes());
    buf
}

pub fn request_ipv4(command: u8, addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V4(v4) = addr else {
        panic!("expected an IPv4 address, got {addr}");
    };
    let mut buf = vec![0x05, command, 0x00, 0x01];
    buf.extend_from_slice(&v4.ip().octets());
    buf.extend_from_slice(&v4.port().to_be_bytes());
    buf
}

pub fn request_domain(command: u8, host: &str, port: u16) -> Vec<u8> {
    let mut buf = vec![0x05, command, 0x00, 0x03, host.len() as u8];
    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

pub fn request_ipv6(command: u8, addr: SocketAddr) -> Vec<u8> {
    let SocketAddr::V6(v6) = addr else {
        panic!("expected an IPv6 address, got {addr}");
    };
    let mut buf = vec![0x05, command, 0x00, 0x04];
    buf.extend_from_slice(&v6.ip().octets());
    buf.extend_from_slice(&v6.port().to_be_bytes());
    buf
}

/// echo_server accepts any number of connections and writes back whatever
/// it reads
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    spawn_echo(listener)
}

/// echo_server_v6 is echo_server on the IPv6 loopback, if the host has one
pub async fn echo_server_v6() -> Option<SocketAddr> {
    let listener = TcpListener::bind("[::1]:0").await.ok()?;
    Some(spawn_echo(listener))
}

fn spawn_echo(listener: TcpListener) -> SocketAddr {
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });

    addr
}

/// closed_port returns a loopback address nobody is listening on
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// CountingConnector dials for real and counts the attempts
#[derive(Clone, Default)]
pub struct CountingConnector {
    pub attempts: Arc<AtomicUsize>,
}

impl CountingConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, address: &str, port: u16) -> io::Result<TcpStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        TcpConnector.connect(address, port).await
    }
}

/// FailingConnector always fails with the configured error kind
#[derive(Clone)]
pub struct FailingConnector {
    pub kind: io::ErrorKind,
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _: &str, _: u16) -> io::Result<TcpStream> {
        Err(io::Error::from(self.kind))
    }
}
