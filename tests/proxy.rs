mod common;

use std::net::SocketAddr;
use std::time::Duration;

use socks5_relay::{Event, Observers, ServerConfig, Socks5Server, UserPass};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::timeout;

use common::*;

async fn spawn_proxy(server: Socks5Server) -> SocketAddr {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

async fn greet(stream: &mut TcpStream, username: &str, password: &str) {
    stream.write_all(&hello(&[0x00, 0x02])).await.unwrap();
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x02]);

    stream.write_all(&userpass(username, password)).await.unwrap();
}

#[tokio::test]
async fn authenticated_tcp_proxying() {
    let echo = echo_server().await;
    let (tx, mut events) = unbounded_channel();
    let config = ServerConfig::new().with_auth(Some(UserPass {
        username: "foo".into(),
        password: "bar".into(),
    }));
    let server = Socks5Server::new(config).with_observers(Observers::new().with(tx));
    let registry = server.registry().clone();
    let proxy = spawn_proxy(server).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    greet(&mut client, "foo", "bar").await;
    let mut status = [0u8; 2];
    client.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0x00]);

    let request = request_ipv4(0x01, echo);
    client.write_all(&request).await.unwrap();
    let mut reply = vec![0u8; request.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let (mut rd, mut wr) = client.into_split();
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&payload).await.unwrap();
        wr
    });

    let mut echoed = vec![0u8; expected.len()];
    timeout(Duration::from_secs(5), rd.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, expected);

    let wr = writer.await.unwrap();
    drop(wr);
    drop(rd);

    let end = timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(Event::ProxyEnd { code, .. }) => return code,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(end, Some(0x00));

    timeout(Duration::from_secs(2), async {
        while !registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn bad_password_keeps_listener_running() {
    let echo = echo_server().await;
    let config = ServerConfig::new().with_auth(Some(UserPass {
        username: "foo".into(),
        password: "bar".into(),
    }));
    let proxy = spawn_proxy(Socks5Server::new(config)).await;

    let mut rejected = TcpStream::connect(proxy).await.unwrap();
    greet(&mut rejected, "foo", "wrong").await;
    let mut status = [0u8; 2];
    rejected.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0xFF]);
    assert_eq!(rejected.read(&mut status).await.unwrap(), 0);

    let mut accepted = TcpStream::connect(proxy).await.unwrap();
    greet(&mut accepted, "foo", "bar").await;
    accepted.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [0x01, 0x00]);

    let request = request_domain(0x01, "127.0.0.1", echo.port());
    accepted.write_all(&request).await.unwrap();
    let mut reply = vec![0u8; request.len()];
    accepted.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    accepted.write_all(b"still serving").await.unwrap();
    let mut buf = [0u8; 13];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still serving");
}

#[tokio::test]
async fn destination_closing_closes_client() {
    // accepts, sends a greeting, then hangs up
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"bye").await.unwrap();
    });

    let proxy = spawn_proxy(Socks5Server::new(ServerConfig::new())).await;
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(&hello(&[0x00])).await.unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    let request = request_ipv4(0x01, target);
    client.write_all(&request).await.unwrap();
    let mut reply = vec![0u8; request.len()];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest, b"bye");
}
