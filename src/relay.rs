use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, info};

use crate::event::{Event, Observers};

const RELAY_BUFFER: usize = 16 * 1024;

/// Relay holds both legs of an established CONNECT
pub struct Relay<S> {
    pub inbound: S,
    pub outbound: TcpStream,
}

/// Relay implementation block
impl<S> Relay<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// run copies bytes in both directions until either side closes or
    /// fails, then tears down both legs. Every chunk read from the
    /// destination is also reported as a `ProxyData` event.
    pub async fn run(self, observers: &Observers) -> io::Result<(u64, u64)> {
        let (mut client_rd, mut client_wr) = tokio::io::split(self.inbound);
        let (mut server_rd, mut server_wr) = self.outbound.into_split();

        let mut from_client = 0u64;
        let mut from_server = 0u64;

        let upstream = async {
            let mut buf = vec![0u8; RELAY_BUFFER];
            loop {
                let n = client_rd.read(&mut buf).await?;
                if n == 0 {
                    debug!("client closed its side");
                    break;
                }
                server_wr.write_all(&buf[..n]).await?;
                from_client += n as u64;
            }
            server_wr.shutdown().await
        };

        let downstream = async {
            let mut buf = vec![0u8; RELAY_BUFFER];
            loop {
                let n = server_rd.read(&mut buf).await?;
                if n == 0 {
                    debug!("destination closed its side");
                    break;
                }
                observers.emit(Event::ProxyData {
                    data: Bytes::copy_from_slice(&buf[..n]),
                });
                client_wr.write_all(&buf[..n]).await?;
                from_server += n as u64;
            }
            client_wr.shutdown().await
        };

        // whichever direction finishes first ends the relay; dropping the
        // other half closes its socket
        let result = select! {
            r = upstream => r,
            r = downstream => r,
        };

        // DEBUG
        info!(
            "connection closed: {} bytes from client, {} bytes from server",
            from_client, from_server
        );

        result.map(|()| (from_client, from_server))
    }
}
