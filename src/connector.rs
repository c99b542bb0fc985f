use async_trait::async_trait;
use std::io;
use tokio::net::TcpStream;
use tracing::debug;

use crate::protocol::ReplyCode;

/// Connector opens the outbound leg of a CONNECT request
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str, port: u16) -> io::Result<TcpStream>;
}

/// TcpConnector dials the destination directly. Domain names go through
/// the platform resolver at connect time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str, port: u16) -> io::Result<TcpStream> {
        debug!("dialing {address}:{port}");
        TcpStream::connect((address, port)).await
    }
}

/// reply_code_for maps an outbound connect failure onto the REP field.
/// Only refused connections and unreachable/unavailable addresses get a
/// dedicated code; everything else reports an unreachable network.
pub fn reply_code_for(err: &io::Error) -> ReplyCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::HostUnreachable => {
            ReplyCode::HostUnreachable
        }
        _ => ReplyCode::NetworkUnreachable,
    }
}
