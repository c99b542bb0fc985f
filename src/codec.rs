//! Stateless encode/decode of the SOCKS5 (RFC 1928) and username/password
//! (RFC 1929) frames. Nothing in here touches a socket.

use anyhow::Result;

use crate::address::{decode_address, encode_address};
use crate::error::DecodeError;
use crate::protocol::{AuthMethod, AuthStatus, RSV, ReplyCode, Version};

/// Reader is a forward-only cursor over a single received chunk. Every
/// read is bounds checked and reports which field ran off the end.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// position is the number of bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16_be(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(2, field)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_be(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(4, field)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                field,
                needed: len - self.remaining(),
            });
        }

        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// version reads a version byte and rejects anything but `expected`
    fn version(&mut self, expected: Version) -> Result<u8, DecodeError> {
        let found = self.u8("VER")?;
        if found != expected as u8 {
            return Err(DecodeError::Version {
                expected: expected as u8,
                found,
            });
        }
        Ok(found)
    }
}

// ClientHello format
// +----+----------+----------+
// |VER | NMETHODS | METHODS  |
// +----+----------+----------+
// | 1  |    1     | 1 to 255 |
// +----+----------+----------+

/// HandshakeRequest is the client's method negotiation message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub version: u8,
    pub methods: Vec<u8>,
}

impl HandshakeRequest {
    /// decode parses a handshake from `buf`, returning the request and the
    /// number of bytes it occupied
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = Reader::new(buf);
        let version = reader.version(Version::Socks5)?;
        let n_methods = reader.u8("NMETHODS")?;
        let methods = reader.take(n_methods as usize, "METHODS")?.to_vec();

        Ok((Self { version, methods }, reader.position()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.methods.len());
        out.push(self.version);
        out.push(self.methods.len() as u8);
        out.extend_from_slice(&self.methods);
        out
    }

    pub fn offers(&self, method: AuthMethod) -> bool {
        self.methods.contains(&(method as u8))
    }
}

// Client Username/Password Request
// +----+------+----------+------+----------+
// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
// +----+------+----------+------+----------+
// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
// +----+------+----------+------+----------+

/// AuthRequest is the RFC 1929 username/password request
#[derive(Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub version: u8,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("version", &self.version)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AuthRequest {
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = Reader::new(buf);
        let version = reader.version(Version::UserPass)?;
        let ulen = reader.u8("ULEN")?;
        let username = String::from_utf8_lossy(reader.take(ulen as usize, "UNAME")?).into_owned();
        let plen = reader.u8("PLEN")?;
        let password = String::from_utf8_lossy(reader.take(plen as usize, "PASSWD")?).into_owned();

        Ok((
            Self {
                version,
                username,
                password,
            },
            reader.position(),
        ))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.username.len() + self.password.len());
        out.push(self.version);
        out.push(self.username.len() as u8);
        out.extend_from_slice(self.username.as_bytes());
        out.push(self.password.len() as u8);
        out.extend_from_slice(self.password.as_bytes());
        out
    }
}

// SOCKS5 request format
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+

/// ConnectRequest is a decoded SOCKS5 request. `address` is the textual
/// destination produced by the address decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub version: u8,
    pub command: u8,
    pub atyp: u8,
    pub address: String,
    pub port: u16,
}

impl ConnectRequest {
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut reader = Reader::new(buf);
        let version = reader.version(Version::Socks5)?;
        let command = reader.u8("CMD")?;
        let _rsv = reader.u8("RSV")?;
        let atyp = reader.u8("ATYP")?;
        let (address, port) = decode_address(atyp, &mut reader)?;

        Ok((
            Self {
                version,
                command,
                atyp,
                address,
                port,
            },
            reader.position(),
        ))
    }

    /// encode writes the request back out. IP address types require
    /// `address` to parse as an address of that family.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.version, self.command, RSV, self.atyp];
        encode_address(self.atyp, &self.address, &mut out)?;
        out.extend_from_slice(&self.port.to_be_bytes());
        Ok(out)
    }
}

// ServerChoice method selection reply format
// +----+--------+
// |VER | METHOD |
// +----+--------+
// | 1  |   1    |
// +----+--------+

/// method_reply builds the server's handshake answer. Handshake failures
/// reuse this frame with the failure code in place of the method.
pub fn method_reply(method: u8) -> [u8; 2] {
    [Version::Socks5 as u8, method]
}

// Username/Password Server response
// +----+--------+
// |VER | STATUS |
// +----+--------+
// | 1  |   1    |
// +----+--------+

pub fn auth_reply(status: AuthStatus) -> [u8; 2] {
    [Version::UserPass as u8, status as u8]
}

// SOCKS5 reply format
// +----+-----+-------+------+----------+----------+
// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+

/// connect_reply builds the terminal reply to a request by copying the
/// request frame and overwriting REP. The destination from the request is
/// echoed as BND.ADDR/BND.PORT; the relay's own bound address is never sent.
pub fn connect_reply(request: &[u8], code: ReplyCode) -> Vec<u8> {
    if request.len() < 2 {
        return method_reply(code as u8).to_vec();
    }

    let mut reply = request.to_vec();
    reply[1] = code as u8;
    reply
}
