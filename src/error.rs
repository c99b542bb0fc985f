use std::io;

use thiserror::Error;

use crate::protocol::ReplyCode;

/// DecodeError is returned when a protocol frame cannot be decoded
/// from the bytes the client sent
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame truncated: needed {needed} more byte(s) for {field}")]
    Truncated { field: &'static str, needed: usize },

    #[error("unexpected version {found:#04x} (expected {expected:#04x})")]
    Version { expected: u8, found: u8 },

    #[error("address type {0:#04x} not supported")]
    AddressType(u8),
}

impl DecodeError {
    /// reply_code is the REP value sent back for a connect request that
    /// failed to decode
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            DecodeError::AddressType(_) => ReplyCode::AddressTypeNotSupported,
            _ => ReplyCode::GeneralFailure,
        }
    }
}

/// HookError wraps the two ways a user-supplied hook can fail
#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Rejected(#[from] anyhow::Error),

    #[error("hook panicked: {0}")]
    Panicked(String),
}

/// ProxyError is reported through the `ProxyError` event
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("client socket error: {0}")]
    Client(#[source] io::Error),

    #[error("failed to connect to {address}:{port} (atyp {atyp:#04x}): {source}")]
    Outbound {
        address: String,
        atyp: u8,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("relay error: {0}")]
    Relay(#[source] io::Error),
}
