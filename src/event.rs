//! Observation surface. Sessions report what happens to them here; sinks
//! never influence the protocol flow.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc::UnboundedSender;

use crate::codec::ConnectRequest;
use crate::error::{HookError, ProxyError};
use crate::registry::SessionId;
use crate::session::{ClientInfo, Stage};

/// Destination is the host/port a CONNECT request asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

/// OutboundInfo describes the established outbound socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundInfo {
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

/// EndContext accompanies the final event of a session
#[derive(Debug, Clone)]
pub struct EndContext {
    pub session: SessionId,
    pub stage: Stage,
    pub request: Option<ConnectRequest>,
}

#[derive(Debug, Clone)]
pub enum Event {
    Handshake {
        client: ClientInfo,
    },
    Authenticate {
        username: String,
    },
    AuthenticateError {
        username: String,
        error: Arc<HookError>,
    },
    ConnectionFilter {
        port: u16,
        address: String,
        error: Arc<HookError>,
    },
    ProxyConnect {
        destination: Destination,
        outbound: OutboundInfo,
    },
    ProxyData {
        data: Bytes,
    },
    ProxyError {
        error: Arc<ProxyError>,
    },
    /// `code` is the status byte of the last reply written, or `None` when
    /// the client went away before any reply was due
    ProxyEnd {
        code: Option<u8>,
        context: EndContext,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

impl EventSink for UnboundedSender<Event> {
    fn emit(&self, event: &Event) {
        // a dropped receiver just means nobody is listening anymore
        let _ = self.send(event.clone());
    }
}

impl<F> EventSink for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn emit(&self, event: &Event) {
        self(event)
    }
}

/// Observers fans every event out to the subscribed sinks. Subscribing is
/// append-only.
#[derive(Default)]
pub struct Observers {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// with adds a sink while building
    pub fn with(self, sink: impl EventSink + 'static) -> Self {
        self.subscribe(sink);
        self
    }

    pub fn subscribe(&self, sink: impl EventSink + 'static) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, event: Event) {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
        for sink in sinks.iter() {
            sink.emit(&event);
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("sinks", &self.len()).finish()
    }
}
