//! An embeddable SOCKS5 proxy server
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT with full-duplex relaying
//!     - No Authentication
//!     - Username/Password Authentication through a pluggable async hook
//!     - Pluggable async connection filter consulted before every outbound dial
//!     - Observation events for every step of a session
//!     - BIND and UDP ASSOCIATE are acknowledged but not carried out
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! ## Compatibility note
//!
//! The reply to a request is the request frame itself with REP overwritten,
//! so BND.ADDR/BND.PORT echo the requested destination instead of the
//! relay's bound address.
//!
//! # Example
//! ```no_run
//! use socks5_relay::{ServerConfig, Socks5Server, auth::UserPass};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::new().with_auth(Some(UserPass {
//!         username: "foo".to_string(),
//!         password: "bar".to_string(),
//!     }));
//!     let listener = TcpListener::bind("127.0.0.1:1080").await?;
//!     Socks5Server::new(config).serve(listener).await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod codec;
pub mod connector;
pub mod error;
pub mod event;
pub mod filter;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use auth::{Authenticate, UserPass};
pub use connector::{Connector, TcpConnector};
pub use event::{Event, EventSink, Observers};
pub use filter::ConnectionFilter;
pub use protocol::{AddressType, AuthMethod, Command, ReplyCode, Version};
pub use registry::{SessionId, SessionRegistry};
pub use server::{ServerConfig, Socks5Server};
pub use session::{ClientInfo, Stage};
