use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::codec::HandshakeRequest;
use crate::protocol::AuthMethod;
use crate::session::ClientInfo;

/// Authenticate is the hook consulted during RFC 1929 subnegotiation.
/// Returning an error rejects the client.
#[async_trait]
pub trait Authenticate: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str, client: &ClientInfo)
    -> Result<()>;
}

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for UserPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticate for UserPass {
    async fn authenticate(&self, username: &str, password: &str, _: &ClientInfo) -> Result<()> {
        if username != self.username || password != self.password {
            bail!("invalid credentials for user '{username}'");
        }
        Ok(())
    }
}

/// select_auth_method picks the method the server answers the handshake
/// with. A configured authenticator forces username/password regardless of
/// what the client offered; otherwise the client must offer no-auth.
pub fn select_auth_method(request: &HandshakeRequest, auth_required: bool) -> AuthMethod {
    if auth_required {
        AuthMethod::UserPass
    } else if request.offers(AuthMethod::NoAuth) {
        AuthMethod::NoAuth
    } else {
        AuthMethod::NoAcceptable
    }
}
