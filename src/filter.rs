use anyhow::Result;
use async_trait::async_trait;

use crate::session::ClientInfo;

/// ConnectionFilter decides whether a CONNECT destination may be dialed.
/// Returning an error denies the connection; no outbound attempt is made.
#[async_trait]
pub trait ConnectionFilter: Send + Sync {
    async fn allow(&self, port: u16, address: &str, client: &ClientInfo) -> Result<()>;
}

/// AllowAll is used when no filter is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl ConnectionFilter for AllowAll {
    async fn allow(&self, _: u16, _: &str, _: &ClientInfo) -> Result<()> {
        // keep the same suspension point a real filter would introduce
        tokio::task::yield_now().await;
        Ok(())
    }
}
