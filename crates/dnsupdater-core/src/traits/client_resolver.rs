// # Client Resolver Trait
//
// "client" in an IP list means "whoever is asking". What that resolves to
// depends on where the request is being handled:
//
// - Local command line: the non-loopback addresses of the local interfaces
// - Inbound HTTP listener: the remote peer address of the connection
// - SSH tunnel: the address the SSH server sees the session coming from

use crate::error::Result;
use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for context-specific resolution of the `client` token
#[async_trait]
pub trait ClientResolver: Send + Sync {
    /// Addresses the `client` token stands for in this context
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<IpAddr>)`: Zero or more addresses
    /// - `Err(Error)`: If the context could not be queried
    async fn resolve_client(&self) -> Result<Vec<IpAddr>>;
}
