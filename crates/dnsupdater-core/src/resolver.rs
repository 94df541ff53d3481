//! Address resolution
//!
//! Turns the address tokens of an [`UpdateRequest`](crate::UpdateRequest)
//! into concrete addresses:
//!
//! - literal addresses are kept as they are
//! - `client` is handed to a context-specific [`ClientResolver`]
//! - anything else is looked up in DNS
//!
//! The result is deduplicated by the address' string form and keeps the
//! order in which addresses were first seen.

use crate::error::{Error, Result};
use crate::request::IpToken;
use crate::traits::ClientResolver;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Name hostname lookup failures are tagged with
const RESOLVER_NAME: &str = "Resolver";

/// Deduplicated, insertion-ordered set of addresses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAddressSet {
    addresses: Vec<IpAddr>,
    seen: HashSet<String>,
}

impl ResolvedAddressSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address; returns `false` when it was already present
    pub fn insert(&mut self, address: IpAddr) -> bool {
        if !self.seen.insert(address.to_string()) {
            return false;
        }
        self.addresses.push(address);
        true
    }

    /// Addresses in insertion order
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Addresses as tokens, for a downstream request
    pub fn to_tokens(&self) -> Vec<IpToken> {
        self.addresses.iter().copied().map(IpToken::Address).collect()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl Extend<IpAddr> for ResolvedAddressSet {
    fn extend<I: IntoIterator<Item = IpAddr>>(&mut self, iter: I) {
        for address in iter {
            self.insert(address);
        }
    }
}

impl FromIterator<IpAddr> for ResolvedAddressSet {
    fn from_iter<I: IntoIterator<Item = IpAddr>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Hostname lookup used for tokens that are neither addresses nor `client`
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// All addresses of `host`
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Hostname lookup through the system's DNS configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDnsLookup;

#[async_trait]
impl HostLookup for SystemDnsLookup {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::transport(RESOLVER_NAME, format!("No resolver configuration: {}", e)))?;

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::transport(RESOLVER_NAME, format!("Failed to resolve '{}': {}", host, e)))?;

        Ok(response.iter().collect())
    }
}

/// Resolves `client` to the non-loopback addresses of the local interfaces
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalInterfaces;

#[async_trait]
impl ClientResolver for LocalInterfaces {
    async fn resolve_client(&self) -> Result<Vec<IpAddr>> {
        let interfaces = if_addrs::get_if_addrs()?;

        // IpAddr carries no zone index, so link-local scopes are already gone
        Ok(interfaces
            .into_iter()
            .filter(|interface| !interface.is_loopback())
            .map(|interface| interface.ip())
            .collect())
    }
}

/// Resolves `client` to one fixed address, e.g. the remote peer of a connection
#[derive(Debug, Clone, Copy)]
pub struct PeerAddress(pub IpAddr);

#[async_trait]
impl ClientResolver for PeerAddress {
    async fn resolve_client(&self) -> Result<Vec<IpAddr>> {
        Ok(vec![self.0])
    }
}

/// Parse an address that may carry a zone suffix (`fe80::1%eth0`)
pub fn parse_scoped_address(text: &str) -> Option<IpAddr> {
    text.split('%').next()?.trim().parse().ok()
}

/// Address resolver for one context
pub struct AddressResolver {
    client: Arc<dyn ClientResolver>,
    hosts: Arc<dyn HostLookup>,
}

impl AddressResolver {
    /// Create a resolver using `client` for the `client` token and DNS for hostnames
    pub fn new(client: Arc<dyn ClientResolver>) -> Self {
        Self {
            client,
            hosts: Arc::new(SystemDnsLookup),
        }
    }

    /// Replace the hostname lookup
    pub fn with_host_lookup(mut self, hosts: Arc<dyn HostLookup>) -> Self {
        self.hosts = hosts;
        self
    }

    /// Resolve every token, in order
    ///
    /// # Errors
    ///
    /// A failing client resolver or hostname lookup fails the whole resolution.
    pub async fn resolve(&self, tokens: &[IpToken]) -> Result<ResolvedAddressSet> {
        let mut resolved = ResolvedAddressSet::new();

        for token in tokens {
            match token {
                IpToken::Address(address) => {
                    resolved.insert(*address);
                }
                IpToken::Client => {
                    let addresses = self.client.resolve_client().await?;
                    tracing::debug!("Resolved client to {:?}", addresses);
                    resolved.extend(addresses);
                }
                IpToken::Host(host) => {
                    let addresses = self.hosts.lookup(host).await?;
                    tracing::debug!("Resolved {} to {:?}", host, addresses);
                    resolved.extend(addresses);
                }
            }
        }

        Ok(resolved)
    }
}
