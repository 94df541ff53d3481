//! Update request model
//!
//! An [`UpdateRequest`] is built per call, handed down the dispatch call
//! stack and dropped once the call returns.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Sentinel token asking the updater to use the caller's own address
pub const CLIENT_TOKEN: &str = "client";

/// Sentinel protocol meaning "use the configured default"
pub const DEFAULT_PROTOCOL: &str = "default";

/// One item of the comma-separated IP list of a target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IpToken {
    /// A literal IPv4 or IPv6 address
    Address(IpAddr),
    /// The `client` sentinel
    Client,
    /// A hostname to be looked up in DNS
    Host(String),
}

impl From<&str> for IpToken {
    fn from(s: &str) -> Self {
        if s == CLIENT_TOKEN {
            return IpToken::Client;
        }
        match s.parse::<IpAddr>() {
            Ok(ip) => IpToken::Address(ip),
            Err(_) => IpToken::Host(s.to_string()),
        }
    }
}

impl FromStr for IpToken {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(IpToken::from(s))
    }
}

impl From<IpAddr> for IpToken {
    fn from(ip: IpAddr) -> Self {
        IpToken::Address(ip)
    }
}

impl fmt::Display for IpToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpToken::Address(ip) => write!(f, "{ip}"),
            IpToken::Client => f.write_str(CLIENT_TOKEN),
            IpToken::Host(host) => f.write_str(host),
        }
    }
}

/// Split a comma-separated IP list into tokens, dropping empty items
pub fn parse_ip_list(list: &str) -> Vec<IpToken> {
    list.split(',')
        .filter(|item| !item.is_empty())
        .map(IpToken::from)
        .collect()
}

/// A single DNS update request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Protocol tag (lowercase), `None` until resolved
    pub protocol: Option<String>,
    /// Server to send the update to
    pub server: Option<String>,
    /// Server port
    pub port: Option<u16>,
    /// User for transports that log in
    pub user: Option<String>,
    /// Fully qualified domain to update
    pub domain: String,
    /// Ordered address tokens
    pub ips: Vec<IpToken>,
    /// Record TTL, for updaters that write records
    pub ttl: Option<u32>,
    /// Downstream request built by indirection updaters
    pub target: Option<Box<UpdateRequest>>,
}

impl UpdateRequest {
    /// Create an empty request with optional caller defaults
    pub fn new(protocol: Option<&str>, server: Option<String>, port: Option<u16>) -> Self {
        Self {
            protocol: protocol.map(|p| p.to_lowercase()),
            server,
            port,
            ..Self::default()
        }
    }

    /// Create a request for `domain` with the given tokens
    pub fn for_domain(domain: impl Into<String>, ips: Vec<IpToken>) -> Self {
        Self {
            domain: domain.into(),
            ips,
            ..Self::default()
        }
    }

    /// Set the protocol tag
    pub fn with_protocol(mut self, protocol: impl AsRef<str>) -> Self {
        self.protocol = Some(protocol.as_ref().to_lowercase());
        self
    }

    /// Set the server and port
    pub fn with_server(mut self, server: impl Into<String>, port: Option<u16>) -> Self {
        self.server = Some(server.into());
        self.port = port;
        self
    }

    /// Start the downstream request of an indirection updater
    ///
    /// The downstream request inherits the domain. Endpoint and addresses are
    /// filled in by the indirection updater once it knows them.
    pub fn start_target(&mut self, protocol: &str) -> &mut UpdateRequest {
        let target = UpdateRequest::for_domain(self.domain.clone(), Vec::new()).with_protocol(protocol);
        self.target.insert(Box::new(target))
    }

    /// The comma-joined IP list, as it appears in a target path
    pub fn ip_list(&self) -> String {
        self.ips
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_kinds() {
        assert_eq!(
            "10.0.0.1".parse::<IpToken>().unwrap(),
            IpToken::Address(IpAddr::from([10, 0, 0, 1]))
        );
        assert_eq!("client".parse::<IpToken>().unwrap(), IpToken::Client);
        assert_eq!(
            "host.example.com".parse::<IpToken>().unwrap(),
            IpToken::Host("host.example.com".into())
        );
        assert!(matches!(
            "2001:db8::1".parse::<IpToken>().unwrap(),
            IpToken::Address(IpAddr::V6(_))
        ));
    }

    #[test]
    fn test_ip_list_round_trip_keeps_order() {
        let tokens = parse_ip_list("192.168.1.1,client,,dns.example.com");
        assert_eq!(tokens.len(), 3);

        let request = UpdateRequest::for_domain("example.com", tokens);
        assert_eq!(request.ip_list(), "192.168.1.1,client,dns.example.com");
    }

    #[test]
    fn test_protocol_is_lowercased() {
        let request = UpdateRequest::new(Some("PowerDNS"), None, None);
        assert_eq!(request.protocol.as_deref(), Some("powerdns"));
    }
}
