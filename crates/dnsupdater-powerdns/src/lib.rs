// # PowerDNS Updater
//
// This crate provides the `powerdns` updater for dnsupdater: it replaces the
// `A`/`AAAA` RRsets of a name through the PowerDNS HTTP API.
//
// ## Zone Selection
//
// The domain is converted to its IDNA ASCII form; the zone is its
// registrable domain according to the public suffix list, or the domain
// itself when it has none:
//
// - `dns.example.com` → zone `example.com.`
// - `bücher.example.co.uk` → zone `example.co.uk.`
//
// ## Routing
//
// - `API.Shared: true`: every update goes to `API.Host:API.Port`; the
//   target's server names the server object inside that API
// - otherwise: the target's server/port, falling back to `API.Host:API.Port`,
//   with server id `localhost`
//
// ## Security Requirements
//
// - `API.Key` NEVER appears in logs

pub mod api;

pub use api::{ApiEndpoint, ApiError, PowerDnsClient, RrSet, ZoneApi};

use async_trait::async_trait;
use dnsupdater_core::{
    AddressResolver, Config, Dispatcher, Error, LocalInterfaces, Result, UpdateRequest, Updater,
    UpdaterFactory, UpdaterRegistry,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Name used to tag errors and log lines
pub const UPDATER_NAME: &str = "PowerDNS";

/// Section holding TTL and API settings
pub const POWERDNS_SECTION: &str = "PowerDNS";

/// Default record TTL in seconds
pub const DEFAULT_TTL: u32 = 300;

/// Default API host
pub const DEFAULT_API_HOST: &str = "localhost";

/// Default API port
pub const DEFAULT_API_PORT: u16 = 8081;

/// Server id of an API that serves only itself
pub const LOCAL_SERVER_ID: &str = "localhost";

/// `PowerDNS.API` settings
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiSettings {
    pub shared: bool,
    pub host: String,
    pub port: u16,
    /// ⚠️ NEVER log this value
    pub key: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            shared: false,
            host: DEFAULT_API_HOST.to_string(),
            port: DEFAULT_API_PORT,
            key: None,
        }
    }
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("shared", &self.shared)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("key", &self.key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// Settings of the `PowerDNS` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerDnsSettings {
    #[serde(rename = "TTL")]
    pub ttl: u32,
    #[serde(rename = "API")]
    pub api: ApiSettings,
}

impl Default for PowerDnsSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            api: ApiSettings::default(),
        }
    }
}

impl PowerDnsSettings {
    /// API endpoint for `request`
    pub fn endpoint(&self, request: &UpdateRequest) -> ApiEndpoint {
        let server = request.server.clone().filter(|server| !server.is_empty());

        let (host, port, server_id) = if self.api.shared {
            let server_id = server.unwrap_or_else(|| self.api.host.clone());
            (self.api.host.clone(), self.api.port, server_id)
        } else {
            (
                server.unwrap_or_else(|| self.api.host.clone()),
                request.port.unwrap_or(self.api.port),
                LOCAL_SERVER_ID.to_string(),
            )
        };

        ApiEndpoint {
            host,
            port,
            server_id,
            key: self.api.key.clone().filter(|key| !key.is_empty()),
        }
    }
}

/// IDNA ASCII form of `domain`, without a trailing dot
pub fn ascii_domain(domain: &str) -> Result<String> {
    let ascii = idna::domain_to_ascii(domain.trim_end_matches('.'))
        .map_err(|_| Error::validation(format!("Invalid domain '{}'!", domain)))?;

    if ascii.is_empty() {
        return Err(Error::validation("Domain can't be empty!"));
    }
    Ok(ascii)
}

/// Zone of an ASCII domain: its registrable domain, or the domain itself
pub fn zone_name(ascii_domain: &str) -> String {
    let zone = psl::domain_str(ascii_domain).unwrap_or(ascii_domain);
    format!("{}.", zone)
}

/// Updater replacing address records through the PowerDNS API
pub struct PowerDnsUpdater {
    settings: PowerDnsSettings,
    api: Arc<dyn ZoneApi>,
    dispatcher: Dispatcher,
}

impl PowerDnsUpdater {
    pub fn new(settings: PowerDnsSettings, api: Arc<dyn ZoneApi>, dispatcher: Dispatcher) -> Self {
        Self {
            settings,
            api,
            dispatcher,
        }
    }

    fn api_error(error: ApiError) -> Error {
        match error {
            ApiError::Transport(message) => Error::transport(UPDATER_NAME, message),
            error @ ApiError::Api { .. } => Error::remote(UPDATER_NAME, error.message()),
        }
    }
}

#[async_trait]
impl Updater for PowerDnsUpdater {
    async fn update(&self, request: UpdateRequest) -> Result<()> {
        if request.domain.is_empty() {
            return Err(Error::validation("Domain can't be empty!"));
        }

        let domain = ascii_domain(&request.domain)?;
        let zone = zone_name(&domain);
        let endpoint = self.settings.endpoint(&request);
        let ttl = request.ttl.unwrap_or(self.settings.ttl);

        let resolver = AddressResolver::new(Arc::new(LocalInterfaces));
        let resolved = self
            .dispatcher
            .cancellable(resolver.resolve(&request.ips))
            .await?;
        if resolved.is_empty() {
            return Err(Error::validation("No addresses to update!"));
        }

        let rrsets = RrSet::replace_all(&format!("{}.", domain), ttl, resolved.addresses());
        tracing::debug!(
            "Replacing {} rrset(s) of {} in zone {} at {}:{}",
            rrsets.len(),
            domain,
            zone,
            endpoint.host,
            endpoint.port
        );

        self.dispatcher
            .cancellable(async {
                self.api
                    .patch_zone(&endpoint, &zone, &rrsets)
                    .await
                    .map_err(Self::api_error)
            })
            .await?;

        tracing::info!("Updated {} [{}] in zone {}", domain, request.ip_list(), zone);
        Ok(())
    }

    fn updater_name(&self) -> &'static str {
        UPDATER_NAME
    }
}

/// Factory for the `powerdns` updater
#[derive(Default)]
pub struct PowerDnsFactory {
    api: Option<Arc<dyn ZoneApi>>,
}

impl PowerDnsFactory {
    /// Factory whose updaters talk through `api` instead of HTTP
    pub fn with_api(api: Arc<dyn ZoneApi>) -> Self {
        Self { api: Some(api) }
    }
}

impl UpdaterFactory for PowerDnsFactory {
    fn create(&self, dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        let settings: PowerDnsSettings = dispatcher.config().settings(POWERDNS_SECTION)?;
        let api: Arc<dyn ZoneApi> = match &self.api {
            Some(api) => api.clone(),
            None => Arc::new(PowerDnsClient::new().map_err(PowerDnsUpdater::api_error)?),
        };

        Ok(Box::new(PowerDnsUpdater::new(settings, api, dispatcher.clone())))
    }

    fn host_port(&self, config: &Config) -> Result<(String, u16)> {
        let settings: PowerDnsSettings = config.settings(POWERDNS_SECTION)?;
        Ok((settings.api.host, settings.api.port))
    }

    fn default_settings(&self) -> Option<(&'static str, Value)> {
        Some((
            POWERDNS_SECTION,
            json!({
                "TTL": DEFAULT_TTL,
                "API": { "Shared": false, "Host": DEFAULT_API_HOST, "Port": DEFAULT_API_PORT }
            }),
        ))
    }

    fn validate(&self, config: &Config) -> Result<()> {
        config.settings::<PowerDnsSettings>(POWERDNS_SECTION).map(|_| ())
    }
}

/// Register the `powerdns` updater
pub fn register(registry: &UpdaterRegistry) {
    registry.register_updater("powerdns", Box::new(PowerDnsFactory::default()));
}

/// Register the `powerdns` updater with a custom zone API
pub fn register_with(registry: &UpdaterRegistry, api: Arc<dyn ZoneApi>) {
    registry.register_updater("powerdns", Box::new(PowerDnsFactory::with_api(api)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(loaded: Value) -> Config {
        let registry = UpdaterRegistry::new();
        register(&registry);
        Config::from_layers(registry.default_settings(), Some(loaded))
    }

    #[test]
    fn test_defaults() {
        let config = config(json!({}));
        let settings: PowerDnsSettings = config.settings(POWERDNS_SECTION).unwrap();

        assert_eq!(settings.ttl, 300);
        assert!(!settings.api.shared);
        assert_eq!(settings.api.host, "localhost");
        assert_eq!(settings.api.port, 8081);
        assert_eq!(settings.api.key, None);
    }

    #[test]
    fn test_endpoint_follows_request_unless_shared() {
        let request = UpdateRequest::for_domain("example.org", Vec::new()).with_server("ns1.example.com", Some(8082));
        let mut settings = PowerDnsSettings::default();

        let endpoint = settings.endpoint(&request);
        assert_eq!((endpoint.host.as_str(), endpoint.port), ("ns1.example.com", 8082));
        assert_eq!(endpoint.server_id, "localhost");

        settings.api.shared = true;
        settings.api.host = "api.example.com".into();
        let endpoint = settings.endpoint(&request);
        assert_eq!((endpoint.host.as_str(), endpoint.port), ("api.example.com", 8081));
        assert_eq!(endpoint.server_id, "ns1.example.com");
    }

    #[test]
    fn test_shared_endpoint_without_server_uses_api_host() {
        let request = UpdateRequest::for_domain("example.org", Vec::new());
        let mut settings = PowerDnsSettings::default();
        settings.api.shared = true;
        settings.api.host = "api.example.com".into();

        let endpoint = settings.endpoint(&request);
        assert_eq!(endpoint.host, "api.example.com");
        assert_eq!(endpoint.server_id, "api.example.com");
    }

    #[test]
    fn test_endpoint_falls_back_to_api_settings() {
        let request = UpdateRequest::for_domain("example.org", Vec::new());
        let endpoint = PowerDnsSettings::default().endpoint(&request);

        assert_eq!((endpoint.host.as_str(), endpoint.port), ("localhost", 8081));
        assert_eq!(endpoint.key, None);
    }

    #[test]
    fn test_zone_names() {
        assert_eq!(zone_name("dns.example.com"), "example.com.");
        assert_eq!(zone_name("example.org"), "example.org.");
        assert_eq!(zone_name("a.b.example.co.uk"), "example.co.uk.");
    }

    #[test]
    fn test_ascii_domain() {
        assert_eq!(ascii_domain("Bücher.Example").unwrap(), "xn--bcher-kva.example");
        assert_eq!(ascii_domain("dns.example.com.").unwrap(), "dns.example.com");
    }

    #[test]
    fn test_host_port_reads_api_section() {
        let config = config(json!({ "PowerDNS": { "API": { "Host": "10.0.0.53", "Port": 9000 } } }));
        assert_eq!(
            PowerDnsFactory::default().host_port(&config).unwrap(),
            ("10.0.0.53".to_string(), 9000)
        );
    }

    #[test]
    fn test_validate_rejects_bad_ttl() {
        let config = config(json!({ "PowerDNS": { "TTL": "forever" } }));
        assert!(matches!(
            PowerDnsFactory::default().validate(&config),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_settings_debug_redacts_key() {
        let mut settings = PowerDnsSettings::default();
        settings.api.key = Some("changeme".into());

        let debug = format!("{settings:?}");
        assert!(!debug.contains("changeme"));
        assert!(debug.contains("<REDACTED>"));
    }
}
