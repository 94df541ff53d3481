// # HTTP Updater
//
// This crate provides the `http`/`https` updater and the authenticated
// update listener for dnsupdater.
//
// ## Outbound
//
// `http://host:port/domain/ip,...` targets are sent as a POST to another
// dnsupdater listener. With `HTTP.SharedSecret` set, the request carries a
// time-bucketed `DNSUpdate` signature (see [`auth`]).
//
// ## Inbound
//
// [`server::router`] accepts signed POSTs and DynDNS-style
// `GET /nic/update?hostname=...&myip=...` requests and forwards the update
// to `HTTP.Target` (default: the global default protocol).
//
// ## Security Requirements
//
// - The shared secret NEVER appears in logs
// - Without a shared secret the listener refuses every request
// - Authentication failures never tell the client why

pub mod auth;
pub mod client;
pub mod server;

pub use client::HttpUpdater;
pub use server::{router, serve};

use dnsupdater_core::{Config, Dispatcher, Result, Updater, UpdaterFactory, UpdaterRegistry};
use serde::Deserialize;
use serde_json::{Value, json};

/// Section holding host, port and shared secret
pub const HTTP_SECTION: &str = "HTTP";

/// Section holding the endpoint used when tunnelling to `https`
pub const HTTPS_SECTION: &str = "HTTPS";

/// Default listen / connect address
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen / connect port
pub const DEFAULT_PORT: u16 = 8245;

/// Settings of the `HTTP` / `HTTPS` sections
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HttpSettings {
    pub host: String,
    pub port: u16,
    /// ⚠️ NEVER log this value
    pub shared_secret: Option<String>,
    pub target: Option<String>,
}

impl HttpSettings {
    /// The shared secret, empty when unset
    pub fn secret(&self) -> &str {
        self.shared_secret.as_deref().unwrap_or_default()
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shared_secret: None,
            target: None,
        }
    }
}

// Custom Debug implementation that hides the shared secret
impl std::fmt::Debug for HttpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<REDACTED>"))
            .field("target", &self.target)
            .finish()
    }
}

/// Factory for the `http` and `https` updaters
pub struct HttpFactory {
    section: &'static str,
}

impl HttpFactory {
    /// Factory whose endpoint comes from `section`
    pub fn new(section: &'static str) -> Self {
        Self { section }
    }
}

impl UpdaterFactory for HttpFactory {
    fn create(&self, dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        let settings: HttpSettings = dispatcher.config().settings(HTTP_SECTION)?;
        Ok(Box::new(HttpUpdater::new(settings, dispatcher.clone())?))
    }

    fn host_port(&self, config: &Config) -> Result<(String, u16)> {
        let settings: HttpSettings = config.settings(self.section)?;
        Ok((settings.host, settings.port))
    }

    fn default_settings(&self) -> Option<(&'static str, Value)> {
        Some((self.section, json!({ "Host": DEFAULT_HOST, "Port": DEFAULT_PORT })))
    }

    fn validate(&self, config: &Config) -> Result<()> {
        config.settings::<HttpSettings>(self.section).map(|_| ())
    }
}

/// Register the `http` and `https` updaters
pub fn register(registry: &UpdaterRegistry) {
    registry.register_updater("http", Box::new(HttpFactory::new(HTTP_SECTION)));
    registry.register_updater("https", Box::new(HttpFactory::new(HTTPS_SECTION)));
}
