// # SSH Updater
//
// This crate provides the `ssh` updater: an indirection that opens an SSH
// port forward to the server and lets another updater talk through it.
//
// ```text
// ssh://gateway/example.org/client  ──►  SSH.Target (e.g. http) via 127.0.0.1:<forward>
// ```
//
// The `ssh` updater never changes DNS itself. It resolves the update's
// addresses over the session (so `client` means "the address the SSH server
// sees"), then hands a downstream request for `localhost:<forward>` back to
// the dispatcher.
//
// ## Security Requirements
//
// - The SSH password NEVER appears in logs
// - Changed host keys are rejected; unknown ones are accepted with a warning

pub mod session;
pub mod tunnel;

use async_trait::async_trait;
use dnsupdater_core::{Config, Dispatcher, Error, Result, UpdateRequest, Updater, UpdaterFactory, UpdaterRegistry};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use session::{Credentials, RusshConnector};
pub use tunnel::{ForwardStream, SshConnector, SshLink, Tunnel, TunnelParams, TunnelState};

/// Name SSH failures are tagged with
pub const UPDATER_NAME: &str = "SSH";

/// Section holding the SSH settings
pub const SSH_SECTION: &str = "SSH";

/// Protocol tag
pub const PROTOCOL: &str = "ssh";

/// Port used when neither the target nor the settings name one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Seconds to wait for the forward to become active
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// Host the downstream updater connects to
const FORWARD_HOST: &str = "localhost";

/// Settings of the `SSH` section
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SshSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    /// ⚠️ NEVER log this value
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    /// Seconds
    pub timeout: f64,
    pub target: Option<String>,
}

impl SshSettings {
    /// Forward wait bound; non-positive or unusable values fall back to the default
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS))
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            key_file: None,
            timeout: DEFAULT_TIMEOUT_SECS,
            target: None,
        }
    }
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("key_file", &self.key_file)
            .field("timeout", &self.timeout)
            .field("target", &self.target)
            .finish()
    }
}

/// Updater tunnelling another updater through SSH
pub struct SshUpdater {
    settings: SshSettings,
    connector: Arc<dyn SshConnector>,
    dispatcher: Dispatcher,
}

impl SshUpdater {
    pub fn new(settings: SshSettings, connector: Arc<dyn SshConnector>, dispatcher: Dispatcher) -> Self {
        Self {
            settings,
            connector,
            dispatcher,
        }
    }

    /// Tunnel parameters for `request`, forwarding to `downstream`'s endpoint
    fn tunnel_params(&self, request: &UpdateRequest, downstream: &str) -> Result<TunnelParams> {
        let host = request
            .server
            .clone()
            .or_else(|| self.settings.host.clone())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::validation("No SSH server given!"))?;
        let port = request.port.or(self.settings.port).unwrap_or(DEFAULT_SSH_PORT);
        let user = request
            .user
            .clone()
            .or_else(|| self.settings.user.clone())
            .or_else(|| std::env::var("USER").ok())
            .filter(|user| !user.is_empty())
            .ok_or_else(|| Error::validation("No SSH user given!"))?;

        let (forward_host, forward_port) = self
            .dispatcher
            .registry()
            .host_port(downstream, self.dispatcher.config())?;

        Ok(TunnelParams {
            host,
            port,
            credentials: Credentials::new(user, self.settings.password.clone(), self.settings.key_file.clone()),
            forward_host,
            forward_port,
            ips: request.ips.clone(),
        })
    }

    async fn delegate(&self, tunnel: &mut Tunnel, downstream: &str, mut request: UpdateRequest) -> Result<()> {
        let (port, addresses) = self
            .dispatcher
            .cancellable(tunnel.wait_active(self.settings.timeout()))
            .await?;

        let target = request.start_target(downstream);
        target.server = Some(FORWARD_HOST.to_string());
        target.port = Some(port);
        target.ips = addresses.to_tokens();
        let target = request.target.take().map(|target| *target).unwrap_or_default();

        tracing::info!("Tunnelling {} [{}] to {}", target.domain, target.ip_list(), downstream);
        self.dispatcher.dispatch(downstream, target).await
    }
}

#[async_trait]
impl Updater for SshUpdater {
    async fn update(&self, request: UpdateRequest) -> Result<()> {
        let downstream = self.dispatcher.config().target_protocol(SSH_SECTION);
        if downstream == PROTOCOL {
            return Err(Error::unsupported(format!("'{}' can't tunnel to itself", PROTOCOL)));
        }

        let params = self.tunnel_params(&request, &downstream)?;
        tracing::debug!(
            "Opening SSH tunnel to {}@{}:{}",
            params.credentials.user,
            params.host,
            params.port
        );

        let mut tunnel = Tunnel::start(params, self.connector.clone());
        let result = self.delegate(&mut tunnel, &downstream, request).await;
        if matches!(result, Err(Error::Cancelled)) {
            tunnel.abort();
        }
        let state = tunnel.shutdown().await;
        tracing::debug!("SSH tunnel ended as {:?}", state);

        result
    }

    fn updater_name(&self) -> &'static str {
        UPDATER_NAME
    }
}

/// Factory for the `ssh` updater
pub struct SshFactory {
    connector: Arc<dyn SshConnector>,
}

impl SshFactory {
    /// Factory whose tunnels open their sessions through `connector`
    pub fn with_connector(connector: Arc<dyn SshConnector>) -> Self {
        Self { connector }
    }
}

impl Default for SshFactory {
    fn default() -> Self {
        Self::with_connector(Arc::new(RusshConnector))
    }
}

impl UpdaterFactory for SshFactory {
    fn create(&self, dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        let settings: SshSettings = dispatcher.config().settings(SSH_SECTION)?;
        Ok(Box::new(SshUpdater::new(settings, self.connector.clone(), dispatcher.clone())))
    }

    fn default_settings(&self) -> Option<(&'static str, Value)> {
        Some((SSH_SECTION, json!({ "Timeout": DEFAULT_TIMEOUT_SECS as u64 })))
    }

    fn validate(&self, config: &Config) -> Result<()> {
        config.settings::<SshSettings>(SSH_SECTION).map(|_| ())
    }
}

/// Register the `ssh` updater
pub fn register(registry: &UpdaterRegistry) {
    registry.register_updater(PROTOCOL, Box::new(SshFactory::default()));
}

/// Register the `ssh` updater with a custom session connector
pub fn register_with(registry: &UpdaterRegistry, connector: Arc<dyn SshConnector>) {
    registry.register_updater(PROTOCOL, Box::new(SshFactory::with_connector(connector)));
}
