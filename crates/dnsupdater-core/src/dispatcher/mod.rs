//! Update dispatch
//!
//! [`Dispatcher`] is the single path by which any update is applied: it looks
//! the protocol up in the registry, creates an updater bound to the shared
//! configuration and runs it. Indirection updaters call back into it with
//! their downstream request.
//!
//! [`DnsUpdater`] is the front door for target strings: it parses the target,
//! resolves the protocol, records an explicitly requested downstream protocol
//! and dispatches.
//!
//! ## Cancellation
//!
//! The dispatcher owns the process-wide [`CancellationToken`]. Updaters wrap
//! every blocking wait in [`Dispatcher::cancellable`] so that cancelling the
//! token turns any pending wait into [`Error::Cancelled`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::UpdaterRegistry;
use crate::request::{DEFAULT_PROTOCOL, UpdateRequest};
use crate::target;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Resolve the protocol of one call
///
/// Highest precedence first: an explicit protocol, the target's scheme unless
/// it is `default`, the configured global default. The result is lowercase
/// and never `default`.
pub fn resolve_protocol(explicit: Option<&str>, scheme: Option<&str>, config: &Config) -> String {
    [explicit, scheme]
        .into_iter()
        .flatten()
        .find(|protocol| !protocol.is_empty() && !protocol.eq_ignore_ascii_case(DEFAULT_PROTOCOL))
        .map(str::to_lowercase)
        .unwrap_or_else(|| config.default_protocol())
}

/// Dispatches update requests to registered updaters
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<UpdaterRegistry>,
    config: Arc<Config>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh cancellation token
    pub fn new(registry: Arc<UpdaterRegistry>, config: Arc<Config>) -> Self {
        Self {
            registry,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `cancel` as the process-wide cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &UpdaterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Apply `request` with the updater registered under `protocol`
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedProtocol`] if nothing is registered under `protocol`
    /// - whatever the updater fails with, unchanged
    pub async fn dispatch(&self, protocol: &str, mut request: UpdateRequest) -> Result<()> {
        let protocol = protocol.to_lowercase();
        let factory = self.registry.get(&protocol)?;
        let updater = factory.create(self)?;

        tracing::debug!(
            "Dispatching {} [{}] to {}",
            request.domain,
            request.ip_list(),
            updater.updater_name()
        );

        request.protocol = Some(protocol);
        updater.update(request).await
    }

    /// Run `future` unless the cancellation token fires first
    pub async fn cancellable<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = future => result,
        }
    }
}

/// Per-call options of [`DnsUpdater::update_with`]
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Protocol to use regardless of the target's scheme
    pub protocol: Option<String>,
    /// Protocol an indirection updater should delegate to
    pub target_protocol: Option<String>,
}

/// Front door: applies updates described by target strings
#[derive(Clone)]
pub struct DnsUpdater {
    dispatcher: Dispatcher,
}

impl DnsUpdater {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Apply the update described by `target`
    ///
    /// `target_protocol`, when given, is recorded as the downstream protocol
    /// of the protocol this target resolves to, so that e.g.
    /// `ssh://host/example.org/client` with `powerdns` tunnels to PowerDNS.
    pub async fn update(&self, target: &str, target_protocol: Option<&str>) -> Result<()> {
        let options = UpdateOptions {
            protocol: None,
            target_protocol: target_protocol.map(str::to_string),
        };
        self.update_with(target, &options).await
    }

    /// Apply the update described by `target` with explicit options
    pub async fn update_with(&self, target: &str, options: &UpdateOptions) -> Result<()> {
        let request = target::parse(target)?;
        let config = self.dispatcher.config();

        let protocol = resolve_protocol(
            options.protocol.as_deref(),
            request.protocol.as_deref(),
            config,
        );
        config.set_target_protocol(&protocol, options.target_protocol.as_deref());

        if request.domain.is_empty() {
            return Err(Error::validation("Domain can't be empty!"));
        }

        tracing::info!("Updating {} [{}] via {}", request.domain, request.ip_list(), protocol);
        self.dispatcher.dispatch(&protocol, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn config_with_default(default: &str) -> Config {
        Config::from_layers(Map::new(), Some(json!({ "Default": default })))
    }

    #[test]
    fn test_explicit_protocol_wins() {
        let config = Config::default();
        assert_eq!(resolve_protocol(Some("HTTP"), Some("ssh"), &config), "http");
    }

    #[test]
    fn test_scheme_beats_default() {
        let config = Config::default();
        assert_eq!(resolve_protocol(None, Some("SSH"), &config), "ssh");
    }

    #[test]
    fn test_default_scheme_falls_through() {
        let config = config_with_default("HTTPS");
        assert_eq!(resolve_protocol(None, Some("default"), &config), "https");
        assert_eq!(resolve_protocol(Some("Default"), None, &config), "https");
        assert_eq!(resolve_protocol(None, None, &config), "https");
    }

    #[tokio::test]
    async fn test_unregistered_protocol() {
        let dispatcher = Dispatcher::new(Arc::new(UpdaterRegistry::new()), Arc::new(Config::default()));

        let err = dispatcher
            .dispatch("nothing", UpdateRequest::for_domain("example.com", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedProtocol(_)));
    }

    #[tokio::test]
    async fn test_cancellable_observes_token() {
        let dispatcher = Dispatcher::new(Arc::new(UpdaterRegistry::new()), Arc::new(Config::default()));
        dispatcher.cancellation_token().cancel();

        let result = dispatcher
            .cancellable(std::future::pending::<Result<()>>())
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
