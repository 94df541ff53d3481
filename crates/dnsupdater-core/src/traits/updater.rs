// # Updater Trait
//
// Defines the interface every update transport implements.
//
// ## Implementations
//
// - HTTP (signed POST to a remote dnsupdater listener): `dnsupdater-http` crate
// - SSH (tunnel indirection to another updater): `dnsupdater-ssh` crate
// - PowerDNS (zone API): `dnsupdater-powerdns` crate
//
// ## Usage
//
// ```rust,ignore
// use dnsupdater_core::{Dispatcher, UpdateRequest};
//
// async fn apply(dispatcher: &Dispatcher) -> dnsupdater_core::Result<()> {
//     let request = UpdateRequest::for_domain("example.org", vec!["10.0.0.1".into()]);
//     dispatcher.dispatch("powerdns", request).await
// }
// ```

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::UpdateRequest;
use async_trait::async_trait;
use serde_json::Value;

/// Trait for updater implementations
///
/// An updater is created per dispatch, bound to the shared configuration,
/// and applies exactly one request.
///
/// # Indirection
///
/// Updaters that only provide a path to another updater (SSH) never apply a
/// change themselves. They build a downstream request and hand it back to
/// [`Dispatcher::dispatch`], which is the only way any change is applied.
///
/// # Errors
///
/// Failures are returned, never swallowed. Transport and remote failures
/// carry the updater's [`Updater::updater_name`].
#[async_trait]
pub trait Updater: Send + Sync {
    /// Apply one update request
    ///
    /// # Parameters
    ///
    /// - `request`: The request, with `protocol` set to this updater's tag
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The remote end accepted the update
    /// - `Err(Error)`: The update failed
    async fn update(&self, request: UpdateRequest) -> Result<()>;

    /// Name used to tag errors and log lines (e.g. "HTTP", "PowerDNS")
    fn updater_name(&self) -> &'static str;
}

/// Helper trait for constructing updaters and describing their settings
pub trait UpdaterFactory: Send + Sync {
    /// Create an updater bound to the dispatcher's configuration
    ///
    /// # Parameters
    ///
    /// - `dispatcher`: Gives access to config, registry and cancellation,
    ///   and lets indirection updaters delegate
    fn create(&self, dispatcher: &Dispatcher) -> Result<Box<dyn Updater>>;

    /// Host and port this updater would talk to, without updating anything
    ///
    /// Indirection updaters use this to learn where to forward to. Updaters
    /// without a fixed endpoint keep the default, which refuses.
    fn host_port(&self, _config: &Config) -> Result<(String, u16)> {
        Err(Error::unsupported("Unsupported!"))
    }

    /// Baked-in settings section: section name and its default values
    fn default_settings(&self) -> Option<(&'static str, Value)> {
        None
    }

    /// Check that this updater's section of `config` is well formed
    fn validate(&self, _config: &Config) -> Result<()> {
        Ok(())
    }
}
