//! Test doubles and common utilities for dispatch contract tests
//!
//! This module provides minimal updaters that record what reaches them
//! instead of talking to any remote end.

#![allow(dead_code)]

use dnsupdater_core::error::{Error, Result};
use dnsupdater_core::{
    Config, Dispatcher, UpdateRequest, Updater, UpdaterFactory, UpdaterRegistry,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Shared log of the requests a recording updater received
#[derive(Clone, Default)]
pub struct RequestLog {
    requests: Arc<Mutex<Vec<UpdateRequest>>>,
    created: Arc<AtomicUsize>,
}

impl RequestLog {
    pub fn requests(&self) -> Vec<UpdateRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn update_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of updaters the factory created
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// Factory for an updater that records every request it gets
pub struct RecordingFactory {
    section: &'static str,
    log: RequestLog,
    fail_with: Option<String>,
}

impl RecordingFactory {
    pub fn new(section: &'static str) -> (Self, RequestLog) {
        let log = RequestLog::default();
        let factory = Self {
            section,
            log: log.clone(),
            fail_with: None,
        };
        (factory, log)
    }

    /// Make every update fail with a remote error carrying `message`
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }
}

impl UpdaterFactory for RecordingFactory {
    fn create(&self, _dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        self.log.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingUpdater {
            log: self.log.clone(),
            fail_with: self.fail_with.clone(),
        }))
    }

    fn host_port(&self, _config: &Config) -> Result<(String, u16)> {
        Ok(("192.0.2.10".to_string(), 8081))
    }

    fn default_settings(&self) -> Option<(&'static str, Value)> {
        Some((self.section, json!({ "Host": "192.0.2.10", "Port": 8081 })))
    }
}

struct RecordingUpdater {
    log: RequestLog,
    fail_with: Option<String>,
}

#[async_trait::async_trait]
impl Updater for RecordingUpdater {
    async fn update(&self, request: UpdateRequest) -> Result<()> {
        self.log.requests.lock().unwrap().push(request);
        match &self.fail_with {
            Some(message) => Err(Error::remote("Recording", message.clone())),
            None => Ok(()),
        }
    }

    fn updater_name(&self) -> &'static str {
        "Recording"
    }
}

/// Factory for an indirection updater that forwards to its target protocol
pub struct ForwardingFactory {
    pub source: &'static str,
}

impl UpdaterFactory for ForwardingFactory {
    fn create(&self, dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        Ok(Box::new(ForwardingUpdater {
            source: self.source,
            dispatcher: dispatcher.clone(),
        }))
    }
}

struct ForwardingUpdater {
    source: &'static str,
    dispatcher: Dispatcher,
}

#[async_trait::async_trait]
impl Updater for ForwardingUpdater {
    async fn update(&self, mut request: UpdateRequest) -> Result<()> {
        let downstream = self.dispatcher.config().target_protocol(self.source);
        if downstream == self.source {
            return Err(Error::unsupported(format!("'{}' can't target itself", downstream)));
        }

        let (server, port) = self.dispatcher.registry().host_port(&downstream, self.dispatcher.config())?;
        let ips = request.ips.clone();
        let target = request.start_target(&downstream);
        target.server = Some(server);
        target.port = Some(port);
        target.ips = ips;

        let target = request.target.take().map(|target| *target).unwrap_or_default();
        self.dispatcher.dispatch(&downstream, target).await
    }

    fn updater_name(&self) -> &'static str {
        "Forwarding"
    }
}

/// Registry with a recording `powerdns` and `http`, and a forwarding `ssh`
pub fn test_registry() -> (Arc<UpdaterRegistry>, RequestLog, RequestLog) {
    let registry = UpdaterRegistry::new();

    let (powerdns, powerdns_log) = RecordingFactory::new("PowerDNS");
    let (http, http_log) = RecordingFactory::new("HTTP");
    registry.register_updater("powerdns", Box::new(powerdns));
    registry.register_updater("http", Box::new(http));
    registry.register_updater("ssh", Box::new(ForwardingFactory { source: "ssh" }));

    (Arc::new(registry), powerdns_log, http_log)
}

/// Dispatcher over `registry` with the registry defaults and an optional file layer
pub fn dispatcher(registry: Arc<UpdaterRegistry>, loaded: Option<Value>) -> Dispatcher {
    let config = Config::from_layers(registry.default_settings(), loaded);
    Dispatcher::new(registry, Arc::new(config))
}
