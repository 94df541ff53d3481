//! Test doubles shared by the listener and client tests

#![allow(dead_code)]

use dnsupdater_core::error::{Error, Result};
use dnsupdater_core::{Config, Dispatcher, UpdateRequest, Updater, UpdaterFactory, UpdaterRegistry};
use serde_json::Value;
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "s3cr3t-shared-between-peers";

/// Factory for an updater that records what reaches it
#[derive(Clone, Default)]
pub struct RecordingFactory {
    requests: Arc<Mutex<Vec<UpdateRequest>>>,
    fail_with: Option<String>,
}

impl RecordingFactory {
    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<UpdateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl UpdaterFactory for RecordingFactory {
    fn create(&self, _dispatcher: &Dispatcher) -> Result<Box<dyn Updater>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl Updater for RecordingFactory {
    async fn update(&self, request: UpdateRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request);
        match &self.fail_with {
            Some(message) => Err(Error::remote("PowerDNS", message.clone())),
            None => Ok(()),
        }
    }

    fn updater_name(&self) -> &'static str {
        "PowerDNS"
    }
}

/// Dispatcher with `http`/`https` and a recording `powerdns` updater
pub fn dispatcher_with(recorder: RecordingFactory, loaded: Value) -> Dispatcher {
    let registry = UpdaterRegistry::new();
    dnsupdater_http::register(&registry);
    registry.register_updater("powerdns", Box::new(recorder));

    let config = Config::from_layers(registry.default_settings(), Some(loaded));
    Dispatcher::new(Arc::new(registry), Arc::new(config))
}
