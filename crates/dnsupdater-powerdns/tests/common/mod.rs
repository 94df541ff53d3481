//! Shared doubles for the PowerDNS contract tests

#![allow(dead_code)]

use async_trait::async_trait;
use dnsupdater_core::{Config, Dispatcher, UpdaterRegistry};
use dnsupdater_powerdns::{ApiEndpoint, ApiError, RrSet, ZoneApi};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One recorded `patch_zone` call
#[derive(Debug, Clone)]
pub struct Batch {
    pub endpoint: ApiEndpoint,
    pub zone: String,
    pub rrsets: Vec<RrSet>,
}

/// Zone API double recording every batch
#[derive(Clone, Default)]
pub struct RecordingZoneApi {
    batches: Arc<Mutex<Vec<Batch>>>,
    failure: Option<ApiError>,
}

impl RecordingZoneApi {
    /// A double answering every batch with `error`
    pub fn failing(error: ApiError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ZoneApi for RecordingZoneApi {
    async fn patch_zone(&self, endpoint: &ApiEndpoint, zone: &str, rrsets: &[RrSet]) -> Result<(), ApiError> {
        self.batches.lock().unwrap().push(Batch {
            endpoint: endpoint.clone(),
            zone: zone.to_string(),
            rrsets: rrsets.to_vec(),
        });

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Dispatcher with `powerdns` bound to `api` and `loaded` as the file layer
pub fn dispatcher_with(api: RecordingZoneApi, loaded: Value) -> Dispatcher {
    let registry = UpdaterRegistry::new();
    dnsupdater_powerdns::register_with(&registry, Arc::new(api));

    let config = Config::from_layers(registry.default_settings(), Some(loaded));
    Dispatcher::new(Arc::new(registry), Arc::new(config))
}
