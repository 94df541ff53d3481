//! Outbound HTTP updater
//!
//! Sends one update as a POST of `/domain/ip,ip,...` to another dnsupdater
//! listener and interprets its JSON answer.

use crate::HttpSettings;
use crate::auth;
use async_trait::async_trait;
use chrono::Utc;
use dnsupdater_core::{Dispatcher, Error, Result, UpdateRequest, Updater};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;
use std::time::Duration;
use url::Url;

/// Name HTTP failures are tagged with
pub const UPDATER_NAME: &str = "HTTP";

/// Default HTTP timeout for update requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters escaped inside one path segment; `,` and `:` stay readable
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',')
    .remove(b':');

/// JSON body exchanged between client and listener
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
}

impl UpdateResponse {
    /// Interpret a response body
    ///
    /// Bodies that are not a JSON object become the message of a failure.
    pub fn from_body(body: &str) -> Self {
        let failure = || Self {
            success: false,
            message: body.to_string(),
        };

        if !body.starts_with('{') {
            return failure();
        }
        serde_json::from_str(body).unwrap_or_else(|_| failure())
    }
}

/// Encoded request path for a domain and its address list
pub fn update_path(request: &UpdateRequest) -> String {
    format!(
        "/{}/{}",
        utf8_percent_encode(&request.domain, SEGMENT),
        utf8_percent_encode(&request.ip_list(), SEGMENT)
    )
}

/// Updater posting to a remote dnsupdater listener
pub struct HttpUpdater {
    settings: HttpSettings,
    dispatcher: Dispatcher,
    client: reqwest::Client,
}

impl HttpUpdater {
    pub fn new(settings: HttpSettings, dispatcher: Dispatcher) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::transport(UPDATER_NAME, format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            settings,
            dispatcher,
            client,
        })
    }

    /// URL the request is posted to
    pub fn endpoint(&self, request: &UpdateRequest) -> Result<Url> {
        let scheme = match request.protocol.as_deref() {
            Some("https") => "https",
            _ => "http",
        };
        let server = request.server.as_deref().unwrap_or(&self.settings.host);
        let host = match server.parse::<Ipv6Addr>() {
            Ok(ip) => format!("[{ip}]"),
            Err(_) => server.to_string(),
        };
        let port = request.port.unwrap_or(self.settings.port);

        Url::parse(&format!("{scheme}://{host}:{port}{}", update_path(request)))
            .map_err(|e| Error::validation(format!("Invalid server '{}': {}", server, e)))
    }

    async fn send(&self, url: Url) -> Result<()> {
        let mut builder = self.client.post(url.clone());

        // Sign the path exactly as it goes on the wire
        if let Some(header) = auth::authorization_header(self.settings.secret(), "POST", url.path(), Utc::now()) {
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(UPDATER_NAME, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(UPDATER_NAME, e.to_string()))?;
        let result = UpdateResponse::from_body(&body);

        if status != reqwest::StatusCode::OK || !result.success {
            return Err(Error::remote(
                UPDATER_NAME,
                format!(
                    "[{} {}] {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or_default(),
                    result.message
                ),
            ));
        }

        tracing::debug!("{} answered: {}", url.host_str().unwrap_or_default(), result.message);
        Ok(())
    }
}

#[async_trait]
impl Updater for HttpUpdater {
    async fn update(&self, request: UpdateRequest) -> Result<()> {
        let url = self.endpoint(&request)?;

        tracing::info!("Posting {} [{}] to {}", request.domain, request.ip_list(), url.origin().ascii_serialization());
        self.dispatcher.cancellable(self.send(url)).await
    }

    fn updater_name(&self) -> &'static str {
        UPDATER_NAME
    }
}
