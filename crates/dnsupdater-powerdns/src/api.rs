//! PowerDNS HTTP API client
//!
//! Only the one call an update needs:
//!
//! ```http
//! PATCH /api/v1/servers/:server_id/zones/:zone_id
//! X-API-Key: <key>
//!
//! {"rrsets": [{"name": "dns.example.com.", "type": "A", "ttl": 300,
//!              "changetype": "REPLACE", "records": [{"content": "10.0.0.1", "disabled": false}]}]}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;
use std::time::Duration;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error text used when the API answers with something that is not JSON
pub const NON_JSON_ERROR: &str = "Non-JSON response";

/// Where the API lives and which server object to address
#[derive(Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    pub host: String,
    pub port: u16,
    pub server_id: String,
    /// ⚠️ NEVER log this value
    pub key: Option<String>,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiEndpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("server_id", &self.server_id)
            .field("key", &self.key.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// One record of an RRset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    pub content: String,
    pub disabled: bool,
}

/// A resource record set replaced as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RrSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub ttl: u32,
    pub changetype: String,
    pub records: Vec<Record>,
}

impl RrSet {
    /// Record type for an address
    pub fn record_type(address: &IpAddr) -> &'static str {
        match address {
            IpAddr::V4(_) => "A",
            IpAddr::V6(_) => "AAAA",
        }
    }

    /// Group addresses into one `REPLACE` RRset per record type
    ///
    /// RRsets appear in the order their first address appears.
    pub fn replace_all(name: &str, ttl: u32, addresses: &[IpAddr]) -> Vec<RrSet> {
        let mut rrsets: Vec<RrSet> = Vec::new();

        for address in addresses {
            let record_type = Self::record_type(address);
            let record = Record {
                content: address.to_string(),
                disabled: false,
            };

            match rrsets.iter_mut().find(|rrset| rrset.record_type == record_type) {
                Some(rrset) => rrset.records.push(record),
                None => rrsets.push(RrSet {
                    name: name.to_string(),
                    record_type: record_type.to_string(),
                    ttl,
                    changetype: "REPLACE".to_string(),
                    records: vec![record],
                }),
            }
        }

        rrsets
    }
}

/// Failures of an API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The API could not be reached
    Transport(String),
    /// The API answered with an error
    Api {
        /// `error` field of the answer, or [`NON_JSON_ERROR`]
        error: String,
        /// Raw body of the answer
        body: String,
    },
}

impl ApiError {
    /// Interpret an error answer
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(object)) => {
                let error = object
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("HTTP {}", status));
                ApiError::Api {
                    error,
                    body: body.to_string(),
                }
            }
            _ => ApiError::Api {
                error: NON_JSON_ERROR.to_string(),
                body: body.to_string(),
            },
        }
    }

    /// Message to report: the raw body when the answer was not JSON
    pub fn message(&self) -> &str {
        match self {
            ApiError::Transport(message) => message,
            ApiError::Api { error, body } if error.contains("Non-JSON") => body,
            ApiError::Api { error, .. } => error,
        }
    }
}

/// Trait for the zone API used by the PowerDNS updater
#[async_trait]
pub trait ZoneApi: Send + Sync {
    /// Submit `rrsets` to `zone` as one batch
    async fn patch_zone(&self, endpoint: &ApiEndpoint, zone: &str, rrsets: &[RrSet]) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct PatchBody<'a> {
    rrsets: &'a [RrSet],
}

/// [`ZoneApi`] over HTTP
pub struct PowerDnsClient {
    client: reqwest::Client,
}

impl PowerDnsClient {
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// URL of a zone object
    pub fn zone_url(endpoint: &ApiEndpoint, zone: &str) -> String {
        let host = match endpoint.host.parse::<std::net::Ipv6Addr>() {
            Ok(ip) => format!("[{ip}]"),
            Err(_) => endpoint.host.clone(),
        };
        format!(
            "http://{}:{}/api/v1/servers/{}/zones/{}",
            host,
            endpoint.port,
            percent_encoding::utf8_percent_encode(&endpoint.server_id, PATH_ID),
            percent_encoding::utf8_percent_encode(zone, PATH_ID),
        )
    }
}

/// Server and zone ids keep their dots readable
const PATH_ID: &percent_encoding::AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_');

#[async_trait]
impl ZoneApi for PowerDnsClient {
    async fn patch_zone(&self, endpoint: &ApiEndpoint, zone: &str, rrsets: &[RrSet]) -> Result<(), ApiError> {
        let url = Self::zone_url(endpoint, zone);
        tracing::debug!("PATCH {} with {} rrset(s)", url, rrsets.len());

        let mut request = self.client.patch(&url).json(&PatchBody { rrsets });
        if let Some(key) = &endpoint.key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(format!("Failed to read response: {}", e)))?;

        if status.is_success() {
            // PowerDNS answers 204 without a body; an error object still counts
            if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&body) {
                if object.contains_key("error") {
                    return Err(ApiError::from_body(status.as_u16(), &body));
                }
            }
            return Ok(());
        }

        Err(ApiError::from_body(status.as_u16(), &body))
    }
}
