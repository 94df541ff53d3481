//! Request authentication
//!
//! Two schemes are accepted by the update listener:
//!
//! - `DNSUpdate <sig>`: `sig` is the base64url (no padding) HMAC-SHA256 of
//!   `bucket:method:path:query` under the shared secret, where `bucket` is the
//!   unix time divided by [`AUTH_VALID_SECONDS`]. A signature from the
//!   previous bucket is still accepted.
//! - `Basic <base64 user:password>` for DynDNS clients: the user must be
//!   [`AUTH_NAME`] and the password the base64url HMAC of [`AUTH_NAME`].
//!
//! All comparisons are constant time. Without a shared secret nothing
//! authenticates.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Name of the custom authorization scheme, also the DynDNS user name
pub const AUTH_NAME: &str = "DNSUpdate";

/// Lifetime of one signing bucket
pub const AUTH_VALID_SECONDS: i64 = 60 * 10;

type HmacSha256 = Hmac<Sha256>;

const LENIENT_CONFIG: GeneralPurposeConfig = GeneralPurposeConfig::new()
    .with_encode_padding(false)
    .with_decode_padding_mode(DecodePaddingMode::Indifferent);

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);

/// Signing bucket `time` falls into
pub fn time_bucket(time: DateTime<Utc>) -> i64 {
    time.timestamp().div_euclid(AUTH_VALID_SECONDS)
}

/// Signed material for one request
pub fn auth_string(bucket: i64, method: &str, path: &str, query: &str) -> String {
    format!("{bucket}:{method}:{path}:{query}")
}

fn hmac_sha256(secret: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(data);
    Some(mac.finalize().into_bytes().to_vec())
}

/// HMAC of a request for a given bucket
pub fn build_auth_hmac(secret: &str, bucket: i64, method: &str, path: &str, query: &str) -> Option<Vec<u8>> {
    hmac_sha256(secret.as_bytes(), auth_string(bucket, method, path, query).as_bytes())
}

/// `Authorization` header value for a request signed at `now`
///
/// Returns `None` without a secret.
pub fn authorization_header(secret: &str, method: &str, path: &str, now: DateTime<Utc>) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    let mac = build_auth_hmac(secret, time_bucket(now), method, path, "")?;
    Some(format!("{} {}", AUTH_NAME, URL_SAFE_NO_PAD.encode(mac)))
}

/// Password DynDNS clients use for the shared secret
pub fn dyndns_password(secret: &str) -> Option<String> {
    if secret.is_empty() {
        return None;
    }
    hmac_sha256(secret.as_bytes(), AUTH_NAME.as_bytes()).map(|mac| URL_SAFE_NO_PAD.encode(mac))
}

/// Whether a request uses the DynDNS shape
///
/// The path ends in `/update`, or the query names `hostname` or `myip`.
pub fn is_dyndns(path: &str, query: &str) -> bool {
    path.ends_with("/update")
        || url::form_urlencoded::parse(query.as_bytes()).any(|(key, _)| key == "hostname" || key == "myip")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Verifies inbound requests against a shared secret
#[derive(Clone)]
pub struct Authenticator {
    secret: String,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    /// Verify a request of either shape
    pub fn is_authenticated(
        &self,
        authorization: Option<&str>,
        method: &str,
        path: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if is_dyndns(path, query) {
            self.verify_basic(authorization)
        } else {
            self.verify_signature(authorization, method, path, query, now)
        }
    }

    /// Verify a `DNSUpdate` signature for the current or the previous bucket
    pub fn verify_signature(
        &self,
        authorization: Option<&str>,
        method: &str,
        path: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(encoded) = credentials(authorization, AUTH_NAME) else {
            return false;
        };
        if self.secret.is_empty() {
            return false;
        }
        let Ok(provided) = URL_SAFE_LENIENT.decode(encoded) else {
            return false;
        };

        let bucket = time_bucket(now);
        [bucket, bucket - 1].into_iter().any(|bucket| {
            build_auth_hmac(&self.secret, bucket, method, path, query)
                .is_some_and(|expected| constant_time_eq(&provided, &expected))
        })
    }

    /// Verify DynDNS `Basic` credentials
    pub fn verify_basic(&self, authorization: Option<&str>) -> bool {
        let Some(encoded) = credentials(authorization, "Basic") else {
            return false;
        };
        if self.secret.is_empty() {
            return false;
        }
        let Some(expected) = hmac_sha256(self.secret.as_bytes(), AUTH_NAME.as_bytes()) else {
            return false;
        };

        let Ok(decoded) = STANDARD_LENIENT.decode(encoded) else {
            return false;
        };
        let decoded = String::from_utf8_lossy(&decoded);
        let mut parts = decoded.splitn(2, ':');
        let user = parts.next().unwrap_or_default();
        let password = parts
            .next()
            .and_then(|password| URL_SAFE_LENIENT.decode(password).ok())
            .unwrap_or_default();

        // Both compared, no short circuit
        constant_time_eq(user.as_bytes(), AUTH_NAME.as_bytes()) & constant_time_eq(&password, &expected)
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials of an `Authorization` header with exactly two parts
fn credentials<'a>(authorization: Option<&'a str>, scheme: &str) -> Option<&'a str> {
    let mut parts = authorization?.split_whitespace();
    let (name, value) = (parts.next()?, parts.next()?);
    if parts.next().is_some() || name != scheme {
        return None;
    }
    Some(value)
}
