//! Target string parsing
//!
//! A target names both where and how to apply an update:
//!
//! ```text
//! scheme://[user@]host[:port]/.../domain/ip1,ip2,...
//! ```
//!
//! The scheme selects the protocol (unless it is literally `default`), the
//! authority selects the server, and the last two path segments carry the
//! domain and the comma-separated address tokens. Each path segment is
//! percent-decoded on its own, so an encoded `/` or `,` inside a segment
//! never shifts the segment boundaries.

use crate::error::{Error, Result};
use crate::request::{UpdateRequest, parse_ip_list};
use percent_encoding::percent_decode_str;
use url::{Host, Url};

/// Scheme given to targets written without one; never becomes a protocol
const SCHEMELESS: &str = "dnsupdater-schemeless";

/// Parse a target string into an update request
///
/// Parts missing from the target are left unset.
pub fn parse(target: &str) -> Result<UpdateRequest> {
    parse_with_defaults(target, UpdateRequest::default())
}

/// Parse a target string on top of caller-provided defaults
///
/// Protocol, server, port and user of `defaults` survive unless the target
/// carries its own.
pub fn parse_with_defaults(target: &str, mut defaults: UpdateRequest) -> Result<UpdateRequest> {
    let uri = parse_uri(target)?;
    fill_path_params(uri.path(), &mut defaults)?;
    fill_uri_params(target, &uri, &mut defaults);
    Ok(defaults)
}

/// Parse a target string into a URI
///
/// A target without a scheme (`/example.com/10.0.0.1`) parses too; it leaves
/// the protocol unset.
pub fn parse_uri(target: &str) -> Result<Url> {
    if target.is_empty() {
        return Err(Error::validation("Invalid target (empty)!"));
    }

    match Url::parse(target) {
        Ok(uri) => Ok(uri),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("{SCHEMELESS}:{target}"))
                .map_err(|e| Error::validation(format!("Invalid target '{target}': {e}")))
        }
        Err(e) => Err(Error::validation(format!("Invalid target '{target}': {e}"))),
    }
}

/// Set domain and address tokens from a target path
///
/// The path needs at least two segments after the leading slash; trailing
/// empty segments are ignored.
pub fn fill_path_params(path: &str, request: &mut UpdateRequest) -> Result<()> {
    let mut parts: Vec<String> = path
        .split('/')
        .map(|part| percent_decode_str(part).decode_utf8_lossy().into_owned())
        .collect();

    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }

    if parts.len() < 3 {
        return Err(Error::validation("Not enough parameters!"));
    }

    let ips = parts.pop().unwrap_or_default();
    request.domain = parts.pop().unwrap_or_default();
    request.ips = parse_ip_list(&ips);

    Ok(())
}

/// Port written in the authority of `target`, if any
///
/// [`Url::port`] hides a port equal to the scheme's default, so an explicit
/// `http://host:80/...` is read from the text instead.
fn authority_port(target: &str) -> Option<u16> {
    let start = target.find("//").filter(|&start| !target[..start].contains('/'))?;
    let authority = target[start + 2..].split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host_port)| host_port);

    let port = match host_port.rfind(']') {
        Some(end) => host_port[end + 1..].strip_prefix(':')?,
        None => host_port.rsplit_once(':')?.1,
    };
    port.parse().ok()
}

/// Set protocol, server, port and user from the URI parts that are present
///
/// `target` is the text `uri` was parsed from.
pub fn fill_uri_params(target: &str, uri: &Url, request: &mut UpdateRequest) {
    if !uri.scheme().is_empty() && uri.scheme() != SCHEMELESS {
        request.protocol = Some(uri.scheme().to_lowercase());
    }

    match uri.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => {
            request.server = Some(percent_decode_str(domain).decode_utf8_lossy().into_owned());
        }
        Some(Host::Ipv4(ip)) => request.server = Some(ip.to_string()),
        Some(Host::Ipv6(ip)) => request.server = Some(ip.to_string()),
        _ => {}
    }

    let explicit_default = || {
        authority_port(target).filter(|&port| Some(port) == uri.port_or_known_default())
    };
    if let Some(port) = uri.port().or_else(explicit_default) {
        request.port = Some(port);
    }

    if !uri.username().is_empty() {
        request.user = Some(percent_decode_str(uri.username()).decode_utf8_lossy().into_owned());
    }
}
