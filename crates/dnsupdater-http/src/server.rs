//! Inbound update listener
//!
//! One catch-all route. Every request is authenticated first (see [`auth`]),
//! then turned into an update for the protocol configured as `HTTP.Target`.
//!
//! ## Responses
//!
//! Always JSON: `{"success": bool, "message": string}`
//!
//! - `200 Updated!`
//! - `400 <message>` for failures of the update itself
//! - `401 Unauthorized!` with `WWW-Authenticate: Basic` (DynDNS) or `DNSUpdate`
//! - `500 Internal server error` for anything else; details only go to the log

use crate::auth::{self, AUTH_NAME, Authenticator};
use crate::client::UpdateResponse;
use crate::{HTTP_SECTION, HttpSettings};
use axum::Router;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use dnsupdater_core::request::parse_ip_list;
use dnsupdater_core::resolver::AddressResolver;
use dnsupdater_core::{
    ClientResolver, Dispatcher, Error, PeerAddress, Result, UpdateRequest, target,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;

const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Shared state of the listener
#[derive(Clone)]
struct ListenerState {
    dispatcher: Dispatcher,
    authenticator: Authenticator,
}

/// Build the listener's router
pub fn router(dispatcher: Dispatcher) -> Result<Router> {
    let settings: HttpSettings = dispatcher.config().settings(HTTP_SECTION)?;
    if settings.secret().is_empty() {
        tracing::warn!("HTTP.SharedSecret is not set, every request will be refused");
    }

    let state = ListenerState {
        authenticator: Authenticator::new(settings.secret()),
        dispatcher,
    };

    Ok(Router::new().fallback(handle_request).with_state(state))
}

/// Address the listener binds to
///
/// `server` and `port` come from a serve target and override `HTTP.Host`
/// and `HTTP.Port`; the host is converted to its ASCII form.
pub fn listen_address(dispatcher: &Dispatcher, server: Option<&str>, port: Option<u16>) -> Result<(String, u16)> {
    let settings: HttpSettings = dispatcher.config().settings(HTTP_SECTION)?;

    let host = match server.filter(|server| !server.is_empty()) {
        Some(server) if server.parse::<IpAddr>().is_ok() => server.to_string(),
        Some(server) => idna::domain_to_ascii(server)
            .map_err(|_| Error::validation(format!("Invalid listen address '{}'", server)))?,
        None => settings.host,
    };
    let port = port.filter(|port| *port > 0).unwrap_or(settings.port);

    Ok((host, port))
}

/// Bind the listener and serve until the dispatcher is cancelled
pub async fn serve(dispatcher: Dispatcher, server: Option<&str>, port: Option<u16>) -> Result<()> {
    let (host, port) = listen_address(&dispatcher, server, port)?;
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| Error::transport("HTTP", format!("Failed to listen on {}:{}: {}", host, port, e)))?;

    serve_on(listener, dispatcher).await
}

/// Serve on an already bound listener until the dispatcher is cancelled
pub async fn serve_on(listener: TcpListener, dispatcher: Dispatcher) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("Listening for updates on {}", addr);

    let cancel = dispatcher.cancellation_token().clone();
    let app = router(dispatcher)?.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Update listener stopped");
    Ok(())
}

async fn handle_request(State(state): State<ListenerState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let method = parts.method;
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().unwrap_or_default().to_string();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let authorization = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let dyndns = auth::is_dyndns(&path, &query);
    let update = authenticate(&state.authenticator, authorization.as_deref(), &method, &path, &query)
        .and_then(|()| parse_update(&method, &path, &query, dyndns));

    let result = match update {
        Ok(update) => apply_update(&state.dispatcher, update, peer).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => json_response(StatusCode::OK, "Updated!", None),
        Err(Error::Authentication(reason)) => {
            tracing::warn!("Rejected {} {} from {:?}: {}", method, path, peer, reason);
            let scheme = if dyndns { "Basic" } else { AUTH_NAME };
            json_response(StatusCode::UNAUTHORIZED, "Unauthorized!", Some(scheme))
        }
        Err(e) if e.is_update_failure() => {
            tracing::warn!("Update from {:?} failed: {}", peer, e);
            json_response(StatusCode::BAD_REQUEST, &e.to_string(), None)
        }
        Err(e) => {
            tracing::error!("Update from {:?} failed: {}", peer, e);
            json_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
        }
    }
}

/// Check the request's credentials
///
/// The reason is only logged; clients always get the same answer.
fn authenticate(
    authenticator: &Authenticator,
    authorization: Option<&str>,
    method: &Method,
    path: &str,
    query: &str,
) -> Result<()> {
    if authenticator.is_authenticated(authorization, method.as_str(), path, query, Utc::now()) {
        return Ok(());
    }

    Err(Error::auth(match authorization {
        None => "no credentials",
        Some(_) => "invalid credentials",
    }))
}

/// Turn an authenticated request into an update request
fn parse_update(method: &Method, path: &str, query: &str, dyndns: bool) -> Result<UpdateRequest> {
    if dyndns {
        return parse_dyndns(query);
    }
    if method != Method::POST {
        return Err(Error::validation("Invalid parameters!"));
    }

    let mut request = UpdateRequest::default();
    target::fill_path_params(path, &mut request)?;
    Ok(request)
}

/// Domain from `hostname`, addresses from `myip`
fn parse_dyndns(query: &str) -> Result<UpdateRequest> {
    let first = |name: &str| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    };

    match (first("hostname"), first("myip")) {
        (Some(hostname), Some(myip)) => Ok(UpdateRequest::for_domain(hostname, parse_ip_list(&myip))),
        _ => Err(Error::validation("Not enough parameters!")),
    }
}

/// Resolve the addresses and hand the update to `HTTP.Target`
async fn apply_update(dispatcher: &Dispatcher, mut request: UpdateRequest, peer: Option<IpAddr>) -> Result<()> {
    let downstream = dispatcher.config().target_protocol(HTTP_SECTION);
    if downstream == "http" || downstream == "https" {
        return Err(Error::unsupported(format!("'{}' can't be the target of the HTTP listener", downstream)));
    }
    if request.domain.is_empty() {
        return Err(Error::validation("Domain can't be empty!"));
    }

    let client: Arc<dyn ClientResolver> = match peer {
        Some(peer) => Arc::new(PeerAddress(peer)),
        None => Arc::new(UnknownPeer),
    };
    let resolved = AddressResolver::new(client).resolve(&request.ips).await?;

    let target = request.start_target(&downstream);
    target.ips = resolved.to_tokens();
    let target = request.target.take().map(|target| *target).unwrap_or_default();

    tracing::info!("Forwarding {} [{}] to {}", target.domain, target.ip_list(), downstream);
    dispatcher.dispatch(&downstream, target).await
}

/// Client resolver for connections without peer information
struct UnknownPeer;

#[async_trait::async_trait]
impl ClientResolver for UnknownPeer {
    async fn resolve_client(&self) -> Result<Vec<IpAddr>> {
        Err(Error::Other("Peer address of the connection is unknown".into()))
    }
}

fn json_response(status: StatusCode, message: &str, challenge: Option<&'static str>) -> Response {
    let body = UpdateResponse {
        success: status == StatusCode::OK,
        message: message.to_string(),
    };
    let body = serde_json::to_string(&body).unwrap_or_default();

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    if let Some(challenge) = challenge {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
    }
    response
}
