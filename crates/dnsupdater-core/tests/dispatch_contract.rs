//! Contract Test: Dispatch & Protocol Resolution
//!
//! Verifies that target strings reach the right updater:
//!
//! - The scheme selects the updater unless it is `default`
//! - An explicit target protocol is recorded for the resolved source protocol
//! - Indirection updaters reach their downstream only through the dispatcher
//! - Failures surface unchanged
//!
//! If this test fails, updates are routed to the wrong place.

mod common;

use common::*;
use dnsupdater_core::{DnsUpdater, Error, IpToken, UpdateOptions};
use serde_json::json;
use std::net::IpAddr;

fn ip(text: &str) -> IpToken {
    IpToken::Address(text.parse::<IpAddr>().unwrap())
}

#[tokio::test]
async fn scheme_selects_updater() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    updater
        .update("powerdns://example.com/example.org/10.0.0.1", None)
        .await
        .expect("update succeeds");

    assert_eq!(http.update_count(), 0);
    let requests = powerdns.requests();
    assert_eq!(requests.len(), 1);

    let request = &requests[0];
    assert_eq!(request.protocol.as_deref(), Some("powerdns"));
    assert_eq!(request.server.as_deref(), Some("example.com"));
    assert_eq!(request.domain, "example.org");
    assert_eq!(request.ips, vec![ip("10.0.0.1")]);
}

#[tokio::test]
async fn default_scheme_uses_configured_default() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, Some(json!({ "Default": "HTTP" }))));

    updater
        .update("default:///example.org/10.0.0.1", None)
        .await
        .expect("update succeeds");
    updater
        .update("/example.org/10.0.0.2", None)
        .await
        .expect("update succeeds");

    assert_eq!(powerdns.update_count(), 0);
    assert_eq!(http.update_count(), 2);
    assert!(
        http.requests()
            .iter()
            .all(|request| request.protocol.as_deref() == Some("http"))
    );
}

#[tokio::test]
async fn explicit_protocol_beats_scheme() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    let options = UpdateOptions {
        protocol: Some("HTTP".to_string()),
        target_protocol: None,
    };
    updater
        .update_with("powerdns://example.com/example.org/10.0.0.1", &options)
        .await
        .expect("update succeeds");

    assert_eq!(powerdns.update_count(), 0);
    assert_eq!(http.update_count(), 1);
}

#[tokio::test]
async fn unknown_scheme_is_unsupported() {
    let (registry, powerdns, _http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    let err = updater
        .update("gopher://example.com/example.org/10.0.0.1", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedProtocol(_)));
    assert_eq!(powerdns.created_count(), 0);
}

#[tokio::test]
async fn empty_domain_is_rejected_before_dispatch() {
    let (registry, powerdns, _http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    let err = updater
        .update("powerdns://example.com//10.0.0.1", None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(ref msg) if msg == "Domain can't be empty!"));
    assert_eq!(powerdns.created_count(), 0);
}

#[tokio::test]
async fn indirection_delegates_through_dispatcher() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    // No override: the section has no Target, so the default (powerdns) applies
    updater
        .update("ssh://gateway.example/example.org/10.0.0.1,10.0.0.2", None)
        .await
        .expect("update succeeds");

    assert_eq!(http.update_count(), 0);
    let requests = powerdns.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].server.as_deref(), Some("192.0.2.10"));
    assert_eq!(requests[0].port, Some(8081));
    assert_eq!(requests[0].domain, "example.org");
    assert_eq!(requests[0].ips, vec![ip("10.0.0.1"), ip("10.0.0.2")]);
}

#[tokio::test]
async fn explicit_target_protocol_is_recorded_for_source() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    updater
        .update("ssh://gateway.example/example.org/10.0.0.1", Some("HTTP"))
        .await
        .expect("update succeeds");

    assert_eq!(updater.dispatcher().config().target_protocol("ssh"), "http");
    assert_eq!(powerdns.update_count(), 0);
    assert_eq!(http.update_count(), 1);
}

#[tokio::test]
async fn section_target_selects_downstream() {
    let (registry, _powerdns, http) = test_registry();
    let loaded = json!({ "SSH": { "Target": "HTTP" } });
    let updater = DnsUpdater::new(dispatcher(registry, Some(loaded)));

    updater
        .update("ssh://gateway.example/example.org/10.0.0.1", None)
        .await
        .expect("update succeeds");

    assert_eq!(http.update_count(), 1);
}

#[tokio::test]
async fn self_loop_is_unsupported() {
    let (registry, powerdns, http) = test_registry();
    let updater = DnsUpdater::new(dispatcher(registry, None));

    let err = updater
        .update("ssh://gateway.example/example.org/10.0.0.1", Some("ssh"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnsupportedProtocol(_)));
    assert_eq!(powerdns.created_count() + http.created_count(), 0);
}

#[tokio::test]
async fn updater_failures_surface_unchanged() {
    let registry = dnsupdater_core::UpdaterRegistry::new();
    let (failing, log) = RecordingFactory::new("PowerDNS");
    registry.register_updater("powerdns", Box::new(failing.failing("Zone not found")));

    let updater = DnsUpdater::new(dispatcher(std::sync::Arc::new(registry), None));
    let err = updater
        .update("powerdns://example.com/example.org/10.0.0.1", None)
        .await
        .unwrap_err();

    assert_eq!(log.update_count(), 1);
    assert!(matches!(err, Error::Remote { .. }));
    assert_eq!(err.to_string(), "Recording: Zone not found");
}

#[tokio::test]
async fn cancelled_dispatcher_reports_cancellation() {
    let (registry, _powerdns, _http) = test_registry();
    let dispatcher = dispatcher(registry, None);
    dispatcher.cancellation_token().cancel();

    let result = dispatcher
        .cancellable(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(Error::Cancelled)));
}
