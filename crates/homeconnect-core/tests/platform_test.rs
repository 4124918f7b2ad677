#![allow(clippy::unwrap_used)]
// Integration tests for `Platform` discovery and lifecycle routing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeconnect_api::{CredentialRecord, EventKind, StreamEvent};
use homeconnect_core::{
    ClientConfig, CoreError, KeyValueStore, MemoryStore, Platform, PlatformEvent, StreamMode,
};

const WASHER: &str = "BOSCH-WAW28440-68A40E000001";
const DRYER: &str = "SIEMENS-WT47W5W0-68A40E000002";

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Platform) {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let record = CredentialRecord {
        refresh_token: "refresh".into(),
        access_token: Some("access".into()),
        access_expires: Utc::now() + TimeDelta::days(1),
        scopes: vec!["IdentifyAppliance".into()],
    };
    store
        .set("token client", serde_json::to_value(record).unwrap(), None)
        .unwrap();

    let config = ClientConfig {
        base_url: Some(Url::parse(&server.uri()).unwrap()),
        client_id: "client".into(),
        stream_mode: StreamMode::Off,
        ..ClientConfig::default()
    };
    let platform = Platform::new(config, store).unwrap();
    (server, platform)
}

fn appliance(ha_id: &str, kind: &str) -> serde_json::Value {
    json!({"haId": ha_id, "name": kind, "type": kind, "connected": true})
}

async fn mount_list(server: &MockServer, appliances: &[serde_json::Value], times: u64) {
    Mock::given(method("GET"))
        .and(path("/api/homeappliances"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"homeappliances": appliances}
        })))
        .up_to_n_times(times)
        .mount(server)
        .await;
}

async fn next(rx: &mut broadcast::Receiver<PlatformEvent>) -> PlatformEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_discovers_appliances() {
    let (server, platform) = setup().await;
    mount_list(&server, &[appliance(WASHER, "Washer")], 1).await;

    let mut events = platform.subscribe();
    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.wait_discovered())
        .await
        .unwrap();

    match next(&mut events).await {
        PlatformEvent::Added(appliance) => {
            assert_eq!(appliance.ha_id(), WASHER);
            assert_eq!(appliance.kind(), "Washer");
            assert!(appliance.is_connected());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(platform.appliances().len(), 1);
    assert!(matches!(
        platform.appliance(DRYER),
        Err(CoreError::ApplianceNotFound { .. })
    ));

    platform.shutdown().await;
}

#[tokio::test]
async fn test_paired_unknown_appliance_triggers_rediscovery() {
    let (server, platform) = setup().await;
    mount_list(&server, &[appliance(WASHER, "Washer")], 1).await;

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.wait_discovered())
        .await
        .unwrap();
    let mut events = platform.subscribe();

    // Later reads also report the dryer.
    mount_list(
        &server,
        &[appliance(WASHER, "Washer"), appliance(DRYER, "Dryer")],
        u64::MAX,
    )
    .await;
    platform
        .router()
        .dispatch(StreamEvent::new(EventKind::Paired, Some(DRYER.into())));

    match next(&mut events).await {
        PlatformEvent::Added(appliance) => assert_eq!(appliance.ha_id(), DRYER),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(platform.appliances().len(), 2);

    platform.shutdown().await;
}

#[tokio::test]
async fn test_depaired_appliance_is_removed() {
    let (server, platform) = setup().await;
    mount_list(
        &server,
        &[appliance(WASHER, "Washer"), appliance(DRYER, "Dryer")],
        1,
    )
    .await;

    platform.start();
    tokio::time::timeout(Duration::from_secs(5), platform.wait_discovered())
        .await
        .unwrap();
    let mut events = platform.subscribe();
    let dryer = platform.appliance(DRYER).unwrap();
    let mut dryer_events = dryer.subscribe();

    platform
        .router()
        .dispatch(StreamEvent::new(EventKind::Depaired, Some(DRYER.into())));

    match next(&mut events).await {
        PlatformEvent::Removed(ha_id) => assert_eq!(ha_id, DRYER),
        other => panic!("unexpected {other:?}"),
    }
    assert!(platform.appliance(DRYER).is_err());
    assert!(platform.appliance(WASHER).is_ok());

    // The appliance announced its removal exactly once.
    let mut depaired = 0;
    while let Ok(event) = dryer_events.try_recv() {
        if matches!(event, homeconnect_core::ApplianceEvent::Depaired) {
            depaired += 1;
        }
    }
    assert_eq!(depaired, 1);

    platform.shutdown().await;
}

#[tokio::test]
async fn test_discovery_removes_vanished_appliances() {
    let (server, platform) = setup().await;
    mount_list(
        &server,
        &[appliance(WASHER, "Washer"), appliance(DRYER, "Dryer")],
        1,
    )
    .await;

    let first = platform.discover().await.unwrap();
    assert_eq!(first.len(), 2);

    mount_list(&server, &[appliance(WASHER, "Washer")], 1).await;
    let second = platform.discover().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].ha_id(), WASHER);
}
