#![allow(clippy::unwrap_used)]
// Integration tests for the appliance device model using wiremock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use homeconnect_api::{
    ApiClient, AuthConfig, CredentialRecord, EventKind, EventRouter, RateGate, StreamEvent,
    TokenAuthority, TransportConfig,
};
use homeconnect_core::{
    Appliance, ApplianceEvent, ApplianceInfo, ApplianceSettings, CoreError, Item, KeyValueStore,
    MemoryStore, keys,
};

const HA_ID: &str = "BOSCH-HBG634BS1-68A40E123456";

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    server: MockServer,
    store: Arc<MemoryStore>,
    appliance: Appliance,
}

fn info(connected: bool) -> ApplianceInfo {
    ApplianceInfo {
        ha_id: HA_ID.into(),
        name: "Oven".into(),
        kind: "Oven".into(),
        brand: "Bosch".into(),
        vib: "HBG634BS1".into(),
        enumber: "HBG634BS1/01".into(),
        connected,
    }
}

async fn setup_with(scopes: &[&str], connected: bool, settings: ApplianceSettings) -> Harness {
    let server = MockServer::start().await;
    let store = Arc::new(MemoryStore::new());
    let record = CredentialRecord {
        refresh_token: "refresh".into(),
        access_token: Some("access".into()),
        access_expires: Utc::now() + TimeDelta::days(1),
        scopes: scopes.iter().map(|s| (*s).to_owned()).collect(),
    };
    store
        .set("token client", serde_json::to_value(record).unwrap(), None)
        .unwrap();

    let config = AuthConfig {
        base_url: Some(Url::parse(&server.uri()).unwrap()),
        client_id: "client".into(),
        ..AuthConfig::default()
    };
    let gate = RateGate::new();
    let transport = TransportConfig::default();
    let auth = TokenAuthority::new(config, store.clone(), gate.clone(), &transport).unwrap();
    let client = ApiClient::new(auth, gate, &transport, 10).unwrap();

    let appliance = Appliance::new(
        info(connected),
        client,
        store.clone(),
        settings,
        CancellationToken::new(),
    );
    Harness {
        server,
        store,
        appliance,
    }
}

async fn setup(scopes: &[&str]) -> Harness {
    setup_with(scopes, true, ApplianceSettings::default()).await
}

fn appliance_path(suffix: &str) -> String {
    format!("/api/homeappliances/{HA_ID}/{suffix}")
}

fn ok_empty() -> ResponseTemplate {
    ResponseTemplate::new(204)
}

// ── Preconditions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_set_setting_without_scope_sends_nothing() {
    let h = setup(&["IdentifyAppliance", "Monitor"]).await;

    Mock::given(method("PUT"))
        .respond_with(ok_empty())
        .expect(0)
        .mount(&h.server)
        .await;

    let err = h
        .appliance
        .set_setting(keys::POWER_STATE, json!("BSH.Common.EnumType.PowerState.Off"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CoreError::ScopeNotAuthorised { ref scope, .. } if scope == "Settings"),
        "got {err:?}"
    );
    h.server.verify().await;
}

#[tokio::test]
async fn test_type_prefixed_scope_is_accepted() {
    let h = setup(&["Oven-Settings"]).await;
    assert!(h.appliance.require_settings().is_ok());
    assert!(h.appliance.require_control().is_err());
}

#[tokio::test]
async fn test_remote_start_disabled_fails_before_request() {
    let h = setup(&["Control"]).await;

    Mock::given(method("PUT"))
        .respond_with(ok_empty())
        .expect(0)
        .mount(&h.server)
        .await;

    h.appliance.update(vec![
        Item::new(keys::REMOTE_CONTROL_ACTIVE, true),
        Item::new(keys::REMOTE_CONTROL_START_ALLOWED, false),
    ]);
    let err = h
        .appliance
        .start_program(Some("Cooking.Oven.Program.HeatingMode.HotAir"), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::RemoteStartDisabled { .. }), "got {err:?}");

    h.appliance
        .update(vec![Item::new(keys::LOCAL_CONTROL_ACTIVE, true)]);
    let err = h.appliance.stop_program().await.unwrap_err();
    assert!(matches!(err, CoreError::LocalControlActive { .. }), "got {err:?}");
    assert!(err.is_precondition());
    h.server.verify().await;
}

#[tokio::test]
async fn test_disconnected_appliance_rejects_settings_write() {
    let h = setup_with(&["Settings"], false, ApplianceSettings::default()).await;
    let err = h
        .appliance
        .set_setting(keys::POWER_STATE, json!("BSH.Common.EnumType.PowerState.On"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Disconnected { .. }), "got {err:?}");
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_writes_to_one_setting_send_once() {
    let h = setup(&["Settings"]).await;

    Mock::given(method("PUT"))
        .and(path(appliance_path(&format!("settings/{}", keys::POWER_STATE))))
        .and(body_json(json!({"data": {
            "key": keys::POWER_STATE,
            "value": "BSH.Common.EnumType.PowerState.Standby"
        }})))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&h.server)
        .await;

    let a = &h.appliance;
    let (first, second) = tokio::join!(
        a.set_setting(keys::POWER_STATE, json!("BSH.Common.EnumType.PowerState.On")),
        a.set_setting(keys::POWER_STATE, json!("BSH.Common.EnumType.PowerState.Standby")),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(
        a.get_item(keys::POWER_STATE).unwrap().value,
        json!("BSH.Common.EnumType.PowerState.Standby")
    );
    h.server.verify().await;
}

#[tokio::test]
async fn test_active_options_merge_into_one_request() {
    let h = setup(&["Control"]).await;

    Mock::given(method("PUT"))
        .and(path(appliance_path("programs/active/options")))
        .and(body_json(json!({"data": {"options": [
            {"key": "Cooking.Oven.Option.SetpointTemperature", "value": 200, "unit": "°C"},
            {"key": "BSH.Common.Option.Duration", "value": 1800, "unit": "seconds"}
        ]}})))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&h.server)
        .await;

    let mut temperature = Item::new("Cooking.Oven.Option.SetpointTemperature", 180);
    temperature.unit = Some("°C".into());
    let mut later = temperature.clone();
    later.value = json!(200);
    let mut duration = Item::new("BSH.Common.Option.Duration", 1800);
    duration.unit = Some("seconds".into());

    let a = &h.appliance;
    let (x, y, z) = tokio::join!(
        a.set_active_program_option(temperature),
        a.set_active_program_option(duration),
        a.set_active_program_option(later),
    );
    x.unwrap();
    y.unwrap();
    z.unwrap();
    h.server.verify().await;
}

#[tokio::test]
async fn test_stop_without_active_program_is_named() {
    let h = setup(&["Control"]).await;

    Mock::given(method("DELETE"))
        .and(path(appliance_path("programs/active")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"key": keys::NO_PROGRAM_ACTIVE, "description": "No program active"}
        })))
        .mount(&h.server)
        .await;

    let err = h.appliance.stop_program().await.unwrap_err();
    assert!(matches!(err, CoreError::NoProgramActive { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_start_uses_selected_program() {
    let h = setup(&["Control"]).await;

    Mock::given(method("PUT"))
        .and(path(appliance_path("programs/active")))
        .and(body_json(json!({"data": {"key": "Cooking.Oven.Program.HeatingMode.PreHeating"}})))
        .respond_with(ok_empty())
        .expect(1)
        .mount(&h.server)
        .await;

    h.appliance.update(vec![Item::new(
        keys::SELECTED_PROGRAM,
        "Cooking.Oven.Program.HeatingMode.PreHeating",
    )]);
    h.appliance.start_program(None, vec![]).await.unwrap();
    assert_eq!(
        h.appliance.get_item(keys::ACTIVE_PROGRAM).unwrap().value,
        json!("Cooking.Oven.Program.HeatingMode.PreHeating")
    );
    h.server.verify().await;
}

// ── Cached reads ────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_cached_uses_fresh_value_without_refresh() {
    let h = setup(&["Control"]).await;
    h.store
        .set(
            &format!("{HA_ID} answer"),
            json!(42),
            Some(Duration::from_secs(3600)),
        )
        .unwrap();

    let calls = AtomicUsize::new(0);
    let value: i64 = h
        .appliance
        .get_cached("answer", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_get_cached_refreshes_expired_value() {
    let h = setup(&["Control"]).await;
    h.store
        .set(&format!("{HA_ID} answer"), json!(42), Some(Duration::ZERO))
        .unwrap();

    let value: i64 = h
        .appliance
        .get_cached("answer", || async { Ok(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(h.store.get(&format!("{HA_ID} answer")), Some(json!(7)));
    assert!(!h.store.has_expired(&format!("{HA_ID} answer")));
}

#[tokio::test]
async fn test_get_cached_falls_back_to_stale_value() {
    let h = setup(&["Control"]).await;
    h.store
        .set(&format!("{HA_ID} answer"), json!(42), Some(Duration::ZERO))
        .unwrap();

    let value: i64 = h
        .appliance
        .get_cached("answer", || async {
            Err(CoreError::Internal("vendor unavailable".into()))
        })
        .await
        .unwrap();
    assert_eq!(value, 42);
}

#[tokio::test]
async fn test_get_cached_without_fallback_propagates() {
    let h = setup(&["Control"]).await;
    let err = h
        .appliance
        .get_cached::<i64, _, _>("answer", || async {
            Err(CoreError::Internal("vendor unavailable".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Internal(_)));
}

#[tokio::test]
async fn test_program_definitions_are_cached() {
    let h = setup(&["Control"]).await;

    Mock::given(method("GET"))
        .and(path(appliance_path("programs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"programs": [{"key": "Cooking.Oven.Program.HeatingMode.HotAir"}]}
        })))
        .expect(1)
        .mount(&h.server)
        .await;

    let first = h.appliance.get_all_programs().await.unwrap();
    let second = h.appliance.get_all_programs().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].key, "Cooking.Oven.Program.HeatingMode.HotAir");
    h.server.verify().await;
}

// ── Connection state and resync ─────────────────────────────────────

fn status_body() -> Value {
    json!({"data": {"status": [
        {"key": keys::OPERATION_STATE, "value": keys::OPERATION_STATE_READY},
        {"key": keys::REMOTE_CONTROL_ACTIVE, "value": true}
    ]}})
}

async fn next_event(rx: &mut broadcast::Receiver<ApplianceEvent>) -> ApplianceEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_reconnect_triggers_exactly_one_resync() {
    let settings = ApplianceSettings {
        poll_programs: false,
        ..ApplianceSettings::default()
    };
    let h = setup_with(&["Monitor"], false, settings).await;

    Mock::given(method("GET"))
        .and(path(appliance_path("status")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(status_body())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let router = EventRouter::new();
    let mut events = h.appliance.subscribe();
    let mut state = h.appliance.on_item(keys::OPERATION_STATE);
    h.appliance.attach(router.subscribe(HA_ID));

    router.dispatch(StreamEvent::new(EventKind::Disconnected, Some(HA_ID.into())));
    router.dispatch(StreamEvent::new(EventKind::Connected, Some(HA_ID.into())));
    router.dispatch(StreamEvent::new(EventKind::Connected, Some(HA_ID.into())));

    assert!(matches!(next_event(&mut events).await, ApplianceEvent::Connected(true)));
    let item = tokio::time::timeout(Duration::from_secs(5), state.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.value, json!(keys::OPERATION_STATE_READY));
    assert!(h.appliance.is_connected());

    // Give a duplicate resync time to show up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.server.verify().await;
    h.appliance.shutdown();
}

#[tokio::test]
async fn test_stream_items_update_cache() {
    let h = setup_with(&["Monitor"], false, ApplianceSettings::default()).await;
    let router = EventRouter::new();
    let mut listener = h.appliance.on_item("BSH.Common.Status.DoorState");
    h.appliance.attach(router.subscribe(HA_ID));

    let mut event = StreamEvent::new(EventKind::Status, Some(HA_ID.into()));
    event.items = vec![
        Item::new("BSH.Common.Status.DoorState", "BSH.Common.EnumType.DoorState.Open"),
        Item::new(keys::OPERATION_STATE, keys::OPERATION_STATE_RUN),
    ];
    router.dispatch(event);

    let door = tokio::time::timeout(Duration::from_secs(5), listener.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(door.value, json!("BSH.Common.EnumType.DoorState.Open"));
    // The whole batch is visible to the first listener.
    assert_eq!(
        h.appliance.get_item(keys::OPERATION_STATE).unwrap().value,
        json!(keys::OPERATION_STATE_RUN)
    );
    h.appliance.shutdown();
}

#[tokio::test]
async fn test_depaired_announces_and_stops() {
    let h = setup_with(&["Monitor"], false, ApplianceSettings::default()).await;
    let router = EventRouter::new();
    let mut events = h.appliance.subscribe();
    h.appliance.attach(router.subscribe(HA_ID));

    router.dispatch(StreamEvent::new(EventKind::Depaired, Some(HA_ID.into())));
    assert!(matches!(next_event(&mut events).await, ApplianceEvent::Depaired));

    let err = h.appliance.wait_connected(false).await.unwrap_err();
    assert!(matches!(err, CoreError::ApplianceNotFound { .. }));
}

#[tokio::test]
async fn test_wait_operation_state() {
    let h = setup(&["Monitor"]).await;

    let err = h
        .appliance
        .wait_operation_state(&[keys::OPERATION_STATE_RUN], Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }));

    let appliance = h.appliance.clone();
    let waiter = tokio::spawn(async move {
        appliance
            .wait_operation_state(&[keys::OPERATION_STATE_RUN], Duration::from_secs(5))
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.appliance
        .update(vec![Item::new(keys::OPERATION_STATE, keys::OPERATION_STATE_RUN)]);
    assert_eq!(waiter.await.unwrap().unwrap(), keys::OPERATION_STATE_RUN);
}
