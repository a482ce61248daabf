#![cfg(feature = "status-api")]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use nest_checkout::components::calendar::{CalendarEvent, CalendarSource, EventTime};
use nest_checkout::components::checkout::{CheckoutPoller, DetectorSettings, InMemoryLedger};
use nest_checkout::components::nest::{
    DeviceClass, DeviceControl, Dispatcher, Thermostat, ThermostatMode,
};
use nest_checkout::components::notifier::{CheckoutNotice, Notifier};
use nest_checkout::components::status_api::{router, ApiState};
use nest_checkout::config::Config;
use nest_checkout::error::{device_error, AppResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

struct FixedFeed(Vec<CalendarEvent>);

#[async_trait]
impl CalendarSource for FixedFeed {
    async fn fetch(&self) -> AppResult<Vec<CalendarEvent>> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct TwoThermostats {
    /// How long each set_mode takes
    delay: StdDuration,
    calls: Mutex<Vec<String>>,
}

impl TwoThermostats {
    fn slow(delay: StdDuration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceControl for TwoThermostats {
    async fn list_devices(&self, _class: DeviceClass, _force: bool) -> AppResult<Vec<Thermostat>> {
        Ok(["living", "bedroom"]
            .iter()
            .map(|id| Thermostat {
                device_id: id.to_string(),
                name: format!("enterprises/test/devices/{}", id),
                display_name: id.to_string(),
                current_mode: "HEAT".to_string(),
                ambient_temperature_celsius: Some(21.5),
                humidity_percent: None,
            })
            .collect())
    }

    async fn set_mode(&self, device_id: &str, _mode: ThermostatMode) -> AppResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(device_id.to_string());
        match device_id {
            "living" | "bedroom" => Ok(()),
            other => Err(device_error(&format!("unknown device {}", other))),
        }
    }
}

fn test_config() -> Config {
    let vars: HashMap<&str, &str> = [
        ("ICAL_URL", "https://example.com/feed.ics"),
        ("GOOGLE_CLIENT_ID", "client"),
        ("GOOGLE_CLIENT_SECRET", "secret"),
        ("GOOGLE_REFRESH_TOKEN", "refresh"),
        ("NEST_PROJECT_ID", "project"),
    ]
    .into_iter()
    .collect();
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap()
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<CheckoutNotice>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn recipients(&self) -> Vec<String> {
        vec!["owner@example.com".to_string()]
    }

    async fn send(&self, notice: &CheckoutNotice) -> AppResult<()> {
        self.sent.lock().unwrap().push(notice.clone());
        Ok(())
    }
}

async fn serve(events: Vec<CalendarEvent>) -> String {
    serve_with(events, Arc::new(TwoThermostats::default()), None).await
}

async fn serve_with(
    events: Vec<CalendarEvent>,
    devices: Arc<TwoThermostats>,
    notifier: Option<Arc<dyn Notifier>>,
) -> String {
    let devices: Arc<dyn DeviceControl> = devices;
    let dispatcher = Dispatcher::new(Arc::clone(&devices), Vec::new(), StdDuration::from_secs(5));
    let poller = Arc::new(CheckoutPoller::new(
        Arc::new(FixedFeed(events)),
        dispatcher,
        DetectorSettings::default(),
        Duration::minutes(30),
        StdDuration::from_secs(5),
        Box::new(InMemoryLedger::new()),
    ));

    let state = ApiState {
        config: Arc::new(RwLock::new(test_config())),
        poller,
        devices,
        token_manager: None,
        notifier,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

fn recent_checkout() -> CalendarEvent {
    let start = Utc::now() - Duration::minutes(5);
    CalendarEvent {
        uid: Some("abc@feed".to_string()),
        reservation_id: Some("HM12345".to_string()),
        summary: Some("Checkout".to_string()),
        description: Some("Reservation: HM12345\nTURN_OFF_THERMOSTATS".to_string()),
        start: Some(EventTime::utc(start.format("%Y%m%dT%H%M%SZ").to_string())),
        end: None,
    }
}

#[tokio::test]
async fn test_health() {
    let base = serve(Vec::new()).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_manual_poll_and_status() {
    let base = serve(vec![recent_checkout()]).await;
    let client = reqwest::Client::new();

    let response = client.post(format!("{}/poll", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["actionable"], 1);
    assert_eq!(result["checkouts"][0]["key"], "HM12345");
    assert_eq!(result["checkouts"][0]["outcomes"][0]["status"], "succeeded");

    let status: Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["handled_checkouts"], 1);
    assert_eq!(status["last_action_result"]["key"], "HM12345");
    assert_eq!(status["config"]["poll_interval_minutes"], 10);
    assert!(status.get("google_client_secret").is_none());
}

#[tokio::test]
async fn test_list_devices() {
    let base = serve(Vec::new()).await;
    let devices: Value = reqwest::get(format!("{}/devices", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(devices.as_array().unwrap().len(), 2);
    assert_eq!(devices[0]["device_id"], "living");
}

#[tokio::test]
async fn test_turn_off_single_device() {
    let base = serve(Vec::new()).await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("{}/devices/living/off", base))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let outcomes: Value = ok.json().await.unwrap();
    assert_eq!(outcomes[0]["target"], "living");

    let failed = client
        .post(format!("{}/devices/garage/off", base))
        .send()
        .await
        .unwrap();
    assert_eq!(failed.status(), 502);
    let outcomes: Value = failed.json().await.unwrap();
    assert_eq!(outcomes[0]["status"], "failed");
}

#[tokio::test]
async fn test_poll_finishes_after_client_disconnects() {
    let devices = Arc::new(TwoThermostats::slow(StdDuration::from_millis(500)));
    let base = serve_with(vec![recent_checkout()], devices.clone(), None).await;

    let impatient = reqwest::Client::builder()
        .timeout(StdDuration::from_millis(100))
        .build()
        .unwrap();
    let dropped = impatient.post(format!("{}/poll", base)).send().await;
    assert!(dropped.is_err());

    tokio::time::sleep(StdDuration::from_millis(1500)).await;

    let mut calls = devices.calls();
    calls.sort();
    assert_eq!(calls, vec!["bedroom", "living"]);

    let status: Value = reqwest::get(format!("{}/status", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["handled_checkouts"], 1);
    assert_eq!(status["last_action_result"]["key"], "HM12345");
    assert_eq!(
        status["last_action_result"]["outcomes"][0]["status"],
        "succeeded"
    );
}

#[tokio::test]
async fn test_test_notification_without_smtp() {
    let base = serve(Vec::new()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/test-notification", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("SMTP_ENABLED"));
}

#[tokio::test]
async fn test_test_notification_uses_device_names() {
    let notifier = Arc::new(RecordingNotifier::default());
    let base = serve_with(
        Vec::new(),
        Arc::new(TwoThermostats::default()),
        Some(notifier.clone()),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/test-notification", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["recipients"][0], "owner@example.com");

    let sent = notifier.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].reservation_id, "TEST-123");
    let names: Vec<&str> = sent[0].thermostats.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["living", "bedroom"]);
}
