use chrono::{TimeZone, Utc};
use nest_checkout::components::calendar::ical::parse_calendar;
use nest_checkout::components::calendar::time::event_start;
use nest_checkout::components::checkout::{detect, DetectorSettings, InMemoryLedger, LedgerStore};
use nest_checkout::config::{Config, FallbackKey};
use std::collections::HashMap;

/// Smoke test to verify that the config can be built from variables
#[test]
fn test_config_loads() {
    let vars: HashMap<&str, &str> = [
        ("ICAL_URL", "webcal://example.com/feed.ics"),
        ("GOOGLE_CLIENT_ID", "client"),
        ("GOOGLE_CLIENT_SECRET", "secret"),
        ("GOOGLE_REFRESH_TOKEN", "refresh"),
        ("NEST_PROJECT_ID", "project"),
        ("NEST_DEVICE_IDS", "a, b"),
        ("FALLBACK_KEY", "summary_start"),
    ]
    .into_iter()
    .collect();

    let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();

    assert_eq!(config.nest_device_ids, vec!["a", "b"]);
    assert_eq!(config.fallback_key, FallbackKey::SummaryStart);
    assert!(config.is_component_enabled("checkout_automation"));
    assert!(config.is_component_enabled("status_api"));
}

/// A realistic rental feed flows from raw text to an actionable checkout
#[test]
fn test_feed_to_checkout() {
    let feed = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:stay-1@rentals\r\n\
DTSTART;TZID=America/New_York:20240601T110000\r\n\
SUMMARY:Checkout - Lake House\r\n\
DESCRIPTION:Property: Lake House\\nGuest name: Ann Lee\\nReservation: HMX9\r\n \\nTURN_OFF_THERMOSTATS\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:stay-2@rentals\r\n\
DTSTART;VALUE=DATE:20240601\r\n\
SUMMARY:Check-in\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    let events = parse_calendar(feed).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        event_start(&events[0]).unwrap(),
        Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap()
    );

    let now = Utc.with_ymd_and_hms(2024, 6, 1, 15, 20, 0).unwrap();
    let mut ledger = InMemoryLedger::new();
    let found = detect(
        &events,
        now,
        chrono::Duration::minutes(30),
        &DetectorSettings::default(),
        &mut ledger,
    );

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].key, "HMX9");
    assert_eq!(found[0].guest_name, "Ann Lee");
    assert!(ledger.is_handled("HMX9"));
}
