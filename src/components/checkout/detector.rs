use super::ledger::LedgerStore;
use crate::components::calendar::time::event_start;
use crate::components::calendar::CalendarEvent;
use crate::config::{Config, FallbackKey, DEFAULT_TRIGGER_KEYWORD};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Summary fragments that mark a checkout event (matched case-insensitively)
const CHECKOUT_MARKERS: [&str; 2] = ["check-out", "checkout"];

/// Matching rules for a poll cycle
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub keyword: String,
    pub case_sensitive: bool,
    pub fallback_key: FallbackKey,
    /// Configured allow-list; empty means the dispatcher discovers devices
    pub targets: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            keyword: DEFAULT_TRIGGER_KEYWORD.to_string(),
            case_sensitive: true,
            fallback_key: FallbackKey::Uid,
            targets: Vec::new(),
        }
    }
}

impl DetectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keyword: config.trigger_keyword.clone(),
            case_sensitive: config.trigger_keyword_case_sensitive,
            fallback_key: config.fallback_key,
            targets: config.nest_device_ids.clone(),
        }
    }
}

/// A checkout that should turn the thermostats off this cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionableCheckout {
    /// Reservation identifier, or the fallback key
    pub key: String,
    pub start: DateTime<Utc>,
    pub summary: String,
    pub property_name: String,
    pub guest_name: String,
    pub targets: Vec<String>,
}

/// Select the events that are new, in-window checkouts carrying the keyword.
///
/// Each selected key is marked in `ledger` before it is returned, so a later
/// call never yields it again whether or not the device action succeeds.
/// Feed order is preserved.
pub fn detect(
    events: &[CalendarEvent],
    now: DateTime<Utc>,
    buffer: Duration,
    settings: &DetectorSettings,
    ledger: &mut dyn LedgerStore,
) -> Vec<ActionableCheckout> {
    let Some(window_start) = now.checked_sub_signed(buffer) else {
        warn!(
            "Checkout buffer {} reaches past the supported time range, skipping detection",
            buffer
        );
        return Vec::new();
    };
    let mut actionable = Vec::new();

    for event in events {
        let start = match event_start(event) {
            Ok(start) => start,
            Err(e) => {
                warn!(
                    "Skipping event {}: {}",
                    event.uid.as_deref().unwrap_or("<no uid>"),
                    e
                );
                continue;
            }
        };

        if start < window_start || start > now {
            continue;
        }

        if !is_checkout_summary(event.summary_text()) {
            continue;
        }

        if !has_trigger_keyword(event.description_text(), settings) {
            debug!("Checkout '{}' has no trigger keyword", event.summary_text());
            continue;
        }

        let Some(key) = dedup_key(event, start, settings.fallback_key) else {
            warn!(
                "Skipping checkout '{}' at {}: no reservation identifier",
                event.summary_text(),
                start
            );
            continue;
        };

        if ledger.is_handled(&key) {
            debug!("Checkout {} already handled", key);
            continue;
        }

        ledger.mark_handled(&key);
        info!("Actionable checkout {} (started {})", key, start);

        actionable.push(ActionableCheckout {
            key,
            start,
            summary: event.summary_text().to_string(),
            property_name: event.property_name(),
            guest_name: event.guest_name(),
            targets: settings.targets.clone(),
        });
    }

    actionable
}

pub fn is_checkout_summary(summary: &str) -> bool {
    let summary = summary.to_lowercase();
    CHECKOUT_MARKERS.iter().any(|marker| summary.contains(marker))
}

pub fn has_trigger_keyword(description: &str, settings: &DetectorSettings) -> bool {
    if settings.keyword.is_empty() {
        return false;
    }
    if settings.case_sensitive {
        description.contains(&settings.keyword)
    } else {
        description
            .to_lowercase()
            .contains(&settings.keyword.to_lowercase())
    }
}

/// Reservation identifier, or a key derived per the fallback policy
pub fn dedup_key(event: &CalendarEvent, start: DateTime<Utc>, policy: FallbackKey) -> Option<String> {
    if let Some(id) = event.reservation_id.as_deref().filter(|id| !id.is_empty()) {
        return Some(id.to_string());
    }

    match policy {
        FallbackKey::Uid => event
            .uid
            .as_deref()
            .filter(|uid| !uid.is_empty())
            .map(|uid| format!("uid:{}", uid))
            .or_else(|| Some(summary_start_key(event, start))),
        FallbackKey::SummaryStart => Some(summary_start_key(event, start)),
        FallbackKey::Skip => None,
    }
}

fn summary_start_key(event: &CalendarEvent, start: DateTime<Utc>) -> String {
    let summary: String = event.summary_text().chars().take(20).collect();
    format!("{}_{}", summary, start.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::calendar::EventTime;
    use crate::components::checkout::ledger::InMemoryLedger;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn checkout(reservation: &str, notes: &str, start: DateTime<Utc>) -> CalendarEvent {
        CalendarEvent {
            uid: Some(format!("{}@feed", reservation)),
            reservation_id: Some(reservation.to_string()),
            summary: Some("Check-out".to_string()),
            description: Some(notes.to_string()),
            start: Some(EventTime::utc(start.format("%Y%m%dT%H%M%SZ").to_string())),
            end: None,
        }
    }

    fn buffer() -> Duration {
        Duration::minutes(30)
    }

    #[test]
    fn test_in_window_checkout_is_actionable() {
        let mut ledger = InMemoryLedger::new();
        let events = vec![checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(10))];

        let result = detect(&events, now(), buffer(), &DetectorSettings::default(), &mut ledger);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "R1");
        assert_eq!(result[0].start, now() - Duration::minutes(10));
        assert!(ledger.is_handled("R1"));
    }

    #[test]
    fn test_window_bounds() {
        let settings = DetectorSettings::default();
        let cases = [
            (now() - Duration::minutes(40), false),
            (now() - Duration::minutes(30) - Duration::seconds(1), false),
            (now() - Duration::minutes(30), true),
            (now(), true),
            (now() + Duration::seconds(1), false),
            (now() + Duration::hours(2), false),
        ];

        for (i, (start, expected)) in cases.into_iter().enumerate() {
            let mut ledger = InMemoryLedger::new();
            let events = vec![checkout(&format!("R{}", i), "TURN_OFF_THERMOSTATS", start)];
            let result = detect(&events, now(), buffer(), &settings, &mut ledger);
            assert_eq!(result.len() == 1, expected, "start {}", start);
            assert_eq!(ledger.len() == 1, expected);
        }
    }

    #[test]
    fn test_oversized_buffer_does_not_panic() {
        let mut ledger = InMemoryLedger::new();
        let events = vec![checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(5))];

        let result = detect(
            &events,
            now(),
            Duration::weeks(1_000_000_000),
            &DetectorSettings::default(),
            &mut ledger,
        );

        assert!(result.is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_missing_keyword_excluded() {
        let mut ledger = InMemoryLedger::new();
        let events = vec![checkout("R1", "please clean the pool", now() - Duration::minutes(5))];

        let result = detect(&events, now(), buffer(), &DetectorSettings::default(), &mut ledger);
        assert!(result.is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_keyword_case_sensitivity() {
        let events = vec![checkout("R1", "turn_off_thermostats", now() - Duration::minutes(5))];

        let mut ledger = InMemoryLedger::new();
        let strict = DetectorSettings::default();
        assert!(detect(&events, now(), buffer(), &strict, &mut ledger).is_empty());

        let relaxed = DetectorSettings {
            case_sensitive: false,
            ..Default::default()
        };
        assert_eq!(detect(&events, now(), buffer(), &relaxed, &mut ledger).len(), 1);
    }

    #[test]
    fn test_summary_must_mention_checkout() {
        let mut ledger = InMemoryLedger::new();
        let mut event = checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(5));
        event.summary = Some("Check-in".to_string());
        assert!(detect(&[event.clone()], now(), buffer(), &DetectorSettings::default(), &mut ledger).is_empty());

        event.summary = Some("CHECKOUT - Lake House".to_string());
        assert_eq!(detect(&[event], now(), buffer(), &DetectorSettings::default(), &mut ledger).len(), 1);
    }

    #[test]
    fn test_handled_reservation_excluded() {
        let mut ledger = InMemoryLedger::new();
        ledger.mark_handled("R1");
        let events = vec![checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(5))];

        assert!(detect(&events, now(), buffer(), &DetectorSettings::default(), &mut ledger).is_empty());
    }

    #[test]
    fn test_detect_is_idempotent() {
        let mut ledger = InMemoryLedger::new();
        let events = vec![
            checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(5)),
            checkout("R2", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(15)),
        ];
        let settings = DetectorSettings::default();

        assert_eq!(detect(&events, now(), buffer(), &settings, &mut ledger).len(), 2);
        assert!(detect(&events, now(), buffer(), &settings, &mut ledger).is_empty());
    }

    #[test]
    fn test_feed_order_and_duplicates() {
        let mut ledger = InMemoryLedger::new();
        let events = vec![
            checkout("R2", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(1)),
            checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(20)),
            checkout("R2", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(1)),
        ];

        let result = detect(&events, now(), buffer(), &DetectorSettings::default(), &mut ledger);
        let keys: Vec<_> = result.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["R2", "R1"]);
    }

    #[test]
    fn test_bad_timestamp_skipped() {
        let mut ledger = InMemoryLedger::new();
        let mut broken = checkout("R1", "TURN_OFF_THERMOSTATS", now());
        broken.start = Some(EventTime::utc("yesterday"));
        let mut missing = checkout("R2", "TURN_OFF_THERMOSTATS", now());
        missing.start = None;
        let good = checkout("R3", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(2));

        let result = detect(&[broken, missing, good], now(), buffer(), &DetectorSettings::default(), &mut ledger);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key, "R3");
    }

    #[test]
    fn test_fallback_keys() {
        let start = now() - Duration::minutes(5);
        let mut event = checkout("R1", "TURN_OFF_THERMOSTATS", start);
        event.reservation_id = None;

        assert_eq!(dedup_key(&event, start, FallbackKey::Uid).as_deref(), Some("uid:R1@feed"));
        assert_eq!(
            dedup_key(&event, start, FallbackKey::SummaryStart),
            Some(format!("Check-out_{}", start.to_rfc3339()))
        );
        assert_eq!(dedup_key(&event, start, FallbackKey::Skip), None);

        event.uid = None;
        assert_eq!(
            dedup_key(&event, start, FallbackKey::Uid),
            Some(format!("Check-out_{}", start.to_rfc3339()))
        );
    }

    #[test]
    fn test_skip_policy_ignores_unidentified_events() {
        let mut ledger = InMemoryLedger::new();
        let mut event = checkout("R1", "TURN_OFF_THERMOSTATS", now() - Duration::minutes(5));
        event.reservation_id = None;
        let settings = DetectorSettings {
            fallback_key: FallbackKey::Skip,
            ..Default::default()
        };

        assert!(detect(&[event], now(), buffer(), &settings, &mut ledger).is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_targets_come_from_settings() {
        let mut ledger = InMemoryLedger::new();
        let settings = DetectorSettings {
            targets: vec!["dev-1".to_string()],
            ..Default::default()
        };
        let events = vec![checkout("R1", "TURN_OFF_THERMOSTATS", now())];

        let result = detect(&events, now(), buffer(), &settings, &mut ledger);
        assert_eq!(result[0].targets, vec!["dev-1"]);
    }
}
