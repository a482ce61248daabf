//! Minimal iCalendar (RFC 5545) reader.
//!
//! Only what the checkout feed needs: VEVENT components with their UID,
//! SUMMARY, DESCRIPTION, DTSTART and DTEND properties, plus VTIMEZONE blocks
//! for TZIDs that are not IANA names. Other components such as VALARM are
//! skipped.

use super::models::{extract_reservation_id, CalendarEvent, EventTime};
use super::time::{iana_zone, ICAL_DATE_TIME};
use super::zone::ZoneDefinition;
use crate::error::{parse_error, AppResult};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// Parse an iCalendar document into events, in feed order
pub fn parse_calendar(text: &str) -> AppResult<Vec<CalendarEvent>> {
    let lines = unfold_lines(text);

    if !lines
        .iter()
        .any(|line| line.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(parse_error("Feed is not an iCalendar document"));
    }

    let mut events = Vec::new();
    let mut zones: HashMap<String, ZoneDefinition> = HashMap::new();
    // Names of the open components, innermost last
    let mut stack: Vec<String> = Vec::new();
    let mut event: Option<CalendarEvent> = None;
    let mut zone: Option<ZoneDefinition> = None;
    let mut observance: Vec<(String, String)> = Vec::new();

    for line in &lines {
        let Some(property) = Property::parse(line) else {
            continue;
        };

        match property.name.as_str() {
            "BEGIN" => {
                let component = property.value.to_ascii_uppercase();
                match component.as_str() {
                    "VEVENT" if event.is_none() => event = Some(CalendarEvent::default()),
                    "VTIMEZONE" => zone = Some(ZoneDefinition::new("")),
                    "STANDARD" | "DAYLIGHT" => observance.clear(),
                    _ => {}
                }
                stack.push(component);
            }
            "END" => {
                let component = property.value.to_ascii_uppercase();
                if stack.last() != Some(&component) {
                    continue;
                }
                stack.pop();
                match component.as_str() {
                    "VEVENT" => {
                        if let Some(mut finished) = event.take() {
                            finished.reservation_id = finished
                                .description
                                .as_deref()
                                .and_then(extract_reservation_id);
                            events.push(finished);
                        }
                    }
                    "VTIMEZONE" => {
                        if let Some(finished) = zone.take() {
                            if !finished.tzid.is_empty() {
                                zones.insert(finished.tzid.clone(), finished);
                            }
                        }
                    }
                    "STANDARD" | "DAYLIGHT" => {
                        if let Some(zone) = zone.as_mut() {
                            zone.add_observance(&observance);
                        }
                        observance.clear();
                    }
                    _ => {}
                }
            }
            name => match stack.last().map(String::as_str) {
                Some("VEVENT") => {
                    if let Some(event) = event.as_mut() {
                        apply_property(event, name, &property);
                    }
                }
                Some("VTIMEZONE") if name == "TZID" => {
                    if let Some(zone) = zone.as_mut() {
                        zone.tzid = property.value.clone();
                    }
                }
                Some("STANDARD") | Some("DAYLIGHT") => {
                    observance.push((name.to_string(), property.value.clone()));
                }
                _ => {}
            },
        }
    }

    // VTIMEZONE blocks may follow the events that use them
    for event in &mut events {
        for time in [event.start.as_mut(), event.end.as_mut()].into_iter().flatten() {
            attach_zone_offset(time, &zones);
        }
    }

    Ok(events)
}

/// Record the feed-defined UTC offset for a TZID chrono-tz does not know
fn attach_zone_offset(time: &mut EventTime, zones: &HashMap<String, ZoneDefinition>) {
    if time.is_date || time.value.ends_with('Z') {
        return;
    }
    let Some(tzid) = time.tzid.as_deref() else {
        return;
    };
    if iana_zone(tzid).is_some() {
        return;
    }
    let Some(zone) = zones.get(tzid) else {
        return;
    };
    if let Ok(local) = NaiveDateTime::parse_from_str(&time.value, ICAL_DATE_TIME) {
        time.utc_offset_seconds = zone.offset_at(local).map(|o| o.local_minus_utc());
    }
}

fn apply_property(event: &mut CalendarEvent, name: &str, property: &Property) {
    match name {
        "UID" => event.uid = Some(property.value.clone()),
        "SUMMARY" => event.summary = Some(unescape_text(&property.value)),
        "DESCRIPTION" => event.description = Some(unescape_text(&property.value)),
        "DTSTART" => event.start = Some(property.event_time()),
        "DTEND" => event.end = Some(property.event_time()),
        _ => {}
    }
}

/// A single content line split into name, parameters and value
struct Property {
    name: String,
    params: Vec<(String, String)>,
    value: String,
}

impl Property {
    fn parse(line: &str) -> Option<Self> {
        // The value starts at the first colon outside a quoted parameter
        let mut in_quotes = false;
        let split = line.char_indices().find_map(|(i, c)| match c {
            '"' => {
                in_quotes = !in_quotes;
                None
            }
            ':' if !in_quotes => Some(i),
            _ => None,
        })?;

        let (head, value) = (&line[..split], &line[split + 1..]);
        let mut parts = head.split(';');
        let name = parts.next()?.trim().to_ascii_uppercase();
        if name.is_empty() {
            return None;
        }

        let params = parts
            .filter_map(|param| {
                let (key, value) = param.split_once('=')?;
                Some((
                    key.trim().to_ascii_uppercase(),
                    value.trim().trim_matches('"').to_string(),
                ))
            })
            .collect();

        Some(Self {
            name,
            params,
            value: value.trim().to_string(),
        })
    }

    fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn event_time(&self) -> EventTime {
        let is_date = self
            .param("VALUE")
            .map(|v| v.eq_ignore_ascii_case("DATE"))
            .unwrap_or(false)
            || (self.value.len() == 8 && self.value.chars().all(|c| c.is_ascii_digit()));

        EventTime {
            value: self.value.clone(),
            tzid: self.param("TZID").map(|v| v.to_string()),
            is_date,
            utc_offset_seconds: None,
        }
    }
}

/// Join folded content lines (continuations start with a space or tab)
fn unfold_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();

    for raw in text.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix(' ').or_else(|| raw.strip_prefix('\t')) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }

    lines
}

/// Undo TEXT value escaping
fn unescape_text(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => result.push('\n'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}
