use super::models::{CalendarEvent, EventTime};
use crate::error::{parse_error, AppResult};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

pub(crate) const ICAL_DATE_TIME: &str = "%Y%m%dT%H%M%S";

/// Get event start time as a UTC instant
pub fn event_start(event: &CalendarEvent) -> AppResult<DateTime<Utc>> {
    let start = event
        .start
        .as_ref()
        .ok_or_else(|| parse_error("Event has no start time"))?;
    parse_event_time(start)
}

/// Look up a TZID in the IANA database.
///
/// Vendor-prefixed ids such as `/mozilla.org/20050126_1/America/New_York`
/// resolve to their trailing IANA name.
pub fn iana_zone(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim();
    if let Ok(tz) = tzid.parse::<Tz>() {
        return Some(tz);
    }
    tzid.match_indices('/')
        .find_map(|(i, _)| tzid[i + 1..].parse::<Tz>().ok())
}

/// Resolve a DTSTART-style value to UTC.
///
/// Floating times (no `Z`, no TZID) and all-day dates are read as UTC.
/// A TZID is looked up as an IANA zone first, then through the offset the
/// feed's VTIMEZONE gave for it.
pub fn parse_event_time(time: &EventTime) -> AppResult<DateTime<Utc>> {
    let value = time.value.trim();
    if value.is_empty() {
        return Err(parse_error("Empty start time"));
    }

    if time.is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
            .map_err(|e| parse_error(&format!("Failed to parse date '{}': {}", value, e)))?;
        let dt = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| parse_error("Failed to create datetime"))?;
        return Ok(Utc.from_utc_datetime(&dt));
    }

    if let Some(utc_value) = value.strip_suffix('Z') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(utc_value, ICAL_DATE_TIME) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, ICAL_DATE_TIME)
        .map_err(|e| parse_error(&format!("Failed to parse datetime '{}': {}", value, e)))?;

    match &time.tzid {
        Some(tzid) => {
            let Some(tz) = iana_zone(tzid) else {
                let offset = time
                    .utc_offset_seconds
                    .and_then(FixedOffset::east_opt)
                    .ok_or_else(|| parse_error(&format!("Unknown time zone '{}'", tzid)))?;
                return offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| parse_error(&format!("Cannot place {} at {}", naive, offset)));
            };
            match tz.from_local_datetime(&naive) {
                LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
                // Repeated hour at a DST fall-back: take the first occurrence
                LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
                LocalResult::None => Err(parse_error(&format!(
                    "Local time {} does not exist in {}",
                    naive, tzid
                ))),
            }
        }
        None => Ok(Utc.from_utc_datetime(&naive)),
    }
}
