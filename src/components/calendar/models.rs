use serde::{Deserialize, Serialize};

/// A DTSTART/DTEND value exactly as it appeared in the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventTime {
    pub value: String,
    /// TZID parameter, if any
    pub tzid: Option<String>,
    /// VALUE=DATE (all-day) form
    pub is_date: bool,
    /// Offset from the feed's VTIMEZONE when the TZID is not an IANA name
    #[serde(default)]
    pub utc_offset_seconds: Option<i32>,
}

impl EventTime {
    pub fn utc(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tzid: None,
            is_date: false,
            utc_offset_seconds: None,
        }
    }
}

/// Simplified calendar event representation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CalendarEvent {
    pub uid: Option<String>,
    pub reservation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
}

impl CalendarEvent {
    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }

    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    /// Property name from a `Property:` line in the description
    pub fn property_name(&self) -> String {
        labelled_value(self.description_text(), "Property:")
            .unwrap_or_else(|| "Unknown Property".to_string())
    }

    /// Guest name from a `Guest name:` line in the description
    pub fn guest_name(&self) -> String {
        labelled_value(self.description_text(), "Guest name:")
            .unwrap_or_else(|| "Unknown Guest".to_string())
    }
}

/// Extract a reservation code from a `Reservation: CODE` line.
///
/// The label is matched case-insensitively and the code is the run of ASCII
/// alphanumerics that follows it.
pub fn extract_reservation_id(description: &str) -> Option<String> {
    const LABEL: &str = "reservation:";

    let lowered = description.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(pos) = lowered[search_from..].find(LABEL) {
        let after = search_from + pos + LABEL.len();
        let code: String = description[after..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect();
        if !code.is_empty() {
            return Some(code);
        }
        search_from = after;
    }

    None
}

/// Text after the first `label`, up to the end of its line.
///
/// Whitespace after the label may span lines, so a value on the line below
/// the label is still found.
fn labelled_value(description: &str, label: &str) -> Option<String> {
    let pos = description.find(label)?;
    let rest = description[pos + label.len()..].trim_start();
    let value = rest.split('\n').next().unwrap_or("").trim();
    (!value.is_empty()).then(|| value.to_string())
}
