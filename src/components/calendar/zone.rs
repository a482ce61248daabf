//! VTIMEZONE definitions, used for TZIDs that are not IANA names
//! (Exchange feeds send "Eastern Standard Time" and friends).
//!
//! Only yearly recurrence rules are understood, which is what every
//! published zone uses.

use super::time::ICAL_DATE_TIME;
use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Weekday};
use tracing::warn;

/// One VTIMEZONE block
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneDefinition {
    pub tzid: String,
    observances: Vec<Observance>,
}

/// A STANDARD or DAYLIGHT sub-component
#[derive(Debug, Clone, PartialEq)]
struct Observance {
    /// First onset, in the wall-clock time before the change
    start: NaiveDateTime,
    offset_from: FixedOffset,
    offset_to: FixedOffset,
    rule: Option<YearlyRule>,
}

#[derive(Debug, Clone, PartialEq)]
struct YearlyRule {
    month: u32,
    day: RuleDay,
    until: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
enum RuleDay {
    /// BYDAY=2SU, or -1SU for the last one
    NthWeekday(i32, Weekday),
    /// BYDAY=SU with a BYMONTHDAY range, such as 8..14
    WeekdayInRange(Weekday, Vec<u32>),
    /// BYMONTHDAY alone
    MonthDay(u32),
}

impl ZoneDefinition {
    pub fn new(tzid: impl Into<String>) -> Self {
        Self {
            tzid: tzid.into(),
            observances: Vec::new(),
        }
    }

    /// Add a STANDARD/DAYLIGHT block from its (name, value) properties.
    /// Blocks without a usable DTSTART or offsets are dropped.
    pub fn add_observance(&mut self, properties: &[(String, String)]) {
        match Observance::parse(properties) {
            Some(observance) => self.observances.push(observance),
            None => warn!("Ignoring incomplete observance in time zone '{}'", self.tzid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observances.is_empty()
    }

    /// UTC offset in force at a local wall-clock time
    pub fn offset_at(&self, local: NaiveDateTime) -> Option<FixedOffset> {
        let latest = self
            .observances
            .iter()
            .filter_map(|o| o.last_onset_before(local).map(|onset| (onset, o)))
            .max_by_key(|(onset, _)| *onset);

        match latest {
            Some((_, observance)) => Some(observance.offset_to),
            // Before the first recorded change
            None => self
                .observances
                .iter()
                .min_by_key(|o| o.start)
                .map(|o| o.offset_from),
        }
    }
}

impl Observance {
    fn parse(properties: &[(String, String)]) -> Option<Self> {
        let value = |name: &str| {
            properties
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        };

        let start = NaiveDateTime::parse_from_str(value("DTSTART")?, ICAL_DATE_TIME).ok()?;
        let offset_from = parse_offset(value("TZOFFSETFROM")?)?;
        let offset_to = parse_offset(value("TZOFFSETTO")?)?;
        let rule = value("RRULE").and_then(|raw| {
            let rule = YearlyRule::parse(raw);
            if rule.is_none() {
                warn!("Unsupported time zone rule '{}', using its first onset only", raw);
            }
            rule
        });

        Some(Self {
            start,
            offset_from,
            offset_to,
            rule,
        })
    }

    fn last_onset_before(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        let Some(rule) = &self.rule else {
            return (self.start <= local).then_some(self.start);
        };

        [local.year(), local.year() - 1]
            .into_iter()
            .filter_map(|year| rule.onset_in(year, self.start))
            .filter(|onset| *onset >= self.start && *onset <= local)
            .filter(|onset| rule.until.map_or(true, |until| *onset <= until))
            .max()
    }
}

impl YearlyRule {
    fn parse(raw: &str) -> Option<Self> {
        let mut freq = None;
        let mut month = None;
        let mut by_day = None;
        let mut month_days = Vec::new();
        let mut until = None;

        for part in raw.split(';') {
            let (key, value) = part.split_once('=')?;
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => freq = Some(value.trim().to_ascii_uppercase()),
                "BYMONTH" => month = value.trim().parse::<u32>().ok(),
                "BYDAY" => by_day = Some(value.trim().to_ascii_uppercase()),
                "BYMONTHDAY" => {
                    month_days = value
                        .split(',')
                        .filter_map(|d| d.trim().parse::<u32>().ok())
                        .collect()
                }
                "UNTIL" => {
                    let value = value.trim();
                    until = NaiveDateTime::parse_from_str(
                        value.strip_suffix('Z').unwrap_or(value),
                        ICAL_DATE_TIME,
                    )
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(value, "%Y%m%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(23, 59, 59))
                    });
                }
                _ => {}
            }
        }

        if freq.as_deref() != Some("YEARLY") {
            return None;
        }
        let month = month.filter(|m| (1..=12).contains(m))?;

        let day = match by_day {
            Some(by_day) => {
                let (nth, weekday) = parse_by_day(&by_day)?;
                match nth {
                    Some(n) => RuleDay::NthWeekday(n, weekday),
                    None if !month_days.is_empty() => RuleDay::WeekdayInRange(weekday, month_days),
                    None => return None,
                }
            }
            None => RuleDay::MonthDay(*month_days.first()?),
        };

        Some(Self { month, day, until })
    }

    fn onset_in(&self, year: i32, first: NaiveDateTime) -> Option<NaiveDateTime> {
        let date = match &self.day {
            RuleDay::NthWeekday(n, weekday) => nth_weekday(year, self.month, *n, *weekday)?,
            RuleDay::WeekdayInRange(weekday, days) => days
                .iter()
                .filter_map(|d| NaiveDate::from_ymd_opt(year, self.month, *d))
                .find(|date| date.weekday() == *weekday)?,
            RuleDay::MonthDay(day) => NaiveDate::from_ymd_opt(year, self.month, *day)?,
        };
        Some(date.and_time(first.time()))
    }
}

fn parse_by_day(raw: &str) -> Option<(Option<i32>, Weekday)> {
    // Several BYDAY entries never occur in zone rules; take the first
    let raw = raw.split(',').next()?.trim();
    let split = raw.len().checked_sub(2)?;
    if !raw.is_char_boundary(split) {
        return None;
    }
    let (nth, code) = raw.split_at(split);
    let weekday = match code {
        "MO" => Weekday::Mon,
        "TU" => Weekday::Tue,
        "WE" => Weekday::Wed,
        "TH" => Weekday::Thu,
        "FR" => Weekday::Fri,
        "SA" => Weekday::Sat,
        "SU" => Weekday::Sun,
        _ => return None,
    };
    let nth = match nth {
        "" => None,
        n => Some(n.trim_start_matches('+').parse::<i32>().ok()?),
    };
    Some((nth, weekday))
}

fn nth_weekday(year: i32, month: u32, n: i32, weekday: Weekday) -> Option<NaiveDate> {
    if n > 0 {
        return NaiveDate::from_weekday_of_month_opt(year, month, weekday, u8::try_from(n).ok()?);
    }
    if n == 0 {
        return None;
    }

    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_month.pred_opt()?;
    let back = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    let date = last - Duration::days(i64::from(back)) - Duration::weeks(i64::from(-n - 1));
    (date.month() == month).then_some(date)
}

/// Parse "-0500", "+0530" or "+053000"
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, digits) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => return None,
    };
    if !(digits.len() == 4 || digits.len() == 6) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    let seconds: i32 = if digits.len() == 6 { digits[4..6].parse().ok()? } else { 0 };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60 + seconds))
}
