pub mod ical;
pub mod models;
mod source;
pub mod time;
pub mod zone;

pub use models::{CalendarEvent, EventTime};
pub use source::{normalize_feed_url, CalendarSource, IcalFeedSource};
