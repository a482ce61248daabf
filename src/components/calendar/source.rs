use super::ical::parse_calendar;
use super::models::CalendarEvent;
use crate::error::{config_error, fetch_error, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Anything that can produce the current set of calendar events
#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Fetch every event currently in the feed
    async fn fetch(&self) -> AppResult<Vec<CalendarEvent>>;
}

/// Hosted iCal feed fetched over HTTP
#[derive(Clone)]
pub struct IcalFeedSource {
    url: Url,
    client: Client,
}

impl IcalFeedSource {
    pub fn new(feed_url: &str, timeout: Duration) -> AppResult<Self> {
        let url = Url::parse(&normalize_feed_url(feed_url))
            .map_err(|e| config_error(&format!("Invalid ICAL_URL: {}", e)))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CalendarSource for IcalFeedSource {
    async fn fetch(&self) -> AppResult<Vec<CalendarEvent>> {
        debug!("Fetching calendar feed from {}", self.url.host_str().unwrap_or("feed"));

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| fetch_error(&format!("Failed to fetch calendar: {}", e)))?;

        if !response.status().is_success() {
            return Err(fetch_error(&format!(
                "Failed to fetch calendar: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| fetch_error(&format!("Failed to read calendar body: {}", e)))?;

        let events = parse_calendar(&body)
            .map_err(|e| fetch_error(&format!("Failed to parse calendar: {}", e)))?;

        info!("Fetched {} calendar events", events.len());
        Ok(events)
    }
}

/// webcal:// is plain HTTPS for our purposes
pub fn normalize_feed_url(url: &str) -> String {
    match url.strip_prefix("webcal://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}
