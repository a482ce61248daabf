use crate::error::{config_error, env_error, AppResult};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default keyword that must appear in a checkout event's description
pub const DEFAULT_TRIGGER_KEYWORD: &str = "TURN_OFF_THERMOSTATS";

/// Upper bound for POLL_INTERVAL_MINUTES and CHECKOUT_BUFFER_MINUTES (one week)
pub const MAX_WINDOW_MINUTES: u64 = 7 * 24 * 60;

/// Upper bound for REQUEST_TIMEOUT_SECONDS
pub const MAX_REQUEST_TIMEOUT_SECONDS: u64 = 3600;

/// Optional file with component on/off switches
pub const COMPONENTS_FILE: &str = "config/components.toml";

/// How to key an event that carries no reservation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKey {
    /// Use the iCal UID, or summary and start when the UID is missing too
    Uid,
    /// Use the first 20 characters of the summary joined with the start time
    SummaryStart,
    /// Ignore the event
    Skip,
}

impl FromStr for FallbackKey {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uid" => Ok(FallbackKey::Uid),
            "summary_start" => Ok(FallbackKey::SummaryStart),
            "skip" => Ok(FallbackKey::Skip),
            other => Err(config_error(&format!(
                "Invalid FALLBACK_KEY '{}', expected uid, summary_start or skip",
                other
            ))),
        }
    }
}

/// Outgoing mail settings for checkout notifications
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub enabled: bool,
    pub host: String,
    /// 465 uses implicit TLS, anything else STARTTLS
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub to_emails: Vec<String>,
}

impl SmtpSettings {
    /// Enabled and every field needed to send is present
    pub fn is_configured(&self) -> bool {
        self.enabled
            && !self.host.is_empty()
            && self.port != 0
            && !self.username.is_empty()
            && !self.password.is_empty()
            && !self.to_emails.is_empty()
    }
}

/// Main configuration structure for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// iCal feed with the checkout events (webcal:// is accepted)
    pub ical_url: String,
    /// Google OAuth client ID
    pub google_client_id: String,
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// Long-lived refresh token from get_oauth_token
    pub google_refresh_token: String,
    /// Google Device Access project ID
    pub nest_project_id: String,
    /// Explicit thermostat allow-list; empty means discover
    pub nest_device_ids: Vec<String>,
    /// Minutes between scheduled polls
    pub poll_interval_minutes: u64,
    /// Minutes after a checkout's start during which it still triggers
    pub checkout_buffer_minutes: u64,
    /// Keyword that must appear in the event description
    pub trigger_keyword: String,
    /// Whether the keyword match is case-sensitive
    pub trigger_keyword_case_sensitive: bool,
    /// Dedup key policy for events without a reservation identifier
    pub fallback_key: FallbackKey,
    /// Upper bound for every outbound HTTP call
    pub request_timeout_seconds: u64,
    /// Status API bind host
    pub host: String,
    /// Status API bind port
    pub port: u16,
    /// Checkout notification mail, off unless SMTP_ENABLED is set
    pub smtp: SmtpSettings,
    /// Map of component names to their enabled status
    pub components: HashMap<String, bool>,
}

impl Config {
    /// Load configuration from environment and config file
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let mut config = Self::from_lookup(|key| env::var(key).ok())?;

        // Load components configuration from file if it exists
        if let Ok(content) = fs::read_to_string(COMPONENTS_FILE) {
            let file_components = toml::from_str::<HashMap<String, bool>>(&content)?;
            for (key, value) in file_components {
                config.components.insert(key, value);
            }
        }

        Ok(config)
    }

    /// Build configuration from a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| env_error(key));

        let ical_url = required("ICAL_URL")?;
        let google_client_id = required("GOOGLE_CLIENT_ID")?;
        let google_client_secret = required("GOOGLE_CLIENT_SECRET")?;
        let google_refresh_token = required("GOOGLE_REFRESH_TOKEN")?;
        let nest_project_id = required("NEST_PROJECT_ID")?;

        let nest_device_ids = parse_list(&lookup("NEST_DEVICE_IDS").unwrap_or_default());

        let poll_interval_minutes = parse_number(&lookup, "POLL_INTERVAL_MINUTES", 10)?;
        let checkout_buffer_minutes = parse_number(&lookup, "CHECKOUT_BUFFER_MINUTES", 30)?;
        let request_timeout_seconds = parse_number(&lookup, "REQUEST_TIMEOUT_SECONDS", 30)?;
        let port = parse_number(&lookup, "PORT", 8080u16)?;

        check_range("POLL_INTERVAL_MINUTES", poll_interval_minutes, 1, MAX_WINDOW_MINUTES)?;
        check_range("CHECKOUT_BUFFER_MINUTES", checkout_buffer_minutes, 0, MAX_WINDOW_MINUTES)?;
        check_range(
            "REQUEST_TIMEOUT_SECONDS",
            request_timeout_seconds,
            1,
            MAX_REQUEST_TIMEOUT_SECONDS,
        )?;

        let trigger_keyword = lookup("TRIGGER_KEYWORD")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_TRIGGER_KEYWORD.to_string());

        let trigger_keyword_case_sensitive = match lookup("TRIGGER_KEYWORD_CASE_SENSITIVE") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                config_error("Invalid TRIGGER_KEYWORD_CASE_SENSITIVE, expected true or false")
            })?,
            None => true,
        };

        let fallback_key = match lookup("FALLBACK_KEY") {
            Some(value) => value.parse()?,
            None => FallbackKey::Uid,
        };

        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let smtp = smtp_from_lookup(&lookup)?;

        // Initialize default components
        let mut components = HashMap::new();
        components.insert("checkout_automation".to_string(), true);
        components.insert("status_api".to_string(), true);

        let config = Config {
            ical_url,
            google_client_id,
            google_client_secret,
            google_refresh_token,
            nest_project_id,
            nest_device_ids,
            poll_interval_minutes,
            checkout_buffer_minutes,
            trigger_keyword,
            trigger_keyword_case_sensitive,
            fallback_key,
            request_timeout_seconds,
            host,
            port,
            smtp,
            components,
        };

        if config.checkout_buffer_minutes < config.poll_interval_minutes {
            warn!(
                "CHECKOUT_BUFFER_MINUTES ({}) is shorter than POLL_INTERVAL_MINUTES ({}); checkouts can be missed",
                config.checkout_buffer_minutes, config.poll_interval_minutes
            );
        }

        Ok(config)
    }

    /// Check if a component is enabled
    pub fn is_component_enabled(&self, name: &str) -> bool {
        *self.components.get(name).unwrap_or(&false)
    }

    // The accessors clamp to the validated ranges, since the fields are public
    // and a hand-built Config skips `from_lookup`.

    pub fn poll_interval(&self) -> Duration {
        let minutes = self.poll_interval_minutes.clamp(1, MAX_WINDOW_MINUTES);
        Duration::from_secs(minutes * 60)
    }

    pub fn checkout_buffer(&self) -> chrono::Duration {
        let minutes = self.checkout_buffer_minutes.min(MAX_WINDOW_MINUTES);
        chrono::Duration::minutes(minutes as i64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_seconds
                .clamp(1, MAX_REQUEST_TIMEOUT_SECONDS),
        )
    }
}

fn smtp_from_lookup<F>(lookup: &F) -> AppResult<SmtpSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let enabled = match lookup("SMTP_ENABLED") {
        Some(value) if !value.trim().is_empty() => parse_bool(&value)
            .ok_or_else(|| config_error("Invalid SMTP_ENABLED, expected true or false"))?,
        _ => false,
    };
    let port = parse_number(lookup, "SMTP_PORT", 587u16)?;
    if port == 0 {
        return Err(config_error("SMTP_PORT must be between 1 and 65535, got 0"));
    }

    let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).unwrap_or_default();
    let username = text("SMTP_USERNAME");
    let from_email = Some(text("SMTP_FROM_EMAIL"))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| username.clone());
    let host = Some(text("SMTP_HOST"))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "smtp.gmail.com".to_string());

    let smtp = SmtpSettings {
        enabled,
        host,
        port,
        username,
        password: lookup("SMTP_PASSWORD").unwrap_or_default(),
        from_email,
        to_emails: parse_list(&text("SMTP_TO_EMAIL")),
    };

    if smtp.enabled && !smtp.is_configured() {
        warn!("SMTP_ENABLED is set but SMTP credentials or recipients are missing; notifications are off");
    }

    Ok(smtp)
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| id.to_string())
        .collect()
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| config_error(&format!("Invalid {} format", key))),
        _ => Ok(default),
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> AppResult<()> {
    if value < min || value > max {
        return Err(config_error(&format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
