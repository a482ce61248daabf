use miette::{Diagnostic, Result};
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Environment error: {0}")]
    #[diagnostic(code(nest_checkout::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(nest_checkout::config))]
    Config(String),

    #[error("Calendar fetch error: {0}")]
    #[diagnostic(code(nest_checkout::fetch))]
    Fetch(String),

    #[error("Authentication error: {0}")]
    #[diagnostic(
        code(nest_checkout::auth),
        help("The Google credential is invalid or expired. Re-run get_oauth_token and update GOOGLE_REFRESH_TOKEN.")
    )]
    Auth(String),

    #[error("Device error: {0}")]
    #[diagnostic(code(nest_checkout::device))]
    Device(String),

    #[error("Parse error: {0}")]
    #[diagnostic(code(nest_checkout::parse))]
    Parse(String),

    #[error("Notification error: {0}")]
    #[diagnostic(code(nest_checkout::notification))]
    Notification(String),

    #[error("A poll cycle is already in progress")]
    #[diagnostic(code(nest_checkout::poll_in_progress))]
    PollInProgress,

    #[error("HTTP client error: {0}")]
    #[diagnostic(code(nest_checkout::http))]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    #[diagnostic(code(nest_checkout::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(nest_checkout::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(nest_checkout::other))]
    Other(String),
}

impl Error {
    /// Whether the error means the device-control credential is unusable
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

// Implement From for JSON errors
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// Implement From for TOML deserialization errors
impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create calendar fetch errors
pub fn fetch_error(message: &str) -> Error {
    Error::Fetch(message.to_string())
}

/// Helper to create authentication errors
pub fn auth_error(message: &str) -> Error {
    Error::Auth(message.to_string())
}

/// Helper to create device errors
pub fn device_error(message: &str) -> Error {
    Error::Device(message.to_string())
}

/// Helper to create parse errors
pub fn parse_error(message: &str) -> Error {
    Error::Parse(message.to_string())
}

/// Helper to create notification errors
pub fn notification_error(message: &str) -> Error {
    Error::Notification(message.to_string())
}

/// Helper to create other errors
pub fn other_error(message: &str) -> Error {
    Error::Other(message.to_string())
}
