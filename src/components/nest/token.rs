use crate::config::Config;
use crate::error::{auth_error, AppResult};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{error, info};

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the access token actually expires
const REFRESH_MARGIN_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Hands out SDM access tokens, refreshing them from the configured
/// refresh token when missing or close to expiry
#[derive(Clone)]
pub struct TokenManager {
    config: Arc<RwLock<Config>>,
    client: Client,
    token: Arc<RwLock<Option<AccessToken>>>,
    last_refresh: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl TokenManager {
    pub fn new(config: Arc<RwLock<Config>>, timeout: StdDuration) -> AppResult<Self> {
        Ok(Self {
            config,
            client: Client::builder().timeout(timeout).build()?,
            token: Arc::new(RwLock::new(None)),
            last_refresh: Arc::new(RwLock::new(None)),
        })
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn get_token(&self) -> AppResult<String> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                if !needs_refresh(token.expires_at, Utc::now()) {
                    return Ok(token.value.clone());
                }
            }
        }

        // Only one caller refreshes; the rest reuse its result
        let mut token = self.token.write().await;
        if let Some(current) = token.as_ref() {
            if !needs_refresh(current.expires_at, Utc::now()) {
                return Ok(current.value.clone());
            }
        }

        let fresh = self.refresh_token().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    /// Exchange the refresh token for a new access token
    async fn refresh_token(&self) -> AppResult<AccessToken> {
        info!("Refreshing OAuth token...");

        let params = {
            let config_read = self.config.read().await;
            [
                ("client_id", config_read.google_client_id.clone()),
                ("client_secret", config_read.google_client_secret.clone()),
                ("refresh_token", config_read.google_refresh_token.clone()),
                ("grant_type", "refresh_token".to_string()),
            ]
        };

        let response = self
            .client
            .post(GOOGLE_TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(|e| auth_error(&format!("Failed to refresh token: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            error!("Failed to refresh token: HTTP {} - {}", status, error_body);
            return Err(auth_error(&format!(
                "Failed to refresh token: HTTP {} - {}",
                status, error_body
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(&format!("Failed to parse token response: {}", e)))?;

        let now = Utc::now();
        let expires_at = now + Duration::seconds(body.expires_in.unwrap_or(3600));
        *self.last_refresh.write().await = Some(now);
        info!("Token refreshed successfully. Expires at: {}", expires_at);

        Ok(AccessToken {
            value: body.access_token,
            expires_at,
        })
    }

    /// Seed the cache with a known access token
    pub async fn set_token(&self, access_token: impl Into<String>, expires_at: DateTime<Utc>) {
        *self.token.write().await = Some(AccessToken {
            value: access_token.into(),
            expires_at,
        });
    }

    pub async fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.token.read().await.as_ref().map(|t| t.expires_at)
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }
}

fn needs_refresh(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now + Duration::minutes(REFRESH_MARGIN_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackKey, SmtpSettings};
    use std::collections::HashMap;

    fn test_config() -> Arc<RwLock<Config>> {
        Arc::new(RwLock::new(Config {
            ical_url: "https://example.com/a.ics".to_string(),
            google_client_id: "client".to_string(),
            google_client_secret: "secret".to_string(),
            google_refresh_token: "refresh".to_string(),
            nest_project_id: "project".to_string(),
            nest_device_ids: Vec::new(),
            poll_interval_minutes: 10,
            checkout_buffer_minutes: 30,
            trigger_keyword: "TURN_OFF_THERMOSTATS".to_string(),
            trigger_keyword_case_sensitive: true,
            fallback_key: FallbackKey::Uid,
            request_timeout_seconds: 5,
            host: "127.0.0.1".to_string(),
            port: 8080,
            smtp: SmtpSettings::default(),
            components: HashMap::new(),
        }))
    }

    #[test]
    fn test_needs_refresh_margin() {
        let now = Utc::now();
        assert!(needs_refresh(now - Duration::minutes(1), now));
        assert!(needs_refresh(now + Duration::minutes(9), now));
        assert!(!needs_refresh(now + Duration::minutes(11), now));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let manager = TokenManager::new(test_config(), StdDuration::from_secs(1)).unwrap();
        assert!(manager.token_expiry().await.is_none());

        let expires_at = Utc::now() + Duration::hours(1);
        manager.set_token("cached-token", expires_at).await;

        assert_eq!(manager.get_token().await.unwrap(), "cached-token");
        assert_eq!(manager.token_expiry().await, Some(expires_at));
        assert!(manager.last_refresh().await.is_none());
    }
}
