use super::models::{
    parse_devices, DeviceClass, DevicesResponse, Thermostat, ThermostatMode, SET_MODE_COMMAND,
};
use super::token::TokenManager;
use crate::error::{auth_error, device_error, AppResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub const SDM_API_BASE: &str = "https://smartdevicemanagement.googleapis.com/v1";

/// Cloud device-control capability used by the dispatcher and the status API
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// List devices of `class`; `force_refresh` bypasses any cache
    async fn list_devices(&self, class: DeviceClass, force_refresh: bool) -> AppResult<Vec<Thermostat>>;

    /// Set a thermostat's mode
    async fn set_mode(&self, device_id: &str, mode: ThermostatMode) -> AppResult<()>;

    async fn turn_off(&self, device_id: &str) -> AppResult<()> {
        self.set_mode(device_id, ThermostatMode::Off).await
    }
}

/// Google Smart Device Management client
pub struct NestClient {
    project_id: String,
    token_manager: TokenManager,
    client: Client,
    devices_cache: RwLock<Option<Vec<Thermostat>>>,
}

impl NestClient {
    pub fn new(project_id: impl Into<String>, token_manager: TokenManager, timeout: Duration) -> AppResult<Self> {
        Ok(Self {
            project_id: project_id.into(),
            token_manager,
            client: Client::builder().timeout(timeout).build()?,
            devices_cache: RwLock::new(None),
        })
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    fn devices_url(&self) -> String {
        format!("{}/enterprises/{}/devices", SDM_API_BASE, self.project_id)
    }

    fn command_url(&self, device_id: &str) -> String {
        format!("{}/{}:executeCommand", self.devices_url(), device_id)
    }

    async fn fetch_devices(&self) -> AppResult<DevicesResponse> {
        let token = self.token_manager.get_token().await?;
        let url = self.devices_url();
        info!("Fetching devices from: {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| device_error(&format!("Failed to list devices: {}", e)))?;

        let response = check_status(response, "list devices").await?;

        response
            .json()
            .await
            .map_err(|e| device_error(&format!("Failed to parse devices response: {}", e)))
    }

    /// Discover all thermostats and log their IDs for configuration
    pub async fn discover_and_log_devices(&self) -> AppResult<Vec<Thermostat>> {
        let devices = self.list_devices(DeviceClass::Thermostat, true).await?;

        if devices.is_empty() {
            warn!("No thermostats found. Check your Device Access configuration.");
        } else {
            info!("Found {} thermostat(s):", devices.len());
            for device in &devices {
                info!(
                    device_id = %device.device_id,
                    mode = %device.current_mode,
                    temperature_celsius = ?device.ambient_temperature_celsius,
                    humidity_percent = ?device.humidity_percent,
                    "Thermostat {}",
                    device.display_name
                );
            }
        }
        info!("To control specific thermostats, set NEST_DEVICE_IDS (e.g. NEST_DEVICE_IDS=device-id-1,device-id-2)");

        Ok(devices)
    }
}

#[async_trait]
impl DeviceControl for NestClient {
    async fn list_devices(&self, class: DeviceClass, force_refresh: bool) -> AppResult<Vec<Thermostat>> {
        if !force_refresh {
            if let Some(devices) = self.devices_cache.read().await.as_ref() {
                if !devices.is_empty() {
                    return Ok(devices.clone());
                }
            }
        }

        let response = self.fetch_devices().await?;
        let devices = parse_devices(response, class);
        debug!("Found {} devices of class {:?}", devices.len(), class);

        *self.devices_cache.write().await = Some(devices.clone());
        Ok(devices)
    }

    async fn set_mode(&self, device_id: &str, mode: ThermostatMode) -> AppResult<()> {
        let token = self.token_manager.get_token().await?;
        let payload = json!({
            "command": SET_MODE_COMMAND,
            "params": { "mode": mode },
        });

        info!("Setting thermostat {} to mode: {}", device_id, mode.as_str());

        let response = self
            .client
            .post(self.command_url(device_id))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| device_error(&format!("Failed to reach thermostat {}: {}", device_id, e)))?;

        check_status(response, &format!("set thermostat {} to {}", device_id, mode.as_str())).await?;

        info!("Successfully set thermostat {} to {}", device_id, mode.as_str());
        Ok(())
    }
}

/// Map an SDM response status onto the error taxonomy
async fn check_status(response: Response, action: &str) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|_| "Could not read error response".to_string());
    error!("Failed to {}: HTTP {} - {}", action, status, error_body);

    let message = format!("Failed to {}: HTTP {} - {}", action, status, error_body);
    if is_auth_status(status) {
        Err(auth_error(&message))
    } else {
        Err(device_error(&message))
    }
}

fn is_auth_status(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses() {
        assert!(is_auth_status(StatusCode::UNAUTHORIZED));
        assert!(is_auth_status(StatusCode::FORBIDDEN));
        assert!(!is_auth_status(StatusCode::NOT_FOUND));
        assert!(!is_auth_status(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
