use super::ApiState;
use crate::components::checkout::{PollResult, PollStatus};
use crate::components::nest::{DeviceClass, DeviceOutcome, Thermostat};
use crate::components::notifier::{CheckoutNotice, ThermostatResult};
use crate::config::FallbackKey;
use crate::error::{other_error, Error};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

/// Error wrapper that maps service errors onto HTTP status codes
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::PollInProgress => StatusCode::CONFLICT,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Device(_) | Error::Fetch(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Status API request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Non-secret view of the active configuration
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    pub poll_interval_minutes: u64,
    pub checkout_buffer_minutes: u64,
    pub trigger_keyword: String,
    pub trigger_keyword_case_sensitive: bool,
    pub fallback_key: FallbackKey,
    pub device_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub poll: PollStatus,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub token_last_refresh: Option<DateTime<Utc>>,
    pub config: ConfigSummary,
}

/// Liveness check
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
    }))
}

/// Last poll, last action and configuration
pub async fn status_handler(State(state): State<ApiState>) -> Json<StatusResponse> {
    let poll = state.poller.status().await;
    let (token_expires_at, token_last_refresh) = match &state.token_manager {
        Some(tokens) => (tokens.token_expiry().await, tokens.last_refresh().await),
        None => (None, None),
    };

    let config = {
        let config = state.config.read().await;
        ConfigSummary {
            poll_interval_minutes: config.poll_interval_minutes,
            checkout_buffer_minutes: config.checkout_buffer_minutes,
            trigger_keyword: config.trigger_keyword.clone(),
            trigger_keyword_case_sensitive: config.trigger_keyword_case_sensitive,
            fallback_key: config.fallback_key,
            device_ids: config.nest_device_ids.clone(),
        }
    };

    Json(StatusResponse {
        status: "running",
        poll,
        token_expires_at,
        token_last_refresh,
        config,
    })
}

/// Run a poll cycle now; 409 while another cycle is in flight
pub async fn poll_handler(State(state): State<ApiState>) -> Result<Json<PollResult>, ApiError> {
    info!("Manual poll requested");
    let cycle = state.poller.spawn_poll_cycle()?;
    let result = cycle
        .await
        .map_err(|e| other_error(&format!("Poll task failed: {}", e)))?;
    Ok(Json(result))
}

/// Fresh thermostat listing from the device service
pub async fn devices_handler(
    State(state): State<ApiState>,
) -> Result<Json<Vec<Thermostat>>, ApiError> {
    let devices = state.devices.list_devices(DeviceClass::Thermostat, true).await?;
    Ok(Json(devices))
}

/// Turn off a single device by id
pub async fn device_off_handler(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Response, ApiError> {
    info!("Manual turn-off requested for {}", device_id);
    let outcomes: Vec<DeviceOutcome> = state
        .poller
        .dispatcher()
        .turn_off(std::slice::from_ref(&device_id))
        .await?;

    let status = if outcomes.iter().all(|o| o.outcome.is_success()) {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((status, Json(outcomes)).into_response())
}

/// Send a sample notice without touching any device; 400 when mail is off
pub async fn test_notification_handler(
    State(state): State<ApiState>,
) -> Result<Response, ApiError> {
    let Some(notifier) = &state.notifier else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Email notifications not configured. Set SMTP_ENABLED=true and provide SMTP credentials."
            })),
        )
            .into_response());
    };

    let mut thermostats: Vec<ThermostatResult> =
        match state.devices.list_devices(DeviceClass::Thermostat, false).await {
            Ok(devices) => devices
                .into_iter()
                .map(|d| ThermostatResult {
                    name: d.display_name,
                    turned_off: true,
                })
                .collect(),
            Err(e) => {
                warn!("Could not list thermostats for the test notification: {}", e);
                Vec::new()
            }
        };
    if thermostats.is_empty() {
        thermostats.push(ThermostatResult {
            name: "Test Thermostat".to_string(),
            turned_off: true,
        });
    }

    let notice = CheckoutNotice {
        property_name: "Test Property".to_string(),
        guest_name: "Test Guest".to_string(),
        reservation_id: "TEST-123".to_string(),
        event_time: Utc::now(),
        thermostats,
    };
    notifier.send(&notice).await?;

    Ok(Json(json!({
        "message": "Test notification sent successfully",
        "recipients": notifier.recipients(),
    }))
    .into_response())
}
