use super::client::DeviceControl;
use super::models::DeviceClass;
use crate::error::{device_error, AppResult, Error};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Result of one power-off attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed(String),
    /// The device-control credential was rejected
    AuthFailed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceOutcome {
    pub target: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Turns thermostats off, one independent attempt per device
#[derive(Clone)]
pub struct Dispatcher {
    control: Arc<dyn DeviceControl>,
    allow_list: Vec<String>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(control: Arc<dyn DeviceControl>, allow_list: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            control,
            allow_list,
            call_timeout,
        }
    }

    /// Turn off every target concurrently and report each outcome.
    ///
    /// An empty `targets` falls back to the allow-list, then to discovery.
    /// Only target resolution can fail the whole call.
    pub async fn turn_off(&self, targets: &[String]) -> AppResult<Vec<DeviceOutcome>> {
        let targets = self.resolve_targets(targets).await?;
        info!("Turning off {} thermostat(s)...", targets.len());

        let attempts = targets.into_iter().map(|target| async move {
            let outcome = match timeout(self.call_timeout, self.control.turn_off(&target)).await {
                Ok(Ok(())) => Outcome::Succeeded,
                Ok(Err(Error::Auth(reason))) => {
                    error!("Credential rejected while turning off {}: {}", target, reason);
                    Outcome::AuthFailed(reason)
                }
                Ok(Err(e)) => {
                    error!("Failed to turn off thermostat {}: {}", target, e);
                    Outcome::Failed(e.to_string())
                }
                Err(_) => {
                    error!("Turning off thermostat {} timed out", target);
                    Outcome::Failed(format!("timed out after {}s", self.call_timeout.as_secs()))
                }
            };
            DeviceOutcome { target, outcome }
        });

        let outcomes = join_all(attempts).await;

        let success_count = outcomes.iter().filter(|o| o.outcome.is_success()).count();
        let fail_count = outcomes.len() - success_count;
        if fail_count == 0 {
            info!("Successfully turned off all {} thermostat(s)", success_count);
        } else {
            warn!("Turned off {} thermostat(s), {} failed", success_count, fail_count);
        }

        Ok(outcomes)
    }

    /// Device id to display name, from the cached listing.
    ///
    /// Empty when the listing fails; callers fall back to raw ids.
    pub async fn display_names(&self) -> HashMap<String, String> {
        match timeout(
            self.call_timeout,
            self.control.list_devices(DeviceClass::Thermostat, false),
        )
        .await
        {
            Ok(Ok(devices)) => devices
                .into_iter()
                .map(|d| (d.device_id, d.display_name))
                .collect(),
            Ok(Err(e)) => {
                warn!("Could not list thermostats for display names: {}", e);
                HashMap::new()
            }
            Err(_) => {
                warn!("Listing thermostats for display names timed out");
                HashMap::new()
            }
        }
    }

    async fn resolve_targets(&self, targets: &[String]) -> AppResult<Vec<String>> {
        if !targets.is_empty() {
            return Ok(targets.to_vec());
        }
        if !self.allow_list.is_empty() {
            return Ok(self.allow_list.clone());
        }

        warn!("No specific device IDs configured, discovering all thermostats...");
        let devices = timeout(
            self.call_timeout,
            self.control.list_devices(DeviceClass::Thermostat, false),
        )
        .await
        .map_err(|_| device_error("Thermostat discovery timed out"))??;

        if devices.is_empty() {
            error!("No thermostats found to turn off!");
            return Err(device_error("No thermostats found to turn off"));
        }

        Ok(devices.into_iter().map(|d| d.device_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::nest::models::{Thermostat, ThermostatMode};
    use crate::error::auth_error;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeControl {
        discovered: Vec<&'static str>,
        failing: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeviceControl for FakeControl {
        async fn list_devices(&self, _class: DeviceClass, _force: bool) -> AppResult<Vec<Thermostat>> {
            Ok(self
                .discovered
                .iter()
                .map(|id| Thermostat {
                    device_id: id.to_string(),
                    name: format!("enterprises/p/devices/{}", id),
                    display_name: id.to_string(),
                    current_mode: "HEAT".to_string(),
                    ambient_temperature_celsius: None,
                    humidity_percent: None,
                })
                .collect())
        }

        async fn set_mode(&self, device_id: &str, _mode: ThermostatMode) -> AppResult<()> {
            self.calls.lock().unwrap().push(device_id.to_string());
            if self.failing.iter().any(|id| *id == device_id) {
                return Err(auth_error("token expired"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_explicit_targets_take_precedence() {
        let control = Arc::new(FakeControl {
            discovered: vec!["d1", "d2"],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(control.clone(), vec!["a1".to_string()], Duration::from_secs(1));

        let outcomes = dispatcher.turn_off(&["x1".to_string()]).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].target, "x1");
        assert_eq!(*control.calls.lock().unwrap(), vec!["x1"]);
    }

    #[tokio::test]
    async fn test_allow_list_before_discovery() {
        let control = Arc::new(FakeControl {
            discovered: vec!["d1"],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(control.clone(), vec!["a1".to_string()], Duration::from_secs(1));

        let outcomes = dispatcher.turn_off(&[]).await.unwrap();
        assert_eq!(outcomes[0].target, "a1");
    }

    #[tokio::test]
    async fn test_auth_failure_is_distinct() {
        let control = Arc::new(FakeControl {
            failing: vec!["a2"],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(control, Vec::new(), Duration::from_secs(1));

        let outcomes = dispatcher
            .turn_off(&["a1".to_string(), "a2".to_string()])
            .await
            .unwrap();
        assert_eq!(outcomes[0].outcome, Outcome::Succeeded);
        assert_eq!(outcomes[1].outcome, Outcome::AuthFailed("token expired".to_string()));
    }

    #[tokio::test]
    async fn test_nothing_discovered() {
        let control = Arc::new(FakeControl::default());
        let dispatcher = Dispatcher::new(control, Vec::new(), Duration::from_secs(1));
        assert!(dispatcher.turn_off(&[]).await.is_err());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = DeviceOutcome {
            target: "d1".to_string(),
            outcome: Outcome::Failed("offline".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({ "target": "d1", "status": "failed", "reason": "offline" })
        );
    }
}
