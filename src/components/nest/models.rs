use serde::{Deserialize, Serialize};

pub const SET_MODE_COMMAND: &str = "sdm.devices.commands.ThermostatMode.SetMode";

/// Device classes the service knows how to discover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Thermostat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    Heat,
    Cool,
    #[serde(rename = "HEATCOOL")]
    HeatCool,
    Off,
}

impl ThermostatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThermostatMode::Heat => "HEAT",
            ThermostatMode::Cool => "COOL",
            ThermostatMode::HeatCool => "HEATCOOL",
            ThermostatMode::Off => "OFF",
        }
    }
}

/// SDM `devices.list` response
#[derive(Debug, Default, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    pub devices: Vec<SdmDevice>,
}

#[derive(Debug, Deserialize)]
pub struct SdmDevice {
    /// Full resource name, enterprises/{project}/devices/{id}
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub traits: DeviceTraits,
}

/// The SDM traits this service reads; everything else is ignored
#[derive(Debug, Default, Deserialize)]
pub struct DeviceTraits {
    #[serde(rename = "sdm.devices.traits.Info")]
    pub info: Option<InfoTrait>,
    #[serde(rename = "sdm.devices.traits.ThermostatMode")]
    pub thermostat_mode: Option<ThermostatModeTrait>,
    #[serde(rename = "sdm.devices.traits.Temperature")]
    pub temperature: Option<TemperatureTrait>,
    #[serde(rename = "sdm.devices.traits.Humidity")]
    pub humidity: Option<HumidityTrait>,
}

impl DeviceTraits {
    /// Whether the device exposes the trait that defines `class`
    pub fn belongs_to(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Thermostat => self.thermostat_mode.is_some(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoTrait {
    pub custom_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThermostatModeTrait {
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureTrait {
    pub ambient_temperature_celsius: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumidityTrait {
    pub ambient_humidity_percent: Option<f64>,
}

/// Nest thermostat as reported by the SDM device list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thermostat {
    pub device_id: String,
    /// Full resource name, enterprises/{project}/devices/{id}
    pub name: String,
    pub display_name: String,
    pub current_mode: String,
    pub ambient_temperature_celsius: Option<f64>,
    pub humidity_percent: Option<f64>,
}

/// Keep the devices of `class` from an SDM device list
pub fn parse_devices(response: DevicesResponse, class: DeviceClass) -> Vec<Thermostat> {
    response
        .devices
        .into_iter()
        .filter(|device| device.traits.belongs_to(class))
        .filter_map(|device| {
            let device_id = device.name.rsplit('/').next().unwrap_or("").to_string();
            if device_id.is_empty() {
                return None;
            }

            let traits = device.traits;
            let display_name = traits
                .info
                .and_then(|info| info.custom_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            let current_mode = traits
                .thermostat_mode
                .and_then(|t| t.mode)
                .unwrap_or_else(|| "UNKNOWN".to_string());

            Some(Thermostat {
                device_id,
                name: device.name,
                display_name,
                current_mode,
                ambient_temperature_celsius: traits
                    .temperature
                    .and_then(|t| t.ambient_temperature_celsius),
                humidity_percent: traits.humidity.and_then(|h| h.ambient_humidity_percent),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_devices_keeps_thermostats() {
        let response = json!({
            "devices": [
                {
                    "name": "enterprises/p1/devices/AVPHw",
                    "type": "sdm.devices.types.THERMOSTAT",
                    "traits": {
                        "sdm.devices.traits.Info": { "customName": "Living Room" },
                        "sdm.devices.traits.ThermostatMode": { "mode": "HEAT", "availableModes": ["HEAT", "OFF"] },
                        "sdm.devices.traits.Temperature": { "ambientTemperatureCelsius": 21.5 },
                        "sdm.devices.traits.Humidity": { "ambientHumidityPercent": 40.0 }
                    }
                },
                {
                    "name": "enterprises/p1/devices/CAM1",
                    "type": "sdm.devices.types.CAMERA",
                    "traits": { "sdm.devices.traits.Info": { "customName": "Door" } }
                },
                {
                    "name": "enterprises/p1/devices/UPSTAIRS",
                    "traits": { "sdm.devices.traits.ThermostatMode": {} }
                }
            ]
        });

        let response: DevicesResponse = serde_json::from_value(response).unwrap();
        let devices = parse_devices(response, DeviceClass::Thermostat);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "AVPHw");
        assert_eq!(devices[0].display_name, "Living Room");
        assert_eq!(devices[0].current_mode, "HEAT");
        assert_eq!(devices[0].ambient_temperature_celsius, Some(21.5));
        assert_eq!(devices[0].humidity_percent, Some(40.0));
        assert_eq!(devices[1].device_id, "UPSTAIRS");
        assert_eq!(devices[1].display_name, "Unknown");
        assert_eq!(devices[1].current_mode, "UNKNOWN");
    }

    #[test]
    fn test_parse_devices_empty_response() {
        let response: DevicesResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parse_devices(response, DeviceClass::Thermostat).is_empty());
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_value(ThermostatMode::Off).unwrap(), json!("OFF"));
        assert_eq!(serde_json::to_value(ThermostatMode::HeatCool).unwrap(), json!("HEATCOOL"));
        assert_eq!(ThermostatMode::Off.as_str(), "OFF");
    }
}
