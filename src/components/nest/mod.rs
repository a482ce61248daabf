mod client;
mod dispatcher;
pub mod models;
pub mod token;

pub use client::{DeviceControl, NestClient, SDM_API_BASE};
pub use dispatcher::{DeviceOutcome, Dispatcher, Outcome};
pub use models::{DeviceClass, Thermostat, ThermostatMode};
pub use token::TokenManager;
