//! # Audio Device Selection and Listing
//!
//! Resolves the configured device names and enumerates what the host offers, for
//! `GET /api/v1/devices`.

use serde::Serialize;
#[cfg(feature = "backend-cpal")]
use tracing::debug;

/// How a configured device name should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    /// Whatever the system considers the default
    SystemDefault,
    /// Exact device name as reported by the host
    Named(String),
}

impl std::str::FromStr for DeviceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "default" | "system" => Ok(DeviceSelection::SystemDefault),
            _ => Ok(DeviceSelection::Named(trimmed.to_string())),
        }
    }
}

impl DeviceSelection {
    /// Parse a config value straight into the name a backend expects.
    pub fn resolve(setting: &str) -> Option<String> {
        match setting.parse() {
            Ok(DeviceSelection::Named(name)) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AudioDeviceInfo {
    pub id: usize,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceInventory {
    pub backend: &'static str,
    pub available: bool,
    pub inputs: Vec<AudioDeviceInfo>,
    pub outputs: Vec<AudioDeviceInfo>,
    pub note: Option<String>,
}

#[cfg(feature = "backend-cpal")]
pub fn list_devices() -> DeviceInventory {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let collect = |devices: Vec<cpal::Device>, default: &Option<String>| -> Vec<AudioDeviceInfo> {
        devices
            .into_iter()
            .filter_map(|d| d.name().ok())
            .enumerate()
            .map(|(id, name)| AudioDeviceInfo {
                id,
                is_default: default.as_deref() == Some(name.as_str()),
                name,
            })
            .collect()
    };

    let inputs = match host.input_devices() {
        Ok(devices) => collect(devices.collect(), &default_input),
        Err(e) => {
            debug!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    };
    let outputs = match host.output_devices() {
        Ok(devices) => collect(devices.collect(), &default_output),
        Err(e) => {
            debug!("Failed to enumerate output devices: {}", e);
            Vec::new()
        }
    };

    DeviceInventory {
        backend: "cpal",
        available: true,
        inputs,
        outputs,
        note: None,
    }
}

#[cfg(not(feature = "backend-cpal"))]
pub fn list_devices() -> DeviceInventory {
    DeviceInventory {
        backend: "unavailable",
        available: false,
        inputs: Vec::new(),
        outputs: Vec::new(),
        note: Some("Built without the `backend-cpal` feature; no audio devices can be opened".to_string()),
    }
}
