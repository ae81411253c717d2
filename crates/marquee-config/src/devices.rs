// ── Device config file ──
//
// devices.yml:
//
//   settings:            # optional, defaults for every device
//     url: https://example.com
//   devices:
//     - name: Lobby
//       settings:
//         url: https://example.com/lobby
//
// Top-level settings are merged under each device's own (shallow, device
// keys win).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use marquee_core::{DeviceConfig, DeviceInfo};

use crate::ConfigError;

#[derive(Debug, Default, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    settings: Option<Map<String, Value>>,
    #[serde(default)]
    devices: Option<Vec<DeviceEntry>>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    name: String,
    #[serde(default)]
    settings: Option<Map<String, Value>>,
}

/// Parse and validate the contents of a device config file.
pub fn parse_device_config(text: &str) -> Result<DeviceConfig, ConfigError> {
    let file: DeviceFile = if text.trim().is_empty() {
        DeviceFile::default()
    } else {
        serde_yaml::from_str(text)?
    };

    let defaults = file.settings.unwrap_or_default();
    let mut seen = HashSet::new();
    let mut devices = Vec::new();

    for entry in file.devices.unwrap_or_default() {
        let name = entry.name.trim();
        if name.is_empty() {
            return Err(ConfigError::invalid("devices", "device name must not be empty"));
        }
        if !seen.insert(name.to_owned()) {
            return Err(ConfigError::invalid(
                "devices",
                format!("duplicate device name '{name}'"),
            ));
        }

        let mut settings = defaults.clone();
        settings.extend(entry.settings.unwrap_or_default());
        devices.push(DeviceInfo::new(name, Value::Object(settings)));
    }

    Ok(DeviceConfig::new(devices))
}

pub fn load_device_config(path: &Path) -> Result<DeviceConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_device_config(&text)
}
