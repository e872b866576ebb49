//! Device enumeration

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use evdev::Device;

/// Information about an input device
#[derive(Debug)]
pub struct DeviceInfo {
    pub path: PathBuf,
    pub name: String,
    pub vendor: u16,
    pub product: u16,
    pub keyboard: bool,
}

impl DeviceInfo {
    /// Get vendor:product string (e.g., "3434:0361")
    pub fn vendor_product(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Enumerate all input devices, sorted by path
pub fn enumerate_devices() -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    for entry in std::fs::read_dir("/dev/input").context("Failed to read /dev/input")? {
        let path = entry?.path();

        let is_event_node = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);
        if !is_event_node {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                let id = device.input_id();
                devices.push(DeviceInfo {
                    name: device.name().unwrap_or("Unknown").to_string(),
                    vendor: id.vendor(),
                    product: id.product(),
                    keyboard: is_keyboard(&device),
                    path,
                });
            }
            Err(e) => {
                tracing::debug!("Could not open {}: {}", path.display(), e);
            }
        }
    }

    devices.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(devices)
}

/// Check if a device is a keyboard
pub fn is_keyboard(device: &Device) -> bool {
    device
        .supported_events()
        .contains(evdev::EventType::KEY)
        && device
            .supported_keys()
            .map(|keys| keys.contains(evdev::Key::KEY_A))
            .unwrap_or(false)
}

/// Open the configured keyboard, or the first keyboard found.
pub fn open_keyboard(path: Option<&Path>) -> Result<(PathBuf, Device)> {
    if let Some(path) = path {
        let device = Device::open(path)
            .with_context(|| format!("Failed to open input device {}", path.display()))?;
        if !is_keyboard(&device) {
            tracing::warn!("{} does not look like a keyboard", path.display());
        }
        return Ok((path.to_path_buf(), device));
    }

    let info = enumerate_devices()?
        .into_iter()
        .find(|d| d.keyboard)
        .context("No keyboard found under /dev/input; set `device` in the config")?;

    tracing::info!("Using keyboard {} ({})", info.name, info.path.display());
    let device = Device::open(&info.path)
        .with_context(|| format!("Failed to open input device {}", info.path.display()))?;
    Ok((info.path, device))
}
